//! Expression tree model.
//!
//! [`Expr`] is the immutable abstract syntax tree of a query. Passes consume a
//! tree and return a rewritten one; nothing mutates a tree in place.

mod method;
mod printer;
mod value;

pub use method::{known, MemberRef, MethodRef, MethodSignature};
pub use printer::ExpressionPrinter;
pub use value::{EnumValue, Record, StringComparison, Value};

use crate::model::{ModelId, QuerySourceId};
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

/// Unary operators
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Negate,
    /// Type conversion to the named type
    Convert(Arc<str>),
    /// Quoted lambda (operator arguments)
    Quote,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Coalesce,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::And => "&&",
            Self::Or => "||",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Coalesce => "??",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Gt | Self::Ge | Self::Lt | Self::Le
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    /// Operator that yields the logical negation of `self`.
    ///
    /// Total over the logical and comparison operators; `None` for the rest.
    pub fn invert(self) -> Option<Self> {
        Some(match self {
            Self::And => Self::Or,
            Self::Or => Self::And,
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Gt => Self::Le,
            Self::Ge => Self::Lt,
            Self::Lt => Self::Ge,
            Self::Le => Self::Gt,
            _ => return None,
        })
    }
}

/// Lambda: parameter names and a body
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Lambda {
    pub params: Vec<Arc<str>>,
    pub body: Box<Expr>,
}

impl Lambda {
    pub fn new<I, S>(params: I, body: Expr) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
            body: Box::new(body),
        }
    }
}

/// A node of the query expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Constant(Value),
    /// Query parameter produced by parameter extraction
    Parameter(Arc<str>),
    /// Reference to a lambda parameter
    Variable(Arc<str>),
    /// Field/property read; `target: None` is a static member
    Member {
        target: Option<Box<Expr>>,
        member: MemberRef,
    },
    /// Method call; `target: None` is a static/extension call
    Call {
        target: Option<Box<Expr>>,
        method: MethodRef,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Lambda(Lambda),
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    /// Invocation of a function value with arguments
    Invoke {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// The session instance a query was created from
    Context,
    /// Query root over all entities of a type
    EntityQuery(Arc<str>),
    /// Reference to a query source of the enclosing model arena
    SourceRef(QuerySourceId),
    /// Nested query model
    SubQuery(ModelId),
}

impl Expr {
    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Constant(value.into())
    }

    pub fn null() -> Self {
        Self::Constant(Value::Null)
    }

    pub fn var(name: impl Into<Arc<str>>) -> Self {
        Self::Variable(name.into())
    }

    pub fn parameter(name: impl Into<Arc<str>>) -> Self {
        Self::Parameter(name.into())
    }

    pub fn entity_query(entity: impl Into<Arc<str>>) -> Self {
        Self::EntityQuery(entity.into())
    }

    /// Instance member read
    pub fn member(target: Expr, owner: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
        Self::Member {
            target: Some(Box::new(target)),
            member: MemberRef::new(owner, name),
        }
    }

    /// Static member read
    pub fn static_member(member: MemberRef) -> Self {
        Self::Member {
            target: None,
            member,
        }
    }

    /// Instance method call
    pub fn call(target: Expr, method: MethodRef, args: Vec<Expr>) -> Self {
        Self::Call {
            target: Some(Box::new(target)),
            method,
            args,
        }
    }

    /// Static or extension method call
    pub fn static_call(method: MethodRef, args: Vec<Expr>) -> Self {
        Self::Call {
            target: None,
            method,
            args,
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn not(operand: Expr) -> Self {
        Self::unary(UnaryOp::Not, operand)
    }

    pub fn convert(operand: Expr, ty: impl Into<Arc<str>>) -> Self {
        Self::unary(UnaryOp::Convert(ty.into()), operand)
    }

    pub fn quote(lambda: Expr) -> Self {
        Self::unary(UnaryOp::Quote, lambda)
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::And, left, right)
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::Or, left, right)
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::Eq, left, right)
    }

    pub fn ne(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::Ne, left, right)
    }

    pub fn lambda<I, S>(params: I, body: Expr) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        Self::Lambda(Lambda::new(params, body))
    }

    pub fn conditional(test: Expr, if_true: Expr, if_false: Expr) -> Self {
        Self::Conditional {
            test: Box::new(test),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        }
    }

    pub fn invoke(callee: Expr, args: Vec<Expr>) -> Self {
        Self::Invoke {
            callee: Box::new(callee),
            args,
        }
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            Self::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }

    /// Strip conversion and quote wrappers
    pub fn strip_convert(&self) -> &Expr {
        let mut current = self;
        while let Self::Unary {
            op: UnaryOp::Convert(_) | UnaryOp::Quote,
            operand,
        } = current
        {
            current = operand;
        }
        current
    }

    /// Owned variant of [`Expr::strip_convert`]
    pub fn into_stripped(self) -> Expr {
        match self {
            Self::Unary {
                op: UnaryOp::Convert(_) | UnaryOp::Quote,
                operand,
            } => operand.into_stripped(),
            other => other,
        }
    }

    /// Direct children, in evaluation order
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Self::Constant(_)
            | Self::Parameter(_)
            | Self::Variable(_)
            | Self::Context
            | Self::EntityQuery(_)
            | Self::SourceRef(_)
            | Self::SubQuery(_) => Vec::new(),
            Self::Member { target, .. } => target.iter().map(|t| t.as_ref()).collect(),
            Self::Call { target, args, .. } => target
                .iter()
                .map(|t| t.as_ref())
                .chain(args.iter())
                .collect(),
            Self::Unary { operand, .. } => vec![operand],
            Self::Binary { left, right, .. } => vec![left, right],
            Self::Lambda(lambda) => vec![&lambda.body],
            Self::Conditional {
                test,
                if_true,
                if_false,
            } => vec![test, if_true, if_false],
            Self::Invoke { callee, args } => std::iter::once(callee.as_ref())
                .chain(args.iter())
                .collect(),
        }
    }

    /// Rebuild this node with every direct child passed through `f`
    pub fn map_children<E, F>(self, mut f: F) -> Result<Expr, E>
    where
        F: FnMut(Expr) -> Result<Expr, E>,
    {
        Ok(match self {
            leaf @ (Self::Constant(_)
            | Self::Parameter(_)
            | Self::Variable(_)
            | Self::Context
            | Self::EntityQuery(_)
            | Self::SourceRef(_)
            | Self::SubQuery(_)) => leaf,
            Self::Member { target, member } => Self::Member {
                target: match target {
                    Some(t) => Some(Box::new(f(*t)?)),
                    None => None,
                },
                member,
            },
            Self::Call {
                target,
                method,
                args,
            } => Self::Call {
                target: match target {
                    Some(t) => Some(Box::new(f(*t)?)),
                    None => None,
                },
                method,
                args: args.into_iter().map(&mut f).collect::<Result<_, E>>()?,
            },
            Self::Unary { op, operand } => Self::Unary {
                op,
                operand: Box::new(f(*operand)?),
            },
            Self::Binary { op, left, right } => {
                let left = f(*left)?;
                let right = f(*right)?;
                Self::binary(op, left, right)
            }
            Self::Lambda(Lambda { params, body }) => Self::Lambda(Lambda {
                params,
                body: Box::new(f(*body)?),
            }),
            Self::Conditional {
                test,
                if_true,
                if_false,
            } => {
                let test = f(*test)?;
                let if_true = f(*if_true)?;
                let if_false = f(*if_false)?;
                Self::conditional(test, if_true, if_false)
            }
            Self::Invoke { callee, args } => {
                let callee = f(*callee)?;
                Self::Invoke {
                    callee: Box::new(callee),
                    args: args.into_iter().map(&mut f).collect::<Result<_, E>>()?,
                }
            }
        })
    }

    /// Check whether any node of the tree (including `self`) satisfies `pred`
    pub fn any(&self, mut pred: impl FnMut(&Expr) -> bool) -> bool {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if pred(node) {
                return true;
            }
            stack.extend(node.children());
        }
        false
    }

    /// Subquery models referenced anywhere in this tree
    pub fn subqueries(&self) -> Vec<ModelId> {
        let mut found = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if let Self::SubQuery(id) = node {
                found.push(*id);
            }
            stack.extend(node.children().into_iter().rev());
        }
        found
    }

    /// Variables not bound by an enclosing lambda of this tree
    pub fn free_variables(&self) -> HashSet<Arc<str>> {
        let mut free = HashSet::new();
        collect_free(self, &mut Vec::new(), &mut free);
        free
    }

    /// Replace free variables by expressions, avoiding capture.
    ///
    /// A lambda that rebinds a name shadows it; a lambda parameter that would
    /// capture a free variable of a replacement is renamed first.
    pub fn substitute(self, bindings: &HashMap<Arc<str>, Expr>) -> Expr {
        if bindings.is_empty() {
            return self;
        }
        match self {
            Self::Variable(name) => match bindings.get(&name) {
                Some(replacement) => replacement.clone(),
                None => Self::Variable(name),
            },
            Self::Lambda(Lambda { params, body }) => {
                let mut active: HashMap<Arc<str>, Expr> = bindings
                    .iter()
                    .filter(|(k, _)| !params.contains(*k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                if active.is_empty() {
                    return Self::Lambda(Lambda { params, body });
                }

                let incoming: HashSet<Arc<str>> = active
                    .values()
                    .flat_map(|v| v.free_variables())
                    .collect();
                let mut taken: HashSet<Arc<str>> = incoming.clone();
                taken.extend(body.free_variables());
                taken.extend(params.iter().cloned());

                let mut renamed = Vec::with_capacity(params.len());
                for param in params {
                    if incoming.contains(&param) {
                        let fresh = fresh_name(&param, &taken);
                        taken.insert(fresh.clone());
                        active.insert(param.clone(), Self::Variable(fresh.clone()));
                        renamed.push(fresh);
                    } else {
                        renamed.push(param);
                    }
                }

                Self::Lambda(Lambda {
                    params: renamed,
                    body: Box::new(body.substitute(&active)),
                })
            }
            other => match other
                .map_children(|child| Ok::<_, Infallible>(child.substitute(bindings)))
            {
                Ok(rebuilt) => rebuilt,
                Err(never) => match never {},
            },
        }
    }
}

fn fresh_name(base: &str, taken: &HashSet<Arc<str>>) -> Arc<str> {
    let mut n = 1;
    loop {
        let candidate: Arc<str> = format!("{}_{}", base, n).into();
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn collect_free(expr: &Expr, bound: &mut Vec<Arc<str>>, free: &mut HashSet<Arc<str>>) {
    match expr {
        Expr::Variable(name) => {
            if !bound.contains(name) {
                free.insert(name.clone());
            }
        }
        Expr::Lambda(lambda) => {
            let depth = bound.len();
            bound.extend(lambda.params.iter().cloned());
            collect_free(&lambda.body, bound, free);
            bound.truncate(depth);
        }
        other => {
            for child in other.children() {
                collect_free(child, bound, free);
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&ExpressionPrinter::new().print(self))
    }
}

/// Builders for query operator call chains.
///
/// These mirror the shape a fluent query surface produces: extension-style
/// calls whose first argument is the source sequence and whose lambda
/// arguments are quoted.
pub mod ops {
    use super::{known, Expr, MethodRef};

    fn operator(name: &str, source: Expr, args: Vec<Expr>) -> Expr {
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(source);
        all.extend(args);
        Expr::static_call(known::queryable(name, all.len()), all)
    }

    fn quoted(lambda: Expr) -> Expr {
        Expr::quote(lambda)
    }

    pub fn where_(source: Expr, predicate: Expr) -> Expr {
        operator("Where", source, vec![quoted(predicate)])
    }

    pub fn select(source: Expr, selector: Expr) -> Expr {
        operator("Select", source, vec![quoted(selector)])
    }

    pub fn select_many(source: Expr, collection: Expr, result: Expr) -> Expr {
        operator("SelectMany", source, vec![quoted(collection), quoted(result)])
    }

    pub fn join(outer: Expr, inner: Expr, outer_key: Expr, inner_key: Expr, result: Expr) -> Expr {
        operator(
            "Join",
            outer,
            vec![inner, quoted(outer_key), quoted(inner_key), quoted(result)],
        )
    }

    pub fn group_join(
        outer: Expr,
        inner: Expr,
        outer_key: Expr,
        inner_key: Expr,
        result: Expr,
    ) -> Expr {
        operator(
            "GroupJoin",
            outer,
            vec![inner, quoted(outer_key), quoted(inner_key), quoted(result)],
        )
    }

    pub fn order_by(source: Expr, key: Expr) -> Expr {
        operator("OrderBy", source, vec![quoted(key)])
    }

    pub fn order_by_descending(source: Expr, key: Expr) -> Expr {
        operator("OrderByDescending", source, vec![quoted(key)])
    }

    pub fn then_by(source: Expr, key: Expr) -> Expr {
        operator("ThenBy", source, vec![quoted(key)])
    }

    pub fn group_by(source: Expr, key: Expr) -> Expr {
        operator("GroupBy", source, vec![quoted(key)])
    }

    pub fn group_by_element(source: Expr, key: Expr, element: Expr) -> Expr {
        operator("GroupBy", source, vec![quoted(key), quoted(element)])
    }

    pub fn take(source: Expr, count: Expr) -> Expr {
        operator("Take", source, vec![count])
    }

    pub fn skip(source: Expr, count: Expr) -> Expr {
        operator("Skip", source, vec![count])
    }

    pub fn first(source: Expr) -> Expr {
        operator("First", source, Vec::new())
    }

    pub fn first_or_default(source: Expr) -> Expr {
        operator("FirstOrDefault", source, Vec::new())
    }

    pub fn count(source: Expr) -> Expr {
        operator("Count", source, Vec::new())
    }

    pub fn any(source: Expr) -> Expr {
        operator("Any", source, Vec::new())
    }

    pub fn any_where(source: Expr, predicate: Expr) -> Expr {
        operator("Any", source, vec![quoted(predicate)])
    }

    pub fn distinct(source: Expr) -> Expr {
        operator("Distinct", source, Vec::new())
    }

    pub fn concat(source: Expr, other: Expr) -> Expr {
        operator("Concat", source, vec![other])
    }

    pub fn as_tracking(source: Expr) -> Expr {
        Expr::static_call(known::as_tracking(), vec![source])
    }

    pub fn as_no_tracking(source: Expr) -> Expr {
        Expr::static_call(known::as_no_tracking(), vec![source])
    }

    pub fn tag_with(source: Expr, tag: Expr) -> Expr {
        Expr::static_call(known::tag_with(), vec![source, tag])
    }

    pub fn ignore_query_filters(source: Expr) -> Expr {
        Expr::static_call(known::ignore_query_filters(), vec![source])
    }

    pub fn include(source: Expr, navigation: Expr) -> Expr {
        Expr::static_call(known::include(), vec![source, quoted(navigation)])
    }

    pub fn include_async(source: Expr, navigation: Expr) -> Expr {
        Expr::static_call(known::include_async(), vec![source, quoted(navigation)])
    }

    pub fn include_path(source: Expr, path: &str) -> Expr {
        Expr::static_call(known::string_include(), vec![source, Expr::constant(path)])
    }

    pub fn then_include(source: Expr, navigation: Expr) -> Expr {
        Expr::static_call(known::then_include(), vec![source, quoted(navigation)])
    }

    /// Call an extension operator by its method reference
    pub fn extension(method: MethodRef, source: Expr, args: Vec<Expr>) -> Expr {
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(source);
        all.extend(args);
        Expr::static_call(method, all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind(name: &str, expr: Expr) -> HashMap<Arc<str>, Expr> {
        let mut map = HashMap::new();
        map.insert(Arc::from(name), expr);
        map
    }

    #[test]
    fn test_invert_is_total_over_logical_and_comparison() {
        for op in [
            BinaryOp::And,
            BinaryOp::Or,
            BinaryOp::Eq,
            BinaryOp::Ne,
            BinaryOp::Gt,
            BinaryOp::Ge,
            BinaryOp::Lt,
            BinaryOp::Le,
        ] {
            let inverted = op.invert().unwrap();
            assert_eq!(inverted.invert(), Some(op));
        }
        assert_eq!(BinaryOp::Add.invert(), None);
        assert_eq!(BinaryOp::Coalesce.invert(), None);
    }

    #[test]
    fn test_substitute_replaces_free_occurrences_only() {
        // x + (x => x)(1)  with x := 5
        let expr = Expr::binary(
            BinaryOp::Add,
            Expr::var("x"),
            Expr::invoke(Expr::lambda(["x"], Expr::var("x")), vec![Expr::constant(1)]),
        );
        let result = expr.substitute(&bind("x", Expr::constant(5)));
        let expected = Expr::binary(
            BinaryOp::Add,
            Expr::constant(5),
            Expr::invoke(Expr::lambda(["x"], Expr::var("x")), vec![Expr::constant(1)]),
        );
        assert_eq!(result, expected);
    }

    #[test]
    fn test_substitute_avoids_capture() {
        // (y => x + y) with x := y must not capture the outer y
        let expr = Expr::lambda(
            ["y"],
            Expr::binary(BinaryOp::Add, Expr::var("x"), Expr::var("y")),
        );
        let result = expr.substitute(&bind("x", Expr::var("y")));
        match result {
            Expr::Lambda(lambda) => {
                assert_eq!(lambda.params.len(), 1);
                let param = lambda.params[0].clone();
                assert_ne!(&*param, "y");
                assert_eq!(
                    *lambda.body,
                    Expr::binary(BinaryOp::Add, Expr::var("y"), Expr::Variable(param))
                );
            }
            other => panic!("expected lambda, got {:?}", other),
        }
    }

    #[test]
    fn test_free_variables_excludes_bound() {
        let expr = Expr::lambda(["a"], Expr::and(Expr::var("a"), Expr::var("b")));
        let free = expr.free_variables();
        assert!(free.contains("b"));
        assert!(!free.contains("a"));
    }

    #[test]
    fn test_strip_convert_sees_through_wrappers() {
        let lambda = Expr::lambda(["x"], Expr::var("x"));
        let wrapped = Expr::convert(Expr::quote(lambda.clone()), "Func");
        assert_eq!(wrapped.strip_convert(), &lambda);
        assert_eq!(wrapped.into_stripped(), lambda);
    }

    #[test]
    fn test_ops_arity_matches_argument_count() {
        let q = ops::where_(
            Expr::entity_query("Customer"),
            Expr::lambda(["c"], Expr::constant(true)),
        );
        match q {
            Expr::Call { method, args, .. } => {
                assert_eq!(method.name(), "Where");
                assert_eq!(method.arity(), args.len());
            }
            other => panic!("expected call, got {:?}", other),
        }
    }
}
