//! Client-side evaluation of extracted subtrees.

use crate::error::{TranslationError, TranslationResult};
use crate::expr::{
    known, BinaryOp, Expr, MemberRef, MethodSignature, StringComparison, UnaryOp, Value,
};
use chrono::Utc;
use once_cell::sync::Lazy;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Client implementation of a method: `(receiver, arguments) -> value`
pub type ClientMethod =
    Arc<dyn Fn(Option<&Value>, &[Value]) -> TranslationResult<Value> + Send + Sync>;

/// Client implementation of a member read: `receiver -> value`
pub type ClientMember = Arc<dyn Fn(Option<&Value>) -> TranslationResult<Value> + Send + Sync>;

static BUILTINS: Lazy<Arc<ClientFunctions>> = Lazy::new(|| Arc::new(ClientFunctions::builtin()));

/// Table of client implementations for methods and members.
#[derive(Clone, Default)]
pub struct ClientFunctions {
    methods: HashMap<MethodSignature, ClientMethod>,
    members: HashMap<MemberRef, ClientMember>,
}

impl fmt::Debug for ClientFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientFunctions")
            .field("methods", &self.methods.len())
            .field("members", &self.members.len())
            .finish()
    }
}

fn expect_str<'v>(value: &'v Value, what: &str) -> TranslationResult<&'v str> {
    value.as_str().ok_or_else(|| {
        TranslationError::evaluation(format!("{} expects a string, got {}", what, value.kind()))
    })
}

fn receiver<'v>(target: Option<&'v Value>, what: &str) -> TranslationResult<&'v Value> {
    match target {
        Some(Value::Null) | None => Err(TranslationError::evaluation(format!(
            "null receiver for {}",
            what
        ))),
        Some(v) => Ok(v),
    }
}

fn string_method<F>(name: &'static str, f: F) -> ClientMethod
where
    F: Fn(&str, &[Value]) -> TranslationResult<Value> + Send + Sync + 'static,
{
    Arc::new(move |target, args| {
        let s = expect_str(receiver(target, name)?, name)?;
        f(s, args)
    })
}

fn numeric_pair(a: &Value, b: &Value) -> Option<(f64, f64)> {
    match (a, b) {
        (Value::Int(x), Value::Float(y)) => Some((*x as f64, *y)),
        (Value::Float(x), Value::Int(y)) => Some((*x, *y as f64)),
        (Value::Float(x), Value::Float(y)) => Some((*x, *y)),
        _ => None,
    }
}

impl ClientFunctions {
    /// An empty table
    pub fn empty() -> Self {
        Self::default()
    }

    /// Shared table of built-in string, math, identifier and clock functions
    pub fn shared() -> Arc<Self> {
        BUILTINS.clone()
    }

    pub fn register_method<F>(mut self, signature: MethodSignature, f: F) -> Self
    where
        F: Fn(Option<&Value>, &[Value]) -> TranslationResult<Value> + Send + Sync + 'static,
    {
        self.methods.insert(signature, Arc::new(f));
        self
    }

    pub fn register_member<F>(mut self, member: MemberRef, f: F) -> Self
    where
        F: Fn(Option<&Value>) -> TranslationResult<Value> + Send + Sync + 'static,
    {
        self.members.insert(member, Arc::new(f));
        self
    }

    pub fn method(&self, signature: &MethodSignature) -> Option<&ClientMethod> {
        self.methods.get(signature)
    }

    pub fn member(&self, member: &MemberRef) -> Option<&ClientMember> {
        self.members.get(member)
    }

    fn builtin() -> Self {
        let sig = |owner: &str, name: &str, arity| MethodSignature::new(owner, name, arity);
        let mut table = Self::empty();

        let predicates: [(&'static str, fn(&str, &str) -> bool); 3] = [
            ("StartsWith", |s, a| s.starts_with(a)),
            ("EndsWith", |s, a| s.ends_with(a)),
            ("Contains", |s, a| s.contains(a)),
        ];
        for (name, op) in predicates {
            table.methods.insert(
                sig(known::STRING, name, 1),
                string_method(name, move |s, args| {
                    let arg = args.first().map_or(Ok(""), |a| expect_str(a, name))?;
                    Ok(Value::Bool(op(s, arg)))
                }),
            );
        }

        let mappers: [(&'static str, fn(&str) -> String); 3] = [
            ("ToUpper", str::to_uppercase),
            ("ToLower", str::to_lowercase),
            ("Trim", |s| s.trim().to_string()),
        ];
        for (name, op) in mappers {
            table.methods.insert(
                sig(known::STRING, name, 0),
                string_method(name, move |s, _| Ok(Value::from(op(s)))),
            );
        }

        table
            .register_member(MemberRef::new(known::STRING, "Length"), |target| {
                let s = expect_str(receiver(target, "Length")?, "Length")?;
                Ok(Value::Int(s.chars().count() as i64))
            })
            .register_method(sig(known::STRING, "IsNullOrEmpty", 1), |_, args| {
                Ok(Value::Bool(match args.first() {
                    None | Some(Value::Null) => true,
                    Some(v) => expect_str(v, "IsNullOrEmpty")?.is_empty(),
                }))
            })
            .register_method(sig(known::STRING, "Concat", 2), |_, args| {
                let mut out = String::new();
                for arg in args {
                    match arg {
                        Value::Null => {}
                        Value::String(s) => out.push_str(s),
                        other => out.push_str(&other.to_string()),
                    }
                }
                Ok(Value::from(out))
            })
            .register_method(known::string_compare().definition().clone(), |_, args| {
                let [a, b, mode] = args else {
                    return Err(TranslationError::evaluation("String.Compare expects 3 arguments"));
                };
                let mode = StringComparison::from_value(mode).ok_or_else(|| {
                    TranslationError::evaluation("String.Compare expects a StringComparison")
                })?;
                let ordering = match (a, b) {
                    (Value::Null, Value::Null) => Ordering::Equal,
                    (Value::Null, _) => Ordering::Less,
                    (_, Value::Null) => Ordering::Greater,
                    (a, b) => {
                        let (a, b) = (expect_str(a, "Compare")?, expect_str(b, "Compare")?);
                        match mode {
                            StringComparison::Ordinal => a.cmp(b),
                            StringComparison::OrdinalIgnoreCase => {
                                a.to_uppercase().cmp(&b.to_uppercase())
                            }
                        }
                    }
                };
                Ok(Value::Int(ordering as i64))
            })
            .register_method(sig(known::MATH, "Abs", 1), |_, args| match args.first() {
                Some(Value::Int(i)) => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| TranslationError::evaluation("Math.Abs overflow")),
                Some(Value::Float(x)) => Ok(Value::Float(x.abs())),
                _ => Err(TranslationError::evaluation("Math.Abs expects a number")),
            })
            .register_method(sig(known::MATH, "Max", 2), |_, args| {
                math_pick(args, Ordering::Greater)
            })
            .register_method(sig(known::MATH, "Min", 2), |_, args| {
                math_pick(args, Ordering::Less)
            })
            .register_method(known::new_guid().definition().clone(), |_, _| {
                Ok(Value::Uuid(Uuid::new_v4()))
            })
            .register_member(MemberRef::new(known::GUID, "Empty"), |_| Ok(Value::Uuid(Uuid::nil())))
            .register_member(known::date_time_now(), |_| Ok(Value::DateTime(Utc::now())))
            .register_member(known::date_time_utc_now(), |_| Ok(Value::DateTime(Utc::now())))
            .register_member(known::date_time_offset_now(), |_| Ok(Value::DateTime(Utc::now())))
            .register_member(known::date_time_offset_utc_now(), |_| {
                Ok(Value::DateTime(Utc::now()))
            })
            .register_member(known::date_time_today(), |_| {
                let midnight = Utc::now()
                    .date_naive()
                    .and_hms_opt(0, 0, 0)
                    .ok_or_else(|| TranslationError::evaluation("invalid date"))?;
                Ok(Value::DateTime(midnight.and_utc()))
            })
    }
}

fn math_pick(args: &[Value], keep: Ordering) -> TranslationResult<Value> {
    match args {
        [a, b] => match compare_values(a, b) {
            Some(ord) if ord == keep || ord == Ordering::Equal => Ok(a.clone()),
            Some(_) => Ok(b.clone()),
            None => Err(TranslationError::evaluation("Math.Max/Min expects numbers")),
        },
        _ => Err(TranslationError::evaluation("Math.Max/Min expects 2 arguments")),
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::DateTime(x), Value::DateTime(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => numeric_pair(a, b).and_then(|(x, y)| x.partial_cmp(&y)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match numeric_pair(a, b) {
        Some((x, y)) => x == y,
        None => a == b,
    }
}

fn arithmetic(op: BinaryOp, a: &Value, b: &Value) -> TranslationResult<Value> {
    let overflow =
        || TranslationError::evaluation(format!("integer overflow in '{}'", op.symbol()));
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::String(x), Value::String(y)) if op == BinaryOp::Add => {
            Ok(Value::from(format!("{}{}", x, y)))
        }
        (Value::Int(x), Value::Int(y)) => {
            let (x, y) = (*x, *y);
            let result = match op {
                BinaryOp::Add => x.checked_add(y),
                BinaryOp::Sub => x.checked_sub(y),
                BinaryOp::Mul => x.checked_mul(y),
                BinaryOp::Div if y == 0 => {
                    return Err(TranslationError::evaluation("division by zero"))
                }
                BinaryOp::Div => x.checked_div(y),
                BinaryOp::Mod if y == 0 => {
                    return Err(TranslationError::evaluation("division by zero"))
                }
                BinaryOp::Mod => x.checked_rem(y),
                _ => None,
            };
            result.map(Value::Int).ok_or_else(overflow)
        }
        _ => match numeric_pair(a, b) {
            Some((x, y)) => Ok(Value::Float(match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
                _ => x % y,
            })),
            None => Err(TranslationError::evaluation(format!(
                "cannot apply '{}' to {} and {}",
                op.symbol(),
                a.kind(),
                b.kind()
            ))),
        },
    }
}

/// Evaluates closed expressions to values.
///
/// Lambda parameters are bound only while invoking an inline lambda; any
/// other free variable, an extracted parameter or a query source is an
/// evaluation error.
#[derive(Debug, Clone)]
pub struct Interpreter {
    functions: Arc<ClientFunctions>,
    context: Option<Value>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(ClientFunctions::shared())
    }
}

type Env = Vec<(Arc<str>, Value)>;

impl Interpreter {
    pub fn new(functions: Arc<ClientFunctions>) -> Self {
        Self {
            functions,
            context: None,
        }
    }

    /// Value `Expr::Context` evaluates to
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn functions(&self) -> &ClientFunctions {
        &self.functions
    }

    pub fn evaluate(&self, expr: &Expr) -> TranslationResult<Value> {
        self.eval(expr, &mut Vec::new())
    }

    fn eval(&self, expr: &Expr, env: &mut Env) -> TranslationResult<Value> {
        match expr {
            Expr::Constant(value) => Ok(value.clone()),
            Expr::Variable(name) => env
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| {
                    TranslationError::evaluation(format!("unbound variable '{}'", name))
                }),
            Expr::Member { target, member } => {
                let target = match target {
                    Some(t) => Some(self.eval(t, env)?),
                    None => None,
                };
                if let Some(Value::Record(record)) = &target {
                    if let Some(value) = record.field(&member.name) {
                        return Ok(value.clone());
                    }
                }
                match self.functions.member(member) {
                    Some(f) => f(target.as_ref()),
                    None if matches!(target, Some(Value::Null)) => Err(TranslationError::evaluation(
                        format!("null reference reading '{}'", member),
                    )),
                    None => Err(TranslationError::evaluation(format!(
                        "no client implementation for member '{}'",
                        member
                    ))),
                }
            }
            Expr::Call {
                target,
                method,
                args,
            } => {
                let target = match target {
                    Some(t) => Some(self.eval(t, env)?),
                    None => None,
                };
                let args = args
                    .iter()
                    .map(|a| self.eval(a, env))
                    .collect::<TranslationResult<Vec<_>>>()?;
                let f = self.functions.method(method.definition()).ok_or_else(|| {
                    TranslationError::evaluation(format!(
                        "no client implementation for method '{}'",
                        method
                    ))
                })?;
                f(target.as_ref(), &args)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, env)?;
                match (op, value) {
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Negate, Value::Int(i)) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| {
                            TranslationError::evaluation("integer overflow in negation")
                        }),
                    (UnaryOp::Negate, Value::Float(x)) => Ok(Value::Float(-x)),
                    (UnaryOp::Not | UnaryOp::Negate, Value::Null) => Ok(Value::Null),
                    (UnaryOp::Convert(_) | UnaryOp::Quote, value) => Ok(value),
                    (op, value) => Err(TranslationError::evaluation(format!(
                        "cannot apply {:?} to {}",
                        op,
                        value.kind()
                    ))),
                }
            }
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right, env),
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => match self.eval(test, env)? {
                Value::Bool(true) => self.eval(if_true, env),
                Value::Bool(false) => self.eval(if_false, env),
                other => Err(TranslationError::evaluation(format!(
                    "conditional test must be bool, got {}",
                    other.kind()
                ))),
            },
            Expr::Invoke { callee, args } => match callee.strip_convert() {
                Expr::Lambda(lambda) if lambda.params.len() == args.len() => {
                    let values = args
                        .iter()
                        .map(|a| self.eval(a, env))
                        .collect::<TranslationResult<Vec<_>>>()?;
                    let depth = env.len();
                    env.extend(lambda.params.iter().cloned().zip(values));
                    let result = self.eval(&lambda.body, env);
                    env.truncate(depth);
                    result
                }
                _ => Err(TranslationError::evaluation("invoked value is not an inline lambda")),
            },
            Expr::Context => self
                .context
                .clone()
                .ok_or_else(|| TranslationError::evaluation("no context instance available")),
            Expr::Lambda(_) => Err(TranslationError::evaluation("a lambda is not a value")),
            Expr::Parameter(name) => Err(TranslationError::evaluation(format!(
                "parameter '{}' has no value during translation",
                name
            ))),
            Expr::EntityQuery(_) | Expr::SourceRef(_) | Expr::SubQuery(_) => Err(
                TranslationError::evaluation("query sources cannot be evaluated on the client"),
            ),
        }
    }

    fn eval_binary(
        &self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        env: &mut Env,
    ) -> TranslationResult<Value> {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let short = op == BinaryOp::Or;
                match self.eval(left, env)? {
                    Value::Bool(b) if b == short => Ok(Value::Bool(b)),
                    Value::Bool(_) => match self.eval(right, env)? {
                        Value::Bool(b) => Ok(Value::Bool(b)),
                        other => Err(TranslationError::evaluation(format!(
                            "logical operand must be bool, got {}",
                            other.kind()
                        ))),
                    },
                    other => Err(TranslationError::evaluation(format!(
                        "logical operand must be bool, got {}",
                        other.kind()
                    ))),
                }
            }
            BinaryOp::Coalesce => match self.eval(left, env)? {
                Value::Null => self.eval(right, env),
                value => Ok(value),
            },
            _ => {
                let a = self.eval(left, env)?;
                let b = self.eval(right, env)?;
                match op {
                    BinaryOp::Eq => Ok(Value::Bool(values_equal(&a, &b))),
                    BinaryOp::Ne => Ok(Value::Bool(!values_equal(&a, &b))),
                    BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le => {
                        if a.is_null() || b.is_null() {
                            return Ok(Value::Bool(false));
                        }
                        let ord = compare_values(&a, &b).ok_or_else(|| {
                            TranslationError::evaluation(format!(
                                "cannot compare {} with {}",
                                a.kind(),
                                b.kind()
                            ))
                        })?;
                        Ok(Value::Bool(match op {
                            BinaryOp::Gt => ord == Ordering::Greater,
                            BinaryOp::Ge => ord != Ordering::Less,
                            BinaryOp::Lt => ord == Ordering::Less,
                            _ => ord != Ordering::Greater,
                        }))
                    }
                    _ => arithmetic(op, &a, &b),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{MethodRef, Record};

    fn eval(expr: Expr) -> TranslationResult<Value> {
        Interpreter::default().evaluate(&expr)
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        let sum = Expr::binary(BinaryOp::Add, Expr::constant(2), Expr::constant(3));
        assert_eq!(eval(sum.clone()).unwrap(), Value::Int(5));
        let cmp = Expr::binary(BinaryOp::Gt, sum, Expr::constant(4.5));
        assert_eq!(eval(cmp).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_record_member_read() {
        let closure = Record::new("<>c__DisplayClass0").with_field("city", "London");
        let expr = Expr::member(Expr::constant(closure), "<>c__DisplayClass0", "city");
        assert_eq!(eval(expr).unwrap(), Value::str("London"));
    }

    #[test]
    fn test_string_builtins() {
        let expr = Expr::call(
            Expr::constant("Quarry"),
            MethodRef::new(known::STRING, "ToUpper", 0),
            vec![],
        );
        assert_eq!(eval(expr).unwrap(), Value::str("QUARRY"));

        let len = Expr::member(Expr::constant("abc"), known::STRING, "Length");
        assert_eq!(eval(len).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_string_compare_modes() {
        let compare = |mode: StringComparison| {
            Expr::static_call(
                known::string_compare(),
                vec![
                    Expr::constant("abc"),
                    Expr::constant("ABC"),
                    Expr::Constant(mode.to_value()),
                ],
            )
        };
        assert_eq!(eval(compare(StringComparison::OrdinalIgnoreCase)).unwrap(), Value::Int(0));
        assert_eq!(eval(compare(StringComparison::Ordinal)).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_inline_lambda_invocation() {
        let lambda = Expr::lambda(
            ["x"],
            Expr::binary(BinaryOp::Mul, Expr::var("x"), Expr::var("x")),
        );
        let expr = Expr::invoke(lambda, vec![Expr::constant(7)]);
        assert_eq!(eval(expr).unwrap(), Value::Int(49));
    }

    #[test]
    fn test_context_requires_instance() {
        assert!(eval(Expr::Context).is_err());
        let ctx = Value::record(Record::new("ShopContext").with_field("TenantId", 4));
        let interp = Interpreter::default().with_context(ctx);
        let expr = Expr::member(Expr::Context, "ShopContext", "TenantId");
        assert_eq!(interp.evaluate(&expr).unwrap(), Value::Int(4));
    }

    #[test]
    fn test_division_by_zero_is_error() {
        let expr = Expr::binary(BinaryOp::Div, Expr::constant(1), Expr::constant(0));
        assert!(matches!(eval(expr), Err(TranslationError::Evaluation(_))));
    }

    #[test]
    fn test_null_lifting() {
        let expr = Expr::binary(BinaryOp::Add, Expr::null(), Expr::constant(1));
        assert_eq!(eval(expr).unwrap(), Value::Null);
        let coalesce = Expr::binary(BinaryOp::Coalesce, Expr::null(), Expr::constant("x"));
        assert_eq!(eval(coalesce).unwrap(), Value::str("x"));
    }

    #[test]
    fn test_registered_member_function() {
        let functions = ClientFunctions::empty()
            .register_member(MemberRef::new("Config", "Limit"), |_| Ok(Value::Int(10)));
        let interp = Interpreter::new(Arc::new(functions));
        let expr = Expr::static_member(MemberRef::new("Config", "Limit"));
        assert_eq!(interp.evaluate(&expr).unwrap(), Value::Int(10));
    }
}
