//! Query model construction.
//!
//! Unwinds an operator call chain from its root source outward. Each
//! recognized operator adds a body clause, replaces the select or appends a
//! result operator to the model being built. Lambda arguments are resolved by
//! substituting their parameters with the expressions they range over
//! (the current select, a join source), and operator chains nested inside
//! those bodies become subquery models of the same arena.

use super::registry::{NodeTypeRegistry, OperatorKind};
use super::{
    BodyClause, IncludeOperator, ModelId, Ordering, QueryModel, QueryModelArena,
    QuerySourceId, QuerySourceKind, ResultOperator,
};
use crate::config::TranslationConfig;
use crate::error::{TranslationError, TranslationResult};
use crate::evaluate::ConstantFolder;
use crate::expr::{Expr, Lambda, MethodRef, Value};
use crate::normalize::{ExpressionTransform, TreeNormalizer};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Output of the builder: the arena and the id of the outermost model
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub arena: QueryModelArena,
    pub root: ModelId,
}

impl BuiltQuery {
    pub fn render(&self) -> String {
        self.arena.render(self.root)
    }
}

/// Builds query models from operator call chains.
pub struct QueryModelBuilder {
    registry: Arc<NodeTypeRegistry>,
    processors: Vec<Arc<dyn ExpressionTransform>>,
}

impl fmt::Debug for QueryModelBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryModelBuilder")
            .field("registry", &self.registry)
            .field("processors", &self.processor_names())
            .finish()
    }
}

impl Default for QueryModelBuilder {
    fn default() -> Self {
        Self::new(Arc::new(NodeTypeRegistry::new()))
    }
}

impl QueryModelBuilder {
    /// Builder with the standard last-chance processors: tree normalization
    /// and constant folding
    pub fn new(registry: Arc<NodeTypeRegistry>) -> Self {
        Self {
            registry,
            processors: vec![
                Arc::new(TreeNormalizer::new()) as Arc<dyn ExpressionTransform>,
                Arc::new(ConstantFolder::default()),
            ],
        }
    }

    pub fn with_config(registry: Arc<NodeTypeRegistry>, config: &TranslationConfig) -> Self {
        let mut processors: Vec<Arc<dyn ExpressionTransform>> = Vec::new();
        if config.normalize_in_builder {
            processors.push(Arc::new(TreeNormalizer::new()));
        }
        processors.push(Arc::new(ConstantFolder::default()));
        Self {
            registry,
            processors,
        }
    }

    /// Replace the last-chance processors
    pub fn with_processors(mut self, processors: Vec<Arc<dyn ExpressionTransform>>) -> Self {
        self.processors = processors;
        self
    }

    pub fn registry(&self) -> &Arc<NodeTypeRegistry> {
        &self.registry
    }

    pub fn processor_names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    pub fn build(&self, expr: Expr) -> TranslationResult<BuiltQuery> {
        let mut pass = BuildPass {
            registry: &self.registry,
            processors: &self.processors,
            arena: QueryModelArena::new(),
            generated: HashSet::new(),
        };
        let model = pass.build_chain(expr)?;
        let root = pass.arena.add_model(model);
        debug!(
            models = pass.arena.model_count(),
            sources = pass.arena.source_count(),
            "built query model"
        );
        Ok(BuiltQuery {
            arena: pass.arena,
            root,
        })
    }
}

struct BuildPass<'a> {
    registry: &'a NodeTypeRegistry,
    processors: &'a [Arc<dyn ExpressionTransform>],
    arena: QueryModelArena,
    /// Sources whose item name was generated and may still adopt a lambda
    /// parameter name
    generated: HashSet<QuerySourceId>,
}

/// Static call whose first argument is the source sequence
fn operator_parts(expr: &Expr) -> Option<(&MethodRef, &[Expr])> {
    match expr {
        Expr::Call {
            target: None,
            method,
            args,
        } if !args.is_empty() => Some((method, args)),
        _ => None,
    }
}

/// Whether `expr` produces a query sequence: a query root, a subquery or a
/// call chain over one
fn is_sequence(expr: &Expr) -> bool {
    match expr.strip_convert() {
        Expr::EntityQuery(_) | Expr::SubQuery(_) => true,
        other => operator_parts(other)
            .map(|(_, args)| is_sequence(&args[0]))
            .unwrap_or(false),
    }
}

fn exact_args<const N: usize>(method: &MethodRef, args: Vec<Expr>) -> TranslationResult<[Expr; N]> {
    <[Expr; N]>::try_from(args).map_err(|args| {
        TranslationError::invalid_arguments(
            method.name(),
            format!("expected {} argument(s) after the source, found {}", N, args.len()),
        )
    })
}

fn optional_arg(method: &MethodRef, args: Vec<Expr>) -> TranslationResult<Option<Expr>> {
    if args.len() > 1 {
        return Err(TranslationError::invalid_arguments(
            method.name(),
            format!("expected at most 1 argument after the source, found {}", args.len()),
        ));
    }
    Ok(args.into_iter().next())
}

fn lambda_arg(method: &MethodRef, arg: Expr, arity: usize) -> TranslationResult<Lambda> {
    match arg.into_stripped() {
        Expr::Lambda(lambda) if lambda.params.len() == arity => Ok(lambda),
        other => Err(TranslationError::invalid_arguments(
            method.name(),
            format!("expected a {}-parameter lambda, found {}", arity, other),
        )),
    }
}

/// Navigation names along `x => x.A.B`, outermost last
fn navigation_chain(method: &MethodRef, lambda: &Lambda) -> TranslationResult<Vec<Arc<str>>> {
    let mut names = Vec::new();
    let mut current = lambda.body.strip_convert();
    loop {
        match current {
            Expr::Member {
                target: Some(target),
                member,
            } => {
                names.push(member.name.clone());
                current = target.strip_convert();
            }
            Expr::Variable(name) if lambda.params.first() == Some(name) && !names.is_empty() => {
                names.reverse();
                return Ok(names);
            }
            other => {
                return Err(TranslationError::invalid_arguments(
                    method.name(),
                    format!("expected a navigation property chain, found {}", other),
                ))
            }
        }
    }
}

impl BuildPass<'_> {
    fn lookup(&self, expr: &Expr) -> Option<OperatorKind> {
        operator_parts(expr).and_then(|(method, _)| self.registry.lookup(method))
    }

    fn build_chain(&mut self, expr: Expr) -> TranslationResult<QueryModel> {
        let expr = expr.into_stripped();
        match self.lookup(&expr) {
            Some(kind) => {
                let Expr::Call { method, args, .. } = expr else {
                    return Err(TranslationError::internal("operator lookup on a non-call"));
                };
                let mut args = args.into_iter();
                let source = args
                    .next()
                    .ok_or_else(|| TranslationError::internal("operator call without source"))?;
                let model = self.build_chain(source)?;
                trace!(operator = %method, "applying query operator");
                self.apply(model, &method, kind, args.collect())
            }
            None => {
                if let Some((method, args)) = operator_parts(&expr) {
                    if is_sequence(&args[0]) {
                        return Err(TranslationError::unrecognized(method.to_string()));
                    }
                }
                self.main_from(expr)
            }
        }
    }

    fn main_from(&mut self, from_expression: Expr) -> TranslationResult<QueryModel> {
        let (from_expression, item_type) = match from_expression {
            Expr::EntityQuery(entity) => (Expr::EntityQuery(entity.clone()), Some(entity)),
            other => (self.process(other)?, None),
        };
        let source = self.generated_source(QuerySourceKind::MainFrom, from_expression, item_type);
        Ok(QueryModel::new(source))
    }

    fn generated_source(
        &mut self,
        kind: QuerySourceKind,
        from_expression: Expr,
        item_type: Option<Arc<str>>,
    ) -> QuerySourceId {
        let name = format!("<generated>_{}", self.arena.source_count());
        let id = self.arena.add_source(name, kind, from_expression, item_type);
        self.generated.insert(id);
        id
    }

    fn named_source(
        &mut self,
        name: &Arc<str>,
        kind: QuerySourceKind,
        from_expression: Expr,
    ) -> QuerySourceId {
        let item_type = match from_expression.strip_convert() {
            Expr::EntityQuery(entity) => Some(entity.clone()),
            _ => None,
        };
        self.arena
            .add_source(name.clone(), kind, from_expression, item_type)
    }

    fn adopt_name(&mut self, select: &Expr, name: &Arc<str>) {
        if let Expr::SourceRef(id) = select {
            if self.generated.remove(id) {
                if let Some(source) = self.arena.source_mut(*id) {
                    source.item_name = name.clone();
                }
            }
        }
    }

    fn item_type_of(&self, select: &Expr) -> Option<Arc<str>> {
        match select.strip_convert() {
            Expr::SourceRef(id) => self.arena.source(*id).and_then(|s| s.item_type.clone()),
            _ => None,
        }
    }

    /// Nested operator chains become subquery models, then the last-chance
    /// processors run
    fn process(&mut self, expr: Expr) -> TranslationResult<Expr> {
        let expr = self.extract_subqueries(expr)?;
        self.processors
            .iter()
            .try_fold(expr, |expr, processor| processor.transform(expr))
    }

    fn extract_subqueries(&mut self, expr: Expr) -> TranslationResult<Expr> {
        if self.lookup(expr.strip_convert()).is_some() {
            let model = self.build_chain(expr)?;
            return Ok(Expr::SubQuery(self.arena.add_model(model)));
        }
        expr.map_children(|child| self.extract_subqueries(child))
    }

    /// Substitute the lambda's parameters and process the body
    fn bind(&mut self, lambda: Lambda, values: Vec<Expr>) -> TranslationResult<Expr> {
        let bindings: HashMap<Arc<str>, Expr> = lambda.params.into_iter().zip(values).collect();
        let body = lambda.body.substitute(&bindings);
        self.process(body)
    }

    /// Resolve a one-parameter lambda ranging over the model's items
    fn resolve(&mut self, model: &QueryModel, lambda: Lambda) -> TranslationResult<Expr> {
        if let Some(param) = lambda.params.first() {
            self.adopt_name(&model.select, param);
        }
        self.bind(lambda, vec![model.select.clone()])
    }

    /// Move the model into a subquery and start a new model over its results
    fn wrap(&mut self, model: QueryModel) -> QueryModel {
        let item_type = match model.last_operator() {
            Some(ResultOperator::GroupBy { .. }) => None,
            _ => self.item_type_of(&model.select),
        };
        let inner = self.arena.add_model(model);
        trace!(subquery = inner.0, "wrapping query model");
        let source =
            self.generated_source(QuerySourceKind::MainFrom, Expr::SubQuery(inner), item_type);
        QueryModel::new(source)
    }

    /// Clauses may not follow result operators of the same model
    fn clause_position(&mut self, model: QueryModel) -> QueryModel {
        if model.last_operator().is_some() {
            self.wrap(model)
        } else {
            model
        }
    }

    /// Result operators with item lambdas may not follow a grouping
    fn item_position(&mut self, model: QueryModel) -> QueryModel {
        if matches!(model.last_operator(), Some(ResultOperator::GroupBy { .. })) {
            self.wrap(model)
        } else {
            model
        }
    }

    fn filtered(
        &mut self,
        model: QueryModel,
        method: &MethodRef,
        predicate: Option<Expr>,
    ) -> TranslationResult<QueryModel> {
        match predicate {
            Some(predicate) => self.apply_where(model, method, predicate),
            None => Ok(model),
        }
    }

    fn apply_where(
        &mut self,
        model: QueryModel,
        method: &MethodRef,
        predicate: Expr,
    ) -> TranslationResult<QueryModel> {
        let lambda = lambda_arg(method, predicate, 1)?;
        let mut model = self.clause_position(model);
        let predicate = self.resolve(&model, lambda)?;
        model.body_clauses.push(BodyClause::Where(predicate));
        Ok(model)
    }

    fn apply_select(
        &mut self,
        model: QueryModel,
        method: &MethodRef,
        selector: Expr,
    ) -> TranslationResult<QueryModel> {
        let lambda = lambda_arg(method, selector, 1)?;
        let mut model = self.clause_position(model);
        model.select = self.resolve(&model, lambda)?;
        Ok(model)
    }

    fn apply(
        &mut self,
        model: QueryModel,
        method: &MethodRef,
        kind: OperatorKind,
        args: Vec<Expr>,
    ) -> TranslationResult<QueryModel> {
        use OperatorKind as K;

        let mut model = model;
        match kind {
            K::Where => {
                let [predicate] = exact_args(method, args)?;
                return self.apply_where(model, method, predicate);
            }
            K::Select => {
                let [selector] = exact_args(method, args)?;
                return self.apply_select(model, method, selector);
            }
            K::SelectMany => return self.apply_select_many(model, method, args),
            K::Join | K::GroupJoin => {
                let group = kind == K::GroupJoin;
                return self.apply_join(model, method, args, group);
            }
            K::OrderBy | K::OrderByDescending => {
                let [key] = exact_args(method, args)?;
                let lambda = lambda_arg(method, key, 1)?;
                model = self.clause_position(model);
                let key = self.resolve(&model, lambda)?;
                model.body_clauses.push(BodyClause::OrderBy(vec![Ordering {
                    key,
                    descending: kind == K::OrderByDescending,
                }]));
            }
            K::ThenBy | K::ThenByDescending => {
                let [key] = exact_args(method, args)?;
                let lambda = lambda_arg(method, key, 1)?;
                if model.last_operator().is_some()
                    || !matches!(model.body_clauses.last(), Some(BodyClause::OrderBy(_)))
                {
                    return Err(TranslationError::invalid_arguments(
                        method.name(),
                        "must directly follow an ordering",
                    ));
                }
                let key = self.resolve(&model, lambda)?;
                if let Some(BodyClause::OrderBy(orderings)) = model.body_clauses.last_mut() {
                    orderings.push(Ordering {
                        key,
                        descending: kind == K::ThenByDescending,
                    });
                }
            }
            K::GroupBy => {
                let mut args = args.into_iter();
                let (key, element) = match (args.next(), args.next(), args.next()) {
                    (Some(key), element, None) => (key, element),
                    _ => {
                        return Err(TranslationError::invalid_arguments(
                            method.name(),
                            "expected a key selector and an optional element selector",
                        ))
                    }
                };
                let key = lambda_arg(method, key, 1)?;
                let element = element.map(|e| lambda_arg(method, e, 1)).transpose()?;
                model = self.item_position(model);
                let key = self.resolve(&model, key)?;
                let element = match element {
                    Some(element) => self.resolve(&model, element)?,
                    None => model.select.clone(),
                };
                let source = self.generated_source(
                    QuerySourceKind::GroupResult,
                    element.clone(),
                    None,
                );
                model.result_operators.push(ResultOperator::GroupBy {
                    key,
                    element,
                    source,
                });
            }
            K::Take | K::Skip | K::Contains => {
                let [arg] = exact_args(method, args)?;
                let arg = self.process(arg)?;
                model.result_operators.push(match kind {
                    K::Take => ResultOperator::Take(arg),
                    K::Skip => ResultOperator::Skip(arg),
                    _ => ResultOperator::Contains(arg),
                });
            }
            K::First
            | K::FirstOrDefault
            | K::Single
            | K::SingleOrDefault
            | K::Last
            | K::LastOrDefault
            | K::Count
            | K::LongCount
            | K::Any => {
                let predicate = optional_arg(method, args)?;
                model = self.filtered(model, method, predicate)?;
                model.result_operators.push(match kind {
                    K::First => ResultOperator::First { or_default: false },
                    K::FirstOrDefault => ResultOperator::First { or_default: true },
                    K::Single => ResultOperator::Single { or_default: false },
                    K::SingleOrDefault => ResultOperator::Single { or_default: true },
                    K::Last => ResultOperator::Last { or_default: false },
                    K::LastOrDefault => ResultOperator::Last { or_default: true },
                    K::Count => ResultOperator::Count,
                    K::LongCount => ResultOperator::LongCount,
                    _ => ResultOperator::Any,
                });
            }
            K::All => {
                let [predicate] = exact_args(method, args)?;
                let lambda = lambda_arg(method, predicate, 1)?;
                model = self.item_position(model);
                let predicate = self.resolve(&model, lambda)?;
                model.result_operators.push(ResultOperator::All(predicate));
            }
            K::Sum | K::Min | K::Max | K::Average => {
                if let Some(selector) = optional_arg(method, args)? {
                    model = self.apply_select(model, method, selector)?;
                }
                model.result_operators.push(match kind {
                    K::Sum => ResultOperator::Sum,
                    K::Min => ResultOperator::Min,
                    K::Max => ResultOperator::Max,
                    _ => ResultOperator::Average,
                });
            }
            K::Distinct | K::Reverse => {
                exact_args::<0>(method, args)?;
                model.result_operators.push(if kind == K::Distinct {
                    ResultOperator::Distinct
                } else {
                    ResultOperator::Reverse
                });
            }
            K::Concat | K::Union | K::Intersect | K::Except => {
                let [other] = exact_args(method, args)?;
                let other = self.process(other)?;
                model.result_operators.push(match kind {
                    K::Concat => ResultOperator::Concat(other),
                    K::Union => ResultOperator::Union(other),
                    K::Intersect => ResultOperator::Intersect(other),
                    _ => ResultOperator::Except(other),
                });
            }
            K::Cast | K::OfType => {
                exact_args::<0>(method, args)?;
                let target = method.generic_args().first().cloned().ok_or_else(|| {
                    TranslationError::invalid_arguments(method.name(), "missing target type")
                })?;
                model.result_operators.push(if kind == K::Cast {
                    ResultOperator::Cast(target)
                } else {
                    ResultOperator::OfType(target)
                });
            }
            K::DefaultIfEmpty => {
                let default = optional_arg(method, args)?
                    .map(|arg| self.process(arg))
                    .transpose()?;
                model
                    .result_operators
                    .push(ResultOperator::DefaultIfEmpty(default));
            }
            K::AsTracking | K::AsNoTracking => {
                exact_args::<0>(method, args)?;
                model
                    .result_operators
                    .push(ResultOperator::Tracking(kind == K::AsTracking));
            }
            K::TagWith => {
                let [tag] = exact_args(method, args)?;
                match tag.into_stripped() {
                    Expr::Constant(Value::String(tag)) => {
                        model.result_operators.push(ResultOperator::Tag(tag.to_string()))
                    }
                    other => {
                        return Err(TranslationError::invalid_arguments(
                            method.name(),
                            format!("tag must be a constant string, found {}", other),
                        ))
                    }
                }
            }
            K::IgnoreQueryFilters => {
                exact_args::<0>(method, args)?;
                model
                    .result_operators
                    .push(ResultOperator::IgnoreQueryFilters);
            }
            K::Include => {
                let [navigation] = exact_args(method, args)?;
                let lambda = lambda_arg(method, navigation, 1)?;
                let navigation_path = navigation_chain(method, &lambda)?;
                if let Some(param) = lambda.params.first() {
                    self.adopt_name(&model.select, param);
                }
                self.push_include(&mut model, navigation_path);
            }
            K::StringInclude => {
                let [path] = exact_args(method, args)?;
                let navigation_path = match path.into_stripped() {
                    Expr::Constant(Value::String(path)) => path
                        .split('.')
                        .map(|segment| Arc::<str>::from(segment.trim()))
                        .collect::<Vec<_>>(),
                    other => {
                        return Err(TranslationError::invalid_arguments(
                            method.name(),
                            format!("include path must be a constant string, found {}", other),
                        ))
                    }
                };
                if navigation_path.iter().any(|segment| segment.is_empty()) {
                    return Err(TranslationError::invalid_arguments(
                        method.name(),
                        "include path has an empty navigation name",
                    ));
                }
                self.push_include(&mut model, navigation_path);
            }
            K::ThenInclude => {
                let [navigation] = exact_args(method, args)?;
                let lambda = lambda_arg(method, navigation, 1)?;
                let chain = navigation_chain(method, &lambda)?;
                let previous = model.result_operators.iter_mut().rev().find_map(|op| match op {
                    ResultOperator::Include(include) => Some(include),
                    _ => None,
                });
                match previous {
                    Some(include) => include.navigation_path.extend(chain),
                    None => {
                        return Err(TranslationError::invalid_arguments(
                            method.name(),
                            "must follow an include",
                        ))
                    }
                }
            }
            K::Custom(name) => {
                let mut resolved = Vec::with_capacity(args.len());
                for arg in args {
                    let arg = match arg.into_stripped() {
                        Expr::Lambda(lambda) if lambda.params.len() == 1 => {
                            self.resolve(&model, lambda)?
                        }
                        other => self.process(other)?,
                    };
                    resolved.push(arg);
                }
                model.result_operators.push(ResultOperator::Custom {
                    name,
                    args: resolved,
                });
            }
        }
        Ok(model)
    }

    fn push_include(&mut self, model: &mut QueryModel, navigation_path: Vec<Arc<str>>) {
        let source = match &model.select {
            Expr::SourceRef(id) => Some(*id),
            _ => None,
        };
        model
            .result_operators
            .push(ResultOperator::Include(IncludeOperator {
                source,
                navigation_path,
            }));
    }

    fn apply_select_many(
        &mut self,
        model: QueryModel,
        method: &MethodRef,
        args: Vec<Expr>,
    ) -> TranslationResult<QueryModel> {
        let mut args = args.into_iter();
        let (collection, result) = match (args.next(), args.next(), args.next()) {
            (Some(collection), result, None) => (collection, result),
            _ => {
                return Err(TranslationError::invalid_arguments(
                    method.name(),
                    "expected a collection selector and an optional result selector",
                ))
            }
        };
        let collection = lambda_arg(method, collection, 1)?;
        let result = result.map(|r| lambda_arg(method, r, 2)).transpose()?;

        let mut model = self.clause_position(model);
        let from_expression = self.resolve(&model, collection)?;
        let source = match result.as_ref().and_then(|r| r.params.get(1)) {
            Some(name) => {
                self.named_source(name, QuerySourceKind::AdditionalFrom, from_expression)
            }
            None => self.generated_source(QuerySourceKind::AdditionalFrom, from_expression, None),
        };
        model.body_clauses.push(BodyClause::AdditionalFrom(source));
        model.select = match result {
            Some(result) => {
                self.adopt_name(&model.select, &result.params[0]);
                self.bind(result, vec![model.select.clone(), Expr::SourceRef(source)])?
            }
            None => Expr::SourceRef(source),
        };
        Ok(model)
    }

    fn apply_join(
        &mut self,
        model: QueryModel,
        method: &MethodRef,
        args: Vec<Expr>,
        group: bool,
    ) -> TranslationResult<QueryModel> {
        let [inner, outer_key, inner_key, result] = exact_args(method, args)?;
        let outer_key = lambda_arg(method, outer_key, 1)?;
        let inner_key = lambda_arg(method, inner_key, 1)?;
        let result = lambda_arg(method, result, 2)?;

        let mut model = self.clause_position(model);
        let inner = self.process(inner.into_stripped())?;
        let kind = if group {
            QuerySourceKind::GroupJoin
        } else {
            QuerySourceKind::Join
        };
        let source = match inner_key.params.first() {
            Some(name) => self.named_source(name, kind, inner),
            None => self.generated_source(kind, inner, None),
        };

        let outer_key = self.resolve(&model, outer_key)?;
        let inner_key = self.bind(inner_key, vec![Expr::SourceRef(source)])?;
        model.body_clauses.push(if group {
            BodyClause::GroupJoin {
                source,
                outer_key,
                inner_key,
            }
        } else {
            BodyClause::Join {
                source,
                outer_key,
                inner_key,
            }
        });
        model.select = self.bind(result, vec![model.select.clone(), Expr::SourceRef(source)])?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{known, ops, BinaryOp};

    fn customers() -> Expr {
        Expr::entity_query("Customer")
    }

    fn age_over(n: i64) -> Expr {
        Expr::lambda(
            ["c"],
            Expr::binary(
                BinaryOp::Gt,
                Expr::member(Expr::var("c"), "Customer", "Age"),
                Expr::constant(n),
            ),
        )
    }

    fn build(expr: Expr) -> BuiltQuery {
        QueryModelBuilder::default().build(expr).unwrap()
    }

    #[test]
    fn test_where_select_take() {
        let query = ops::take(
            ops::select(
                ops::where_(customers(), age_over(18)),
                Expr::lambda(["c"], Expr::member(Expr::var("c"), "Customer", "Name")),
            ),
            Expr::parameter("__p_0"),
        );
        let built = build(query);
        assert_eq!(
            built.render(),
            "from c in EntityQueryable<Customer> where (c.Age > 18) select c.Name => Take(@__p_0)"
        );
        assert_eq!(built.arena.model_count(), 1);
    }

    #[test]
    fn test_clause_after_result_operator_wraps() {
        let query = ops::where_(ops::take(customers(), Expr::constant(5)), age_over(18));
        let built = build(query);
        let root = built.arena.model(built.root).unwrap();
        assert!(root.result_operators.is_empty());
        let main = built.arena.source(root.main_from).unwrap();
        assert!(matches!(main.from_expression, Expr::SubQuery(_)));
        assert_eq!(main.item_type.as_deref(), Some("Customer"));
        assert_eq!(built.arena.model_count(), 2);
    }

    #[test]
    fn test_annotations_do_not_wrap() {
        let query = ops::where_(ops::as_no_tracking(customers()), age_over(18));
        let built = build(query);
        assert_eq!(built.arena.model_count(), 1);
        let root = built.arena.model(built.root).unwrap();
        assert_eq!(root.result_operators, vec![ResultOperator::Tracking(false)]);
    }

    #[test]
    fn test_nested_chain_becomes_subquery() {
        // c => c.Orders.Any(o => o.Total > 100)
        let orders_any = Expr::static_call(
            known::enumerable("Any", 2),
            vec![
                Expr::member(Expr::var("c"), "Customer", "Orders"),
                Expr::lambda(
                    ["o"],
                    Expr::binary(
                        BinaryOp::Gt,
                        Expr::member(Expr::var("o"), "Order", "Total"),
                        Expr::constant(100),
                    ),
                ),
            ],
        );
        let built = build(ops::where_(customers(), Expr::lambda(["c"], orders_any)));
        let root = built.arena.model(built.root).unwrap();
        let subqueries = built.arena.referenced_subqueries(built.root).unwrap();
        assert_eq!(subqueries.len(), 1);
        let sub = built.arena.model(subqueries[0]).unwrap();
        assert_eq!(sub.result_operators, vec![ResultOperator::Any]);
        assert_eq!(sub.body_clauses.len(), 1);
        assert!(matches!(root.body_clauses[0], BodyClause::Where(Expr::SubQuery(_))));
        assert!(built.arena.validate(built.root).is_ok());
    }

    #[test]
    fn test_unrecognized_operator_over_sequence_fails() {
        let query = ops::extension(
            MethodRef::new("MyExtensions", "Frobnicate", 1),
            customers(),
            Vec::new(),
        );
        let err = QueryModelBuilder::default().build(query).unwrap_err();
        assert!(matches!(
            err,
            TranslationError::UnrecognizedOperator { method } if method.contains("Frobnicate")
        ));
    }

    #[test]
    fn test_then_by_extends_ordering() {
        let key = |name: &str| Expr::lambda(["c"], Expr::member(Expr::var("c"), "Customer", name));
        let query = ops::then_by(ops::order_by_descending(customers(), key("Age")), key("Name"));
        let built = build(query);
        let root = built.arena.model(built.root).unwrap();
        match &root.body_clauses[0] {
            BodyClause::OrderBy(orderings) => {
                assert_eq!(orderings.len(), 2);
                assert!(orderings[0].descending);
                assert!(!orderings[1].descending);
            }
            other => panic!("expected ordering, got {:?}", other),
        }
    }

    #[test]
    fn test_then_by_without_order_by_is_invalid() {
        let query = ops::then_by(
            customers(),
            Expr::lambda(["c"], Expr::member(Expr::var("c"), "Customer", "Age")),
        );
        let err = QueryModelBuilder::default().build(query).unwrap_err();
        assert!(matches!(err, TranslationError::InvalidOperatorArguments { .. }));
    }

    #[test]
    fn test_include_and_then_include_build_one_path() {
        let query = ops::then_include(
            ops::include(
                customers(),
                Expr::lambda(["c"], Expr::member(Expr::var("c"), "Customer", "Orders")),
            ),
            Expr::lambda(["o"], Expr::member(Expr::var("o"), "Order", "Lines")),
        );
        let built = build(query);
        let root = built.arena.model(built.root).unwrap();
        match &root.result_operators[..] {
            [ResultOperator::Include(include)] => {
                assert_eq!(
                    include.navigation_path,
                    vec![Arc::<str>::from("Orders"), Arc::from("Lines")]
                );
                assert_eq!(include.source, Some(root.main_from));
            }
            other => panic!("expected one include, got {:?}", other),
        }
    }

    #[test]
    fn test_string_include_splits_path() {
        let built = build(ops::include_path(customers(), "Orders.Lines"));
        let root = built.arena.model(built.root).unwrap();
        assert_eq!(
            root.result_operators[0],
            ResultOperator::Include(IncludeOperator {
                source: Some(root.main_from),
                navigation_path: vec!["Orders".into(), "Lines".into()],
            })
        );
    }

    #[test]
    fn test_tag_requires_constant() {
        let err = QueryModelBuilder::default()
            .build(ops::tag_with(customers(), Expr::parameter("__tag_0")))
            .unwrap_err();
        assert!(matches!(err, TranslationError::InvalidOperatorArguments { .. }));
    }

    #[test]
    fn test_join_binds_both_sources() {
        let query = ops::join(
            customers(),
            Expr::entity_query("Order"),
            Expr::lambda(["c"], Expr::member(Expr::var("c"), "Customer", "Id")),
            Expr::lambda(["o"], Expr::member(Expr::var("o"), "Order", "CustomerId")),
            Expr::lambda(["c", "o"], Expr::var("o")),
        );
        let built = build(query);
        assert_eq!(
            built.render(),
            "from c in EntityQueryable<Customer> join o in EntityQueryable<Order> on c.Id equals o.CustomerId select o"
        );
    }

    #[test]
    fn test_builder_processors_fold_constants() {
        let query = ops::where_(
            customers(),
            Expr::lambda(
                ["c"],
                Expr::binary(
                    BinaryOp::Gt,
                    Expr::member(Expr::var("c"), "Customer", "Age"),
                    Expr::binary(BinaryOp::Add, Expr::constant(10), Expr::constant(8)),
                ),
            ),
        );
        let built = build(query);
        assert!(built.render().contains("(c.Age > 18)"));
    }

    #[test]
    fn test_group_by_then_select_wraps_over_groups() {
        let query = ops::select(
            ops::group_by(
                customers(),
                Expr::lambda(["c"], Expr::member(Expr::var("c"), "Customer", "City")),
            ),
            Expr::lambda(["g"], Expr::member(Expr::var("g"), "Grouping", "Key")),
        );
        let built = build(query);
        let root = built.arena.model(built.root).unwrap();
        let underlying = built.arena.underlying_source(root.main_from).unwrap();
        assert_eq!(
            built.arena.source(underlying).unwrap().kind,
            QuerySourceKind::GroupResult
        );
    }
}
