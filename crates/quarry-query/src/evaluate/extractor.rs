//! Parameter extraction.
//!
//! Walks a normalized tree, asks the [`EvaluabilityOracle`] about every node
//! and replaces each maximal evaluable subtree by either a named parameter or
//! an inline constant:
//!
//! - a subtree that reads a captured value (a member read, a closure record or
//!   the context) becomes a parameter, as does any subtree outside every lambda
//!   (so `Take(n)` does not bake `n` into the cached plan);
//! - other subtrees inside lambdas become constants;
//! - arguments of methods that demand literals (`TagWith`) always become
//!   constants, and so does everything when parameterization is disabled.

use super::{EvaluabilityOracle, Interpreter, ParameterBinding, ParameterValueStore};
use crate::config::TranslationConfig;
use crate::error::{TranslationError, TranslationResult};
use crate::expr::{Expr, Lambda, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, trace};

/// Prefix shared by all extracted parameter names
pub const PARAMETER_PREFIX: &str = "__";

/// Name segment of parameters bound to context accessors
pub const CONTEXT_ACCESSOR_PREFIX: &str = "ef_filter";

const CONTEXT_PARAMETER: &str = "context";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NotEvaluatable,
    Evaluatable { captured: bool },
}

impl State {
    fn is_evaluatable(self) -> bool {
        matches!(self, Self::Evaluatable { .. })
    }

    fn captured(self) -> bool {
        matches!(self, Self::Evaluatable { captured: true })
    }
}

/// Hoists client-evaluable subtrees out of a query tree.
#[derive(Debug, Clone)]
pub struct ParameterExtractor {
    oracle: EvaluabilityOracle,
    interpreter: Interpreter,
    parameterize: bool,
    generate_context_accessors: bool,
    log_sensitive_data: bool,
}

impl Default for ParameterExtractor {
    fn default() -> Self {
        Self::new(EvaluabilityOracle::default(), Interpreter::default())
    }
}

impl ParameterExtractor {
    pub fn new(oracle: EvaluabilityOracle, interpreter: Interpreter) -> Self {
        Self {
            oracle,
            interpreter,
            parameterize: true,
            generate_context_accessors: false,
            log_sensitive_data: false,
        }
    }

    /// Apply the extraction flags of `config`
    pub fn with_config(mut self, config: &TranslationConfig) -> Self {
        self.parameterize = config.parameterize;
        self.generate_context_accessors = config.generate_context_accessors;
        self.log_sensitive_data = config.log_sensitive_data;
        self
    }

    pub fn with_parameterize(mut self, parameterize: bool) -> Self {
        self.parameterize = parameterize;
        self
    }

    pub fn with_context_accessors(mut self, enabled: bool) -> Self {
        self.generate_context_accessors = enabled;
        self
    }

    pub fn oracle(&self) -> &EvaluabilityOracle {
        &self.oracle
    }

    /// Extract parameters from `expr`, recording their bindings in `store`
    pub fn extract(
        &self,
        expr: Expr,
        store: &mut dyn ParameterValueStore,
    ) -> TranslationResult<Expr> {
        let mut pass = ExtractionPass {
            extractor: self,
            store,
            parameterized: HashMap::new(),
            in_lambda: false,
        };
        let (root, state) = pass.visit(expr)?;
        if state.is_evaluatable() {
            pass.process_root(root, state, false)
        } else {
            Ok(root)
        }
    }
}

struct ExtractionPass<'a> {
    extractor: &'a ParameterExtractor,
    store: &'a mut dyn ParameterValueStore,
    parameterized: HashMap<Expr, Expr>,
    in_lambda: bool,
}

impl ExtractionPass<'_> {
    fn visit(&mut self, expr: Expr) -> TranslationResult<(Expr, State)> {
        match expr {
            Expr::Lambda(Lambda { params, body }) => {
                let outer = std::mem::replace(&mut self.in_lambda, true);
                let result = self.visit(*body).and_then(|(body, state)| {
                    if state.is_evaluatable() {
                        self.process_root(body, state, false)
                    } else {
                        Ok(body)
                    }
                });
                self.in_lambda = outer;
                Ok((
                    Expr::Lambda(Lambda {
                        params,
                        body: Box::new(result?),
                    }),
                    State::NotEvaluatable,
                ))
            }
            other => {
                let node_evaluatable = self.extractor.oracle.is_evaluatable(&other);
                let captures = matches!(
                    other,
                    Expr::Member { .. } | Expr::Context | Expr::Constant(Value::Record(_))
                );
                let force_constant =
                    matches!(&other, Expr::Call { method, .. } if method.const_args());

                let mut states = Vec::new();
                let rebuilt = other.map_children(|child| {
                    let (child, state) = self.visit(child)?;
                    states.push(state);
                    Ok::<_, TranslationError>(child)
                })?;

                if node_evaluatable
                    && !force_constant
                    && states.iter().all(|s| s.is_evaluatable())
                {
                    let captured = captures || states.iter().any(|s| s.captured());
                    return Ok((rebuilt, State::Evaluatable { captured }));
                }

                let mut index = 0;
                let rebuilt = rebuilt.map_children(|child| {
                    let state = states[index];
                    index += 1;
                    if state.is_evaluatable() {
                        self.process_root(child, state, force_constant)
                    } else {
                        Ok(child)
                    }
                })?;
                Ok((rebuilt, State::NotEvaluatable))
            }
        }
    }

    fn process_root(
        &mut self,
        root: Expr,
        state: State,
        force_constant: bool,
    ) -> TranslationResult<Expr> {
        let extractor = self.extractor;

        if extractor.generate_context_accessors && root.any(|e| matches!(e, Expr::Context)) {
            return Ok(self.context_accessor(root));
        }

        let as_parameter =
            !force_constant && extractor.parameterize && (state.captured() || !self.in_lambda);

        if !as_parameter && root.is_constant() {
            return Ok(root);
        }
        if as_parameter {
            if let Some(existing) = self.parameterized.get(&root) {
                return Ok(existing.clone());
            }
        }

        let value = extractor.interpreter.evaluate(&root).map_err(|err| {
            if extractor.log_sensitive_data {
                TranslationError::Parameterization(format!(
                    "An exception was thrown while attempting to evaluate the query parameter expression '{}': {}",
                    root, err
                ))
            } else {
                TranslationError::Parameterization(
                    "An exception was thrown while attempting to evaluate a query parameter expression. \
                     Enable sensitive data logging to see the expression."
                        .to_string(),
                )
            }
        })?;

        if !as_parameter {
            trace!(kind = value.kind(), "folded evaluable subtree to constant");
            return Ok(Expr::Constant(value));
        }

        let name = self.next_name(base_name(&root).as_deref().unwrap_or("p"));
        debug!(parameter = %name, "extracted query parameter");
        self.store
            .add_parameter(name.clone(), ParameterBinding::Value(value));
        let parameter = Expr::Parameter(name);
        self.parameterized.insert(root, parameter.clone());
        Ok(parameter)
    }

    fn context_accessor(&mut self, root: Expr) -> Expr {
        if let Some(existing) = self.parameterized.get(&root) {
            return existing.clone();
        }
        let member = match root.strip_convert() {
            Expr::Member { member, .. } => member.name.to_string(),
            _ => "p".to_string(),
        };
        let name = self.next_name(&format!("{}__{}", CONTEXT_ACCESSOR_PREFIX, member));
        debug!(parameter = %name, "extracted context accessor parameter");
        let accessor = Expr::lambda([CONTEXT_PARAMETER], replace_context(root.clone()));
        self.store
            .add_parameter(name.clone(), ParameterBinding::ContextAccessor(accessor));
        let parameter = Expr::Parameter(name);
        self.parameterized.insert(root, parameter.clone());
        parameter
    }

    fn next_name(&self, base: &str) -> Arc<str> {
        format!("{}{}_{}", PARAMETER_PREFIX, clean_name(base), self.store.len()).into()
    }
}

/// Name hint for a parameter: the member chain or the called method
fn base_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Member { target, member } => {
            match target.as_deref().and_then(base_name) {
                Some(prefix) => Some(format!("{}_{}", prefix, member.name)),
                None => Some(member.name.to_string()),
            }
        }
        Expr::Call { method, .. } => Some(method.name().to_string()),
        Expr::Unary { operand, .. } => base_name(operand),
        _ => None,
    }
}

/// Strip compiler closure prefixes (`<>h__TransparentIdentifier0`, `$VB$Local_x`)
fn clean_name(name: &str) -> &str {
    let name = match name.rfind('>') {
        Some(index) => &name[index + 1..],
        None => name,
    };
    name.strip_prefix("$VB$Local_").unwrap_or(name)
}

fn replace_context(expr: Expr) -> Expr {
    match expr {
        Expr::Context => Expr::var(CONTEXT_PARAMETER),
        other => match other.map_children(|child| Ok::<_, Infallible>(replace_context(child))) {
            Ok(rebuilt) => rebuilt,
            Err(never) => match never {},
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::{ExclusionPolicy, ParameterValues};
    use crate::expr::{known, ops, BinaryOp, MethodRef, Record};

    fn closure(field: &str, value: impl Into<Value>) -> Expr {
        Expr::constant(Record::new("<>c__DisplayClass0_0").with_field(field, value))
    }

    fn captured(field: &str, value: impl Into<Value>) -> Expr {
        Expr::member(closure(field, value), "<>c__DisplayClass0_0", field)
    }

    fn customers() -> Expr {
        Expr::entity_query("Customer")
    }

    fn age_over(bound: Expr) -> Expr {
        Expr::lambda(
            ["c"],
            Expr::binary(BinaryOp::Gt, Expr::member(Expr::var("c"), "Customer", "Age"), bound),
        )
    }

    fn extract(expr: Expr) -> (Expr, ParameterValues) {
        let mut params = ParameterValues::new();
        let result = ParameterExtractor::default()
            .extract(expr, &mut params)
            .unwrap();
        (result, params)
    }

    #[test]
    fn test_captured_value_becomes_parameter() {
        let (result, params) = extract(ops::where_(customers(), age_over(captured("minAge", 21))));
        let expected = ops::where_(customers(), age_over(Expr::parameter("__minAge_0")));
        assert_eq!(result, expected);
        assert_eq!(params.value("__minAge_0"), Some(&Value::Int(21)));
    }

    #[test]
    fn test_deterministic_subtree_in_lambda_is_folded() {
        let bound = Expr::binary(BinaryOp::Add, Expr::constant(10), Expr::constant(8));
        let (result, params) = extract(ops::where_(customers(), age_over(bound)));
        assert_eq!(result, ops::where_(customers(), age_over(Expr::constant(18))));
        assert!(params.is_empty());
    }

    #[test]
    fn test_new_guid_is_never_folded() {
        let lambda = Expr::lambda(
            ["c"],
            Expr::eq(
                Expr::member(Expr::var("c"), "Customer", "Id"),
                Expr::static_call(known::new_guid(), vec![]),
            ),
        );
        let query = ops::where_(customers(), lambda);
        let (result, params) = extract(query.clone());
        assert_eq!(result, query);
        assert!(params.is_empty());
    }

    #[test]
    fn test_top_level_argument_is_parameterized() {
        let (result, params) = extract(ops::take(customers(), Expr::constant(5)));
        assert_eq!(result, ops::take(customers(), Expr::parameter("__p_0")));
        assert_eq!(params.value("__p_0"), Some(&Value::Int(5)));
    }

    #[test]
    fn test_repeated_subtree_shares_parameter() {
        let name = captured("name", "Alfreds");
        let lambda = Expr::lambda(
            ["c"],
            Expr::or(
                Expr::eq(Expr::member(Expr::var("c"), "Customer", "First"), name.clone()),
                Expr::eq(Expr::member(Expr::var("c"), "Customer", "Last"), name),
            ),
        );
        let (result, params) = extract(ops::where_(customers(), lambda));
        assert_eq!(params.len(), 1);
        assert_eq!(result.to_string().matches("@__name_0").count(), 2);
    }

    #[test]
    fn test_parameterization_disabled_inlines_constants() {
        let mut params = ParameterValues::new();
        let result = ParameterExtractor::default()
            .with_parameterize(false)
            .extract(
                ops::where_(customers(), age_over(captured("minAge", 21))),
                &mut params,
            )
            .unwrap();
        assert_eq!(result, ops::where_(customers(), age_over(Expr::constant(21))));
        assert!(params.is_empty());
    }

    #[test]
    fn test_tag_argument_is_always_constant() {
        let query = ops::tag_with(customers(), captured("tag", "hot path"));
        let (result, params) = extract(query);
        assert_eq!(result, ops::tag_with(customers(), Expr::constant("hot path")));
        assert!(params.is_empty());
    }

    #[test]
    fn test_context_accessor_mode() {
        let tenant = Expr::member(Expr::Context, "ShopContext", "TenantId");
        let lambda = Expr::lambda(
            ["c"],
            Expr::eq(Expr::member(Expr::var("c"), "Customer", "TenantId"), tenant),
        );
        let mut params = ParameterValues::new();
        let result = ParameterExtractor::default()
            .with_context_accessors(true)
            .extract(ops::where_(customers(), lambda), &mut params)
            .unwrap();
        assert!(result.to_string().contains("@__ef_filter__TenantId_0"));
        assert!(matches!(
            params.get("__ef_filter__TenantId_0"),
            Some(ParameterBinding::ContextAccessor(_))
        ));
    }

    #[test]
    fn test_compiler_prefixes_are_stripped() {
        assert_eq!(clean_name("<>h__TransparentIdentifier0"), "h__TransparentIdentifier0");
        assert_eq!(clean_name("$VB$Local_city"), "city");
        assert_eq!(clean_name("plain"), "plain");
    }

    #[test]
    fn test_evaluation_failure_redacts_expression() {
        let policy = ExclusionPolicy::empty();
        let extractor =
            ParameterExtractor::new(EvaluabilityOracle::new(policy), Interpreter::default());
        let bad = Expr::member(Expr::null(), "Customer", "Name");
        let mut params = ParameterValues::new();
        let err = extractor
            .extract(ops::take(customers(), bad), &mut params)
            .unwrap_err();
        match err {
            TranslationError::Parameterization(msg) => assert!(msg.contains("sensitive data")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_abs_overflow_is_an_evaluation_error() {
        let abs = MethodRef::new(known::MATH, "Abs", 1);
        let count = Expr::static_call(abs, vec![captured("n", i64::MIN)]);
        let mut params = ParameterValues::new();
        let err = ParameterExtractor::default()
            .extract(ops::take(customers(), count), &mut params)
            .unwrap_err();
        assert!(matches!(err, TranslationError::Parameterization(_)));
        assert!(params.is_empty());
    }
}
