//! Parameter-value store.

use super::Interpreter;
use crate::error::TranslationResult;
use crate::expr::{Expr, Value};
use std::sync::Arc;

/// Runtime binding of an extracted query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterBinding {
    /// Value captured at extraction time
    Value(Value),
    /// Single-parameter lambda over the context instance, resolved per execution
    ContextAccessor(Expr),
}

/// Sink for parameters produced by the extractor.
pub trait ParameterValueStore {
    fn add_parameter(&mut self, name: Arc<str>, binding: ParameterBinding);

    /// Number of parameters added so far
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered in-memory parameter store.
#[derive(Debug, Clone, Default)]
pub struct ParameterValues {
    entries: Vec<(Arc<str>, ParameterBinding)>,
}

impl ParameterValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterBinding> {
        self.entries
            .iter()
            .find(|(n, _)| &**n == name)
            .map(|(_, binding)| binding)
    }

    /// Value of a parameter bound at extraction time
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.get(name) {
            Some(ParameterBinding::Value(value)) => Some(value),
            _ => None,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| &**n)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterBinding)> {
        self.entries.iter().map(|(n, b)| (&**n, b))
    }

    /// Resolve every binding to a value, running context accessors against `context`
    pub fn resolve(
        &self,
        interpreter: &Interpreter,
        context: &Value,
    ) -> TranslationResult<Vec<(Arc<str>, Value)>> {
        self.entries
            .iter()
            .map(|(name, binding)| {
                let value = match binding {
                    ParameterBinding::Value(value) => value.clone(),
                    ParameterBinding::ContextAccessor(accessor) => interpreter.evaluate(
                        &Expr::invoke(accessor.clone(), vec![Expr::Constant(context.clone())]),
                    )?,
                };
                Ok((name.clone(), value))
            })
            .collect()
    }
}

impl ParameterValueStore for ParameterValues {
    fn add_parameter(&mut self, name: Arc<str>, binding: ParameterBinding) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = binding,
            None => self.entries.push((name, binding)),
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Record;

    #[test]
    fn test_accessor_resolves_against_each_context() {
        let mut params = ParameterValues::new();
        params.add_parameter("__p_0".into(), ParameterBinding::Value(Value::Int(3)));
        params.add_parameter(
            "__ef_filter__TenantId_1".into(),
            ParameterBinding::ContextAccessor(Expr::lambda(
                ["context"],
                Expr::member(Expr::var("context"), "ShopContext", "TenantId"),
            )),
        );

        let interp = Interpreter::default();
        for tenant in [1, 2] {
            let ctx = Value::record(Record::new("ShopContext").with_field("TenantId", tenant));
            let resolved = params.resolve(&interp, &ctx).unwrap();
            assert_eq!(resolved[0].1, Value::Int(3));
            assert_eq!(resolved[1].1, Value::Int(i64::from(tenant)));
        }
    }

    #[test]
    fn test_re_adding_replaces_binding() {
        let mut params = ParameterValues::new();
        params.add_parameter("a".into(), ParameterBinding::Value(Value::Int(1)));
        params.add_parameter("a".into(), ParameterBinding::Value(Value::Int(2)));
        assert_eq!(params.len(), 1);
        assert_eq!(params.value("a"), Some(&Value::Int(2)));
    }
}
