//! Foreign-dialect comparison normalization.
//!
//! Some front-ends lower string comparison operators to a helper call,
//! `Operators.CompareString(a, b, textCompare)`. This pass rewrites that call
//! into the canonical `String.Compare(a, b, comparison)` form.

use super::ExpressionTransform;
use crate::error::TranslationResult;
use crate::expr::{known, Expr, StringComparison, Value};

/// Rewrites foreign-dialect string comparisons into the canonical call.
pub struct DialectNormalizer;

impl DialectNormalizer {
    fn visit(&self, expr: Expr) -> TranslationResult<Expr> {
        let expr = expr.map_children(|child| self.visit(child))?;
        Ok(match expr {
            Expr::Call {
                target: None,
                method,
                args,
            } if method.is_form_of(known::compare_string().definition()) => {
                match <[Expr; 3]>::try_from(args) {
                    Ok([left, right, flag]) => canonical_compare(left, right, flag),
                    Err(args) => Expr::static_call(method, args),
                }
            }
            other => other,
        })
    }
}

fn compare_call(left: Expr, right: Expr, comparison: StringComparison) -> Expr {
    Expr::static_call(
        known::string_compare(),
        vec![left, right, Expr::Constant(comparison.to_value())],
    )
}

fn canonical_compare(left: Expr, right: Expr, text_compare: Expr) -> Expr {
    match text_compare {
        Expr::Constant(Value::Bool(true)) => {
            compare_call(left, right, StringComparison::OrdinalIgnoreCase)
        }
        Expr::Constant(Value::Bool(false)) => compare_call(left, right, StringComparison::Ordinal),
        flag => Expr::conditional(
            flag,
            compare_call(left.clone(), right.clone(), StringComparison::OrdinalIgnoreCase),
            compare_call(left, right, StringComparison::Ordinal),
        ),
    }
}

impl ExpressionTransform for DialectNormalizer {
    fn name(&self) -> &'static str {
        "dialect"
    }

    fn transform(&self, expr: Expr) -> TranslationResult<Expr> {
        self.visit(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinaryOp;
    use test_case::test_case;

    fn vb_compare(flag: Expr) -> Expr {
        Expr::static_call(
            known::compare_string(),
            vec![Expr::var("a"), Expr::constant("x"), flag],
        )
    }

    #[test_case(true, StringComparison::OrdinalIgnoreCase ; "text compare ignores case")]
    #[test_case(false, StringComparison::Ordinal ; "binary compare is ordinal")]
    fn test_constant_flag_selects_comparison(flag: bool, expected: StringComparison) {
        let expr = Expr::binary(BinaryOp::Eq, vb_compare(Expr::constant(flag)), Expr::constant(0));
        let result = DialectNormalizer.transform(expr).unwrap();
        let expected = Expr::binary(
            BinaryOp::Eq,
            compare_call(Expr::var("a"), Expr::constant("x"), expected),
            Expr::constant(0),
        );
        assert_eq!(result, expected);
    }

    #[test]
    fn test_non_constant_flag_becomes_conditional() {
        let result = DialectNormalizer.transform(vb_compare(Expr::var("flag"))).unwrap();
        match result {
            Expr::Conditional { test, .. } => assert_eq!(*test, Expr::var("flag")),
            other => panic!("expected conditional, got {}", other),
        }
    }

    #[test]
    fn test_other_calls_untouched() {
        let expr = Expr::static_call(
            known::string_compare(),
            vec![
                Expr::var("a"),
                Expr::var("b"),
                Expr::Constant(StringComparison::Ordinal.to_value()),
            ],
        );
        assert_eq!(DialectNormalizer.transform(expr.clone()).unwrap(), expr);
    }
}
