//! Constant-only partial evaluation.

use super::{EvaluabilityOracle, Interpreter};
use crate::error::TranslationResult;
use crate::expr::Expr;
use crate::normalize::ExpressionTransform;
use tracing::trace;

/// Folds subtrees built only from constants into a single constant.
///
/// Used as last-chance cleanup on clause expressions. Unlike parameter
/// extraction it never reads static members or the context, and a subtree
/// that fails to evaluate is left in place.
#[derive(Debug, Clone, Default)]
pub struct ConstantFolder {
    oracle: EvaluabilityOracle,
    interpreter: Interpreter,
}

impl ConstantFolder {
    pub fn new(oracle: EvaluabilityOracle, interpreter: Interpreter) -> Self {
        Self {
            oracle,
            interpreter,
        }
    }

    fn is_foldable(&self, expr: &Expr) -> bool {
        !expr.is_constant()
            && self.oracle.is_subtree_evaluatable(expr)
            && !expr.any(|e| matches!(e, Expr::Context | Expr::Member { target: None, .. }))
    }

    fn visit(&self, expr: Expr) -> TranslationResult<Expr> {
        if self.is_foldable(&expr) {
            match self.interpreter.evaluate(&expr) {
                Ok(value) => return Ok(Expr::Constant(value)),
                Err(err) => trace!(error = %err, "left unfoldable subtree in place"),
            }
        }
        expr.map_children(|child| self.visit(child))
    }
}

impl ExpressionTransform for ConstantFolder {
    fn name(&self) -> &'static str {
        "fold_constants"
    }

    fn transform(&self, expr: Expr) -> TranslationResult<Expr> {
        self.visit(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{known, BinaryOp};

    #[test]
    fn test_folds_constant_arithmetic_inside_lambda() {
        let expr = Expr::lambda(
            ["c"],
            Expr::binary(
                BinaryOp::Lt,
                Expr::var("c"),
                Expr::binary(BinaryOp::Mul, Expr::constant(6), Expr::constant(7)),
            ),
        );
        let result = ConstantFolder::default().transform(expr).unwrap();
        assert_eq!(
            result,
            Expr::lambda(
                ["c"],
                Expr::binary(BinaryOp::Lt, Expr::var("c"), Expr::constant(42))
            )
        );
    }

    #[test]
    fn test_clock_reads_are_not_folded() {
        let expr = Expr::static_member(known::date_time_utc_now());
        let result = ConstantFolder::default().transform(expr.clone()).unwrap();
        assert_eq!(result, expr);
    }

    #[test]
    fn test_failing_subtree_left_in_place() {
        let expr = Expr::binary(BinaryOp::Div, Expr::constant(1), Expr::constant(0));
        let result = ConstantFolder::default().transform(expr.clone()).unwrap();
        assert_eq!(result, expr);
    }
}
