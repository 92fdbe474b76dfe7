//! Logical negation simplification.
//!
//! Rules, tried in order on every `!operand`:
//! constant folding, double negation, De Morgan over `&&`/`||`, and
//! comparison inversion. A negation no rule applies to is kept.

use super::ExpressionTransform;
use crate::error::{TranslationError, TranslationResult};
use crate::expr::{BinaryOp, Expr, UnaryOp, Value};

/// Pushes negations inward and removes them where possible.
pub struct NegationSimplifier;

/// Invert a logical or comparison operator.
///
/// Fails with an internal consistency error for any other operator.
pub fn invert_op(op: BinaryOp) -> TranslationResult<BinaryOp> {
    op.invert().ok_or_else(|| {
        TranslationError::internal(format!("cannot invert binary operator '{}'", op.symbol()))
    })
}

impl NegationSimplifier {
    fn visit(&self, expr: Expr) -> TranslationResult<Expr> {
        match expr {
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => self.negate(*operand),
            other => other.map_children(|child| self.visit(child)),
        }
    }

    /// Simplified form of `!operand`
    fn negate(&self, operand: Expr) -> TranslationResult<Expr> {
        match operand {
            Expr::Constant(Value::Bool(b)) => Ok(Expr::constant(!b)),
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => self.visit(*operand),
            Expr::Binary { op, left, right } if op.is_logical() => {
                let inverted = invert_op(op)?;
                Ok(Expr::binary(
                    inverted,
                    self.negate(*left)?,
                    self.negate(*right)?,
                ))
            }
            Expr::Binary { op, left, right } if op.is_comparison() => Ok(Expr::binary(
                invert_op(op)?,
                self.visit(*left)?,
                self.visit(*right)?,
            )),
            other => Ok(Expr::not(self.visit(other)?)),
        }
    }
}

impl ExpressionTransform for NegationSimplifier {
    fn name(&self) -> &'static str {
        "negation"
    }

    fn transform(&self, expr: Expr) -> TranslationResult<Expr> {
        self.visit(expr)
    }
}
