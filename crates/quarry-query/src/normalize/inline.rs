//! Invocation inlining.

use super::ExpressionTransform;
use crate::error::TranslationResult;
use crate::expr::Expr;
use std::collections::HashMap;
use std::sync::Arc;

/// Replaces `(params => body)(args)` with `body[params := args]`.
///
/// The callee is matched after stripping conversion and quote wrappers. A
/// callee that is not a literal lambda of matching arity is left in place and
/// traversed normally.
pub struct InvocationInliner;

impl InvocationInliner {
    fn visit(&self, expr: Expr) -> TranslationResult<Expr> {
        match expr {
            Expr::Invoke { callee, args } => {
                if let Expr::Lambda(lambda) = callee.strip_convert() {
                    if lambda.params.len() == args.len() {
                        let bindings: HashMap<Arc<str>, Expr> =
                            lambda.params.iter().cloned().zip(args).collect();
                        return self.visit(lambda.body.as_ref().clone().substitute(&bindings));
                    }
                }
                Expr::Invoke { callee, args }.map_children(|child| self.visit(child))
            }
            other => other.map_children(|child| self.visit(child)),
        }
    }
}

impl ExpressionTransform for InvocationInliner {
    fn name(&self) -> &'static str {
        "inline_invocations"
    }

    fn transform(&self, expr: Expr) -> TranslationResult<Expr> {
        self.visit(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinaryOp;

    fn add(a: Expr, b: Expr) -> Expr {
        Expr::binary(BinaryOp::Add, a, b)
    }

    #[test]
    fn test_inlines_converted_lambda() {
        let callee = Expr::convert(
            Expr::lambda(["x", "y"], add(Expr::var("x"), Expr::var("y"))),
            "Func",
        );
        let expr = Expr::invoke(callee, vec![Expr::constant(1), Expr::var("z")]);
        let result = InvocationInliner.transform(expr).unwrap();
        assert_eq!(result, add(Expr::constant(1), Expr::var("z")));
    }

    #[test]
    fn test_each_parameter_replaced_at_its_own_sites() {
        // (x, y) => x - y  applied to (y, x) must give y - x
        let callee = Expr::lambda(
            ["x", "y"],
            Expr::binary(BinaryOp::Sub, Expr::var("x"), Expr::var("y")),
        );
        let expr = Expr::invoke(callee, vec![Expr::var("y"), Expr::var("x")]);
        let result = InvocationInliner.transform(expr).unwrap();
        assert_eq!(
            result,
            Expr::binary(BinaryOp::Sub, Expr::var("y"), Expr::var("x"))
        );
    }

    #[test]
    fn test_nested_invocations_are_inlined() {
        let inner = Expr::lambda(["a"], add(Expr::var("a"), Expr::constant(1)));
        let outer = Expr::lambda(["b"], Expr::invoke(inner, vec![Expr::var("b")]));
        let expr = Expr::invoke(outer, vec![Expr::constant(41)]);
        let result = InvocationInliner.transform(expr).unwrap();
        assert_eq!(result, add(Expr::constant(41), Expr::constant(1)));
    }

    #[test]
    fn test_non_lambda_callee_falls_back() {
        let expr = Expr::invoke(Expr::var("f"), vec![Expr::constant(1)]);
        assert_eq!(InvocationInliner.transform(expr.clone()).unwrap(), expr);
    }

    #[test]
    fn test_arity_mismatch_falls_back() {
        let expr = Expr::invoke(
            Expr::lambda(["x"], Expr::var("x")),
            vec![Expr::constant(1), Expr::constant(2)],
        );
        assert_eq!(InvocationInliner.transform(expr.clone()).unwrap(), expr);
    }
}
