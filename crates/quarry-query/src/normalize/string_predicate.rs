//! Null-safe rewriting of `StartsWith` / `EndsWith` predicates.
//!
//! | input                 | argument            | output                                          |
//! |-----------------------|---------------------|-------------------------------------------------|
//! | `s.StartsWith(a)`     | `""`                | `true`                                          |
//! | `s.StartsWith(a)`     | other constant      | `s != null && a != null && s.StartsWith(a)`     |
//! | `s.StartsWith(a)`     | not constant        | `s != null && a != null && (call \|\| a == "")` |
//! | `!s.StartsWith(a)`    | `""`                | `false`                                         |
//! | `!s.StartsWith(a)`    | other constant      | `s != null && a != null && !call`               |
//! | `!s.StartsWith(a)`    | not constant        | `s != null && a != null && (!call && a != "")`  |
//!
//! `EndsWith` is treated identically.

use super::ExpressionTransform;
use crate::error::TranslationResult;
use crate::expr::{known, Expr, MethodRef, UnaryOp, Value};

/// Guards string prefix/suffix predicates against null operands.
pub struct StringPredicateRewriter;

fn is_string_predicate(method: &MethodRef) -> bool {
    method.is_form_of(known::string_starts_with().definition())
        || method.is_form_of(known::string_ends_with().definition())
}

fn is_empty_string(expr: &Expr) -> bool {
    matches!(expr, Expr::Constant(Value::String(s)) if s.is_empty())
}

impl StringPredicateRewriter {
    fn visit(&self, expr: Expr) -> TranslationResult<Expr> {
        match expr {
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => match *operand {
                Expr::Call {
                    target: Some(subject),
                    method,
                    mut args,
                } if is_string_predicate(&method) && args.len() == 1 => {
                    self.rewrite(*subject, method, args.swap_remove(0), true)
                }
                operand => Ok(Expr::not(self.visit(operand)?)),
            },
            Expr::Call {
                target: Some(subject),
                method,
                mut args,
            } if is_string_predicate(&method) && args.len() == 1 => {
                self.rewrite(*subject, method, args.swap_remove(0), false)
            }
            other => other.map_children(|child| self.visit(child)),
        }
    }

    fn rewrite(
        &self,
        subject: Expr,
        method: MethodRef,
        argument: Expr,
        negated: bool,
    ) -> TranslationResult<Expr> {
        let subject = self.visit(subject)?;
        let argument = self.visit(argument)?;

        if is_empty_string(&argument) {
            return Ok(Expr::constant(!negated));
        }

        let constant_argument = argument.is_constant();
        let call = Expr::call(subject.clone(), method, vec![argument.clone()]);
        let guard = Expr::and(
            Expr::ne(subject, Expr::null()),
            Expr::ne(argument.clone(), Expr::null()),
        );

        let tail = match (negated, constant_argument) {
            (false, true) => call,
            (false, false) => Expr::or(call, Expr::eq(argument, Expr::constant(""))),
            (true, true) => Expr::not(call),
            (true, false) => Expr::and(Expr::not(call), Expr::ne(argument, Expr::constant(""))),
        };

        Ok(Expr::and(guard, tail))
    }
}

impl ExpressionTransform for StringPredicateRewriter {
    fn name(&self) -> &'static str {
        "string_predicates"
    }

    fn transform(&self, expr: Expr) -> TranslationResult<Expr> {
        self.visit(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn name() -> Expr {
        Expr::member(Expr::var("c"), "Customer", "Name")
    }

    fn predicate(method: MethodRef, arg: Expr) -> Expr {
        Expr::call(name(), method, vec![arg])
    }

    #[test_case(known::string_starts_with() ; "starts with")]
    #[test_case(known::string_ends_with() ; "ends with")]
    fn test_empty_argument_folds_to_true(method: MethodRef) {
        let result = StringPredicateRewriter
            .transform(predicate(method, Expr::constant("")))
            .unwrap();
        assert_eq!(result, Expr::constant(true));
    }

    #[test_case(known::string_starts_with() ; "starts with")]
    #[test_case(known::string_ends_with() ; "ends with")]
    fn test_negated_empty_argument_folds_to_false(method: MethodRef) {
        let result = StringPredicateRewriter
            .transform(Expr::not(predicate(method, Expr::constant(""))))
            .unwrap();
        assert_eq!(result, Expr::constant(false));
    }

    #[test]
    fn test_constant_argument_gets_null_guard() {
        let call = predicate(known::string_starts_with(), Expr::constant("ab"));
        let result = StringPredicateRewriter.transform(call.clone()).unwrap();
        let expected = Expr::and(
            Expr::and(
                Expr::ne(name(), Expr::null()),
                Expr::ne(Expr::constant("ab"), Expr::null()),
            ),
            call,
        );
        assert_eq!(result, expected);
    }

    #[test]
    fn test_non_constant_argument_adds_empty_fast_path() {
        let arg = Expr::member(Expr::var("c"), "Customer", "Prefix");
        let call = predicate(known::string_ends_with(), arg.clone());
        let result = StringPredicateRewriter.transform(call.clone()).unwrap();
        let expected = Expr::and(
            Expr::and(
                Expr::ne(name(), Expr::null()),
                Expr::ne(arg.clone(), Expr::null()),
            ),
            Expr::or(call, Expr::eq(arg, Expr::constant(""))),
        );
        assert_eq!(result, expected);
    }

    #[test]
    fn test_negated_non_constant_argument_uses_dual_guard() {
        let arg = Expr::var("p");
        let call = predicate(known::string_starts_with(), arg.clone());
        let result = StringPredicateRewriter
            .transform(Expr::not(call.clone()))
            .unwrap();
        let expected = Expr::and(
            Expr::and(
                Expr::ne(name(), Expr::null()),
                Expr::ne(arg.clone(), Expr::null()),
            ),
            Expr::and(Expr::not(call), Expr::ne(arg, Expr::constant(""))),
        );
        assert_eq!(result, expected);
    }

    #[test]
    fn test_negated_constant_argument() {
        let call = predicate(known::string_starts_with(), Expr::constant("ab"));
        let result = StringPredicateRewriter
            .transform(Expr::not(call.clone()))
            .unwrap();
        let expected = Expr::and(
            Expr::and(
                Expr::ne(name(), Expr::null()),
                Expr::ne(Expr::constant("ab"), Expr::null()),
            ),
            Expr::not(call),
        );
        assert_eq!(result, expected);
    }

    #[test]
    fn test_rewrites_inside_lambda_bodies() {
        let lambda = Expr::lambda(
            ["c"],
            predicate(known::string_starts_with(), Expr::constant("")),
        );
        let result = StringPredicateRewriter.transform(lambda).unwrap();
        assert_eq!(result, Expr::lambda(["c"], Expr::constant(true)));
    }
}
