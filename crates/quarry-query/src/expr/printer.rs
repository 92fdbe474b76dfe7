//! Human-readable rendering of expression trees and query models.
//!
//! Rendering is diagnostic only and never fails: a broken reference renders as
//! an inline `<rendering failed: ...>` marker and the rest of the output is kept.

use super::{Expr, UnaryOp};
use crate::model::{BodyClause, ModelId, QueryModelArena, QuerySourceId, ResultOperator};

/// Renders expressions, optionally resolving query sources and subqueries
/// against a model arena.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionPrinter<'a> {
    arena: Option<&'a QueryModelArena>,
}

type RenderResult = Result<(), String>;

impl<'a> ExpressionPrinter<'a> {
    pub fn new() -> Self {
        Self { arena: None }
    }

    /// Resolve source references and subqueries through `arena`
    pub fn with_arena(arena: &'a QueryModelArena) -> Self {
        Self { arena: Some(arena) }
    }

    pub fn print(&self, expr: &Expr) -> String {
        let mut out = String::new();
        if let Err(msg) = self.write_expr(&mut out, expr) {
            out.push_str(&format!("<rendering failed: {}>", msg));
        }
        out
    }

    pub fn print_model(&self, id: ModelId) -> String {
        let mut out = String::new();
        if let Err(msg) = self.write_model(&mut out, id) {
            out.push_str(&format!("<rendering failed: {}>", msg));
        }
        out
    }

    fn write_list(&self, out: &mut String, items: &[Expr]) -> RenderResult {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.write_expr(out, item)?;
        }
        Ok(())
    }

    fn write_expr(&self, out: &mut String, expr: &Expr) -> RenderResult {
        match expr {
            Expr::Constant(value) => out.push_str(&value.to_string()),
            Expr::Parameter(name) => {
                out.push('@');
                out.push_str(name);
            }
            Expr::Variable(name) => out.push_str(name),
            Expr::Member { target, member } => {
                match target {
                    Some(t) => self.write_expr(out, t)?,
                    None => out.push_str(&member.owner),
                }
                out.push('.');
                out.push_str(&member.name);
            }
            Expr::Call {
                target,
                method,
                args,
            } => {
                match target {
                    Some(t) => self.write_expr(out, t)?,
                    None => out.push_str(method.owner()),
                }
                out.push('.');
                out.push_str(method.name());
                if !method.generic_args().is_empty() {
                    out.push('<');
                    out.push_str(&method.generic_args().join(", "));
                    out.push('>');
                }
                out.push('(');
                self.write_list(out, args)?;
                out.push(')');
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => {
                    out.push('!');
                    self.write_expr(out, operand)?;
                }
                UnaryOp::Negate => {
                    out.push('-');
                    self.write_expr(out, operand)?;
                }
                UnaryOp::Convert(ty) => {
                    out.push('(');
                    out.push_str(ty);
                    out.push(')');
                    self.write_expr(out, operand)?;
                }
                UnaryOp::Quote => self.write_expr(out, operand)?,
            },
            Expr::Binary { op, left, right } => {
                out.push('(');
                self.write_expr(out, left)?;
                out.push(' ');
                out.push_str(op.symbol());
                out.push(' ');
                self.write_expr(out, right)?;
                out.push(')');
            }
            Expr::Lambda(lambda) => {
                if lambda.params.len() == 1 {
                    out.push_str(&lambda.params[0]);
                } else {
                    out.push('(');
                    out.push_str(&lambda.params.join(", "));
                    out.push(')');
                }
                out.push_str(" => ");
                self.write_expr(out, &lambda.body)?;
            }
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                out.push('(');
                self.write_expr(out, test)?;
                out.push_str(" ? ");
                self.write_expr(out, if_true)?;
                out.push_str(" : ");
                self.write_expr(out, if_false)?;
                out.push(')');
            }
            Expr::Invoke { callee, args } => {
                out.push('(');
                self.write_expr(out, callee)?;
                out.push_str(")(");
                self.write_list(out, args)?;
                out.push(')');
            }
            Expr::Context => out.push_str("context"),
            Expr::EntityQuery(entity) => {
                out.push_str("EntityQueryable<");
                out.push_str(entity);
                out.push('>');
            }
            Expr::SourceRef(id) => match self.arena {
                Some(arena) => {
                    let source = arena
                        .source(*id)
                        .ok_or_else(|| format!("unknown query source #{}", id.0))?;
                    out.push_str(&source.item_name);
                }
                None => out.push_str(&format!("[source#{}]", id.0)),
            },
            Expr::SubQuery(id) => match self.arena {
                Some(_) => {
                    out.push('{');
                    self.write_model(out, *id)?;
                    out.push('}');
                }
                None => out.push_str(&format!("{{subquery#{}}}", id.0)),
            },
        }
        Ok(())
    }

    fn write_model(&self, out: &mut String, id: ModelId) -> RenderResult {
        let arena = self
            .arena
            .ok_or_else(|| "no model arena attached".to_string())?;
        let model = arena.model(id).map_err(|e| e.to_string())?;

        self.write_from(out, "from", model.main_from, arena)?;
        for clause in &model.body_clauses {
            out.push(' ');
            match clause {
                BodyClause::Where(predicate) => {
                    out.push_str("where ");
                    self.write_expr(out, predicate)?;
                }
                BodyClause::OrderBy(orderings) => {
                    out.push_str("orderby ");
                    for (i, ordering) in orderings.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        self.write_expr(out, &ordering.key)?;
                        out.push_str(if ordering.descending { " desc" } else { " asc" });
                    }
                }
                BodyClause::AdditionalFrom(source) => {
                    self.write_from(out, "from", *source, arena)?;
                }
                BodyClause::Join {
                    source,
                    outer_key,
                    inner_key,
                }
                | BodyClause::GroupJoin {
                    source,
                    outer_key,
                    inner_key,
                } => {
                    self.write_from(out, "join", *source, arena)?;
                    out.push_str(" on ");
                    self.write_expr(out, outer_key)?;
                    out.push_str(" equals ");
                    self.write_expr(out, inner_key)?;
                }
            }
        }
        out.push_str(" select ");
        self.write_expr(out, &model.select)?;
        for operator in &model.result_operators {
            out.push_str(" => ");
            self.write_operator(out, operator)?;
        }
        Ok(())
    }

    fn write_from(
        &self,
        out: &mut String,
        keyword: &str,
        id: QuerySourceId,
        arena: &QueryModelArena,
    ) -> RenderResult {
        let source = arena
            .source(id)
            .ok_or_else(|| format!("unknown query source #{}", id.0))?;
        out.push_str(keyword);
        out.push(' ');
        out.push_str(&source.item_name);
        out.push_str(" in ");
        self.write_expr(out, &source.from_expression)
    }

    fn write_operator(&self, out: &mut String, operator: &ResultOperator) -> RenderResult {
        out.push_str(operator.name());
        let args = operator.expressions();
        if let ResultOperator::Tag(tag) = operator {
            out.push_str(&format!("({:?})", tag));
        } else if let ResultOperator::Include(include) = operator {
            out.push('(');
            out.push_str(&include.navigation_path.join("."));
            out.push(')');
        } else if !args.is_empty() {
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                self.write_expr(out, arg)?;
            }
            out.push(')');
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{known, BinaryOp};

    #[test]
    fn test_prints_lambda_and_comparison() {
        let expr = Expr::lambda(
            ["c"],
            Expr::binary(
                BinaryOp::Gt,
                Expr::member(Expr::var("c"), "Customer", "Age"),
                Expr::constant(18),
            ),
        );
        assert_eq!(ExpressionPrinter::new().print(&expr), "c => (c.Age > 18)");
    }

    #[test]
    fn test_prints_static_call_with_generics() {
        let expr = Expr::static_call(
            known::queryable("Take", 2).with_generic_args(["Customer"]),
            vec![Expr::entity_query("Customer"), Expr::parameter("__p_0")],
        );
        assert_eq!(
            expr.to_string(),
            "Queryable.Take<Customer>(EntityQueryable<Customer>, @__p_0)"
        );
    }

    #[test]
    fn test_missing_subquery_renders_inline_error() {
        let arena = QueryModelArena::default();
        let printer = ExpressionPrinter::with_arena(&arena);
        let rendered = printer.print(&Expr::not(Expr::SubQuery(ModelId(7))));
        assert!(rendered.starts_with("!{"));
        assert!(rendered.contains("<rendering failed:"));
    }
}
