//! Tree normalization passes.
//!
//! Each pass is an [`ExpressionTransform`]: it consumes a tree and returns a
//! rewritten one. [`TreeNormalizer`] runs the standard passes in order before
//! parameter extraction; the model builder runs it again on clause
//! expressions as last-chance cleanup.

mod dialect;
mod inline;
mod negation;
mod string_predicate;

pub use dialect::DialectNormalizer;
pub use inline::InvocationInliner;
pub use negation::{invert_op, NegationSimplifier};
pub use string_predicate::StringPredicateRewriter;

use crate::error::TranslationResult;
use crate::expr::Expr;
use tracing::trace;

/// A rewrite over an expression tree.
pub trait ExpressionTransform: Send + Sync {
    /// Name of this transform (for diagnostics)
    fn name(&self) -> &'static str;

    /// Rewrite the tree
    fn transform(&self, expr: Expr) -> TranslationResult<Expr>;
}

/// Ordered pipeline of normalization passes.
pub struct TreeNormalizer {
    passes: Vec<Box<dyn ExpressionTransform>>,
}

impl Default for TreeNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeNormalizer {
    /// Standard pipeline: dialect, inlining, string predicates, negation
    pub fn new() -> Self {
        Self {
            passes: vec![
                Box::new(DialectNormalizer),
                Box::new(InvocationInliner),
                Box::new(StringPredicateRewriter),
                Box::new(NegationSimplifier),
            ],
        }
    }

    /// Pipeline with no passes
    pub fn empty() -> Self {
        Self { passes: Vec::new() }
    }

    /// Append a pass (builder style)
    pub fn with_pass(mut self, pass: impl ExpressionTransform + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }
}

impl ExpressionTransform for TreeNormalizer {
    fn name(&self) -> &'static str {
        "normalize"
    }

    fn transform(&self, expr: Expr) -> TranslationResult<Expr> {
        self.passes.iter().try_fold(expr, |expr, pass| {
            trace!(pass = pass.name(), "running normalization pass");
            pass.transform(expr)
        })
    }
}
