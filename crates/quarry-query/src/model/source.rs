//! Query sources.

use super::QuerySourceId;
use crate::expr::Expr;
use std::sync::Arc;

/// How a source entered its query model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuerySourceKind {
    MainFrom,
    AdditionalFrom,
    Join,
    GroupJoin,
    /// Items produced by a trailing `GroupBy`; the from-expression is the
    /// element selector
    GroupResult,
}

/// A named sequence that clause expressions refer to through
/// [`Expr::SourceRef`].
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySource {
    pub id: QuerySourceId,
    pub item_name: Arc<str>,
    pub kind: QuerySourceKind,
    pub from_expression: Expr,
    /// Entity type of the items when the source enumerates entities directly
    pub item_type: Option<Arc<str>>,
}

impl QuerySource {
    pub fn item_name(&self) -> &str {
        &self.item_name
    }

    pub fn from_expression(&self) -> &Expr {
        &self.from_expression
    }

    /// Source this one was directly created from, if its from-expression is
    /// a bare reference to another source
    pub fn referenced_source(&self) -> Option<QuerySourceId> {
        match self.from_expression.strip_convert() {
            Expr::SourceRef(id) => Some(*id),
            _ => None,
        }
    }
}
