//! Query models.
//!
//! A query model is the structured form of an operator chain: a main source,
//! ordered body clauses, a select expression and ordered result operators.
//! Models and their sources live in a [`QueryModelArena`]; expressions refer
//! to them by id ([`Expr::SourceRef`], [`Expr::SubQuery`]), so subqueries and
//! source chains never form ownership cycles.

mod builder;
mod registry;
mod source;

pub use builder::{BuiltQuery, QueryModelBuilder};
pub use registry::{
    NameNodeTypeProvider, NodeTypeProvider, NodeTypeRegistry, OperatorKind,
    SignatureNodeTypeProvider,
};
pub use source::{QuerySource, QuerySourceKind};

use crate::error::{TranslationError, TranslationResult};
use crate::expr::{Expr, ExpressionPrinter};
use std::sync::Arc;

/// Index of a query source in its arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuerySourceId(pub usize);

/// Index of a query model in its arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub usize);

/// One key of an `orderby` clause
#[derive(Debug, Clone, PartialEq)]
pub struct Ordering {
    pub key: Expr,
    pub descending: bool,
}

/// Clauses between the main source and the select
#[derive(Debug, Clone, PartialEq)]
pub enum BodyClause {
    Where(Expr),
    OrderBy(Vec<Ordering>),
    AdditionalFrom(QuerySourceId),
    Join {
        source: QuerySourceId,
        outer_key: Expr,
        inner_key: Expr,
    },
    GroupJoin {
        source: QuerySourceId,
        outer_key: Expr,
        inner_key: Expr,
    },
}

impl BodyClause {
    pub fn expressions(&self) -> Vec<&Expr> {
        match self {
            Self::Where(predicate) => vec![predicate],
            Self::OrderBy(orderings) => orderings.iter().map(|o| &o.key).collect(),
            Self::AdditionalFrom(_) => Vec::new(),
            Self::Join {
                outer_key,
                inner_key,
                ..
            }
            | Self::GroupJoin {
                outer_key,
                inner_key,
                ..
            } => vec![outer_key, inner_key],
        }
    }

    /// Source introduced by this clause, if any
    pub fn introduced_source(&self) -> Option<QuerySourceId> {
        match self {
            Self::AdditionalFrom(source)
            | Self::Join { source, .. }
            | Self::GroupJoin { source, .. } => Some(*source),
            _ => None,
        }
    }
}

/// An `Include` annotation as it appears in a model, before extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeOperator {
    /// Source the include applies to; the model's main source when `None`
    pub source: Option<QuerySourceId>,
    pub navigation_path: Vec<Arc<str>>,
}

/// Operators applied to the sequence produced by the select
#[derive(Debug, Clone, PartialEq)]
pub enum ResultOperator {
    Take(Expr),
    Skip(Expr),
    First { or_default: bool },
    Single { or_default: bool },
    Last { or_default: bool },
    Count,
    LongCount,
    Any,
    All(Expr),
    Sum,
    Min,
    Max,
    Average,
    Distinct,
    Reverse,
    Concat(Expr),
    Union(Expr),
    Intersect(Expr),
    Except(Expr),
    Contains(Expr),
    GroupBy {
        key: Expr,
        element: Expr,
        /// Source standing for the produced groups
        source: QuerySourceId,
    },
    Cast(Arc<str>),
    OfType(Arc<str>),
    DefaultIfEmpty(Option<Expr>),
    /// `AsTracking` (`true`) / `AsNoTracking` (`false`)
    Tracking(bool),
    Tag(String),
    IgnoreQueryFilters,
    Include(IncludeOperator),
    /// Operator contributed by a registered node-type provider
    Custom { name: Arc<str>, args: Vec<Expr> },
}

impl ResultOperator {
    pub fn name(&self) -> &str {
        match self {
            Self::Take(_) => "Take",
            Self::Skip(_) => "Skip",
            Self::First { or_default: false } => "First",
            Self::First { or_default: true } => "FirstOrDefault",
            Self::Single { or_default: false } => "Single",
            Self::Single { or_default: true } => "SingleOrDefault",
            Self::Last { or_default: false } => "Last",
            Self::Last { or_default: true } => "LastOrDefault",
            Self::Count => "Count",
            Self::LongCount => "LongCount",
            Self::Any => "Any",
            Self::All(_) => "All",
            Self::Sum => "Sum",
            Self::Min => "Min",
            Self::Max => "Max",
            Self::Average => "Average",
            Self::Distinct => "Distinct",
            Self::Reverse => "Reverse",
            Self::Concat(_) => "Concat",
            Self::Union(_) => "Union",
            Self::Intersect(_) => "Intersect",
            Self::Except(_) => "Except",
            Self::Contains(_) => "Contains",
            Self::GroupBy { .. } => "GroupBy",
            Self::Cast(_) => "Cast",
            Self::OfType(_) => "OfType",
            Self::DefaultIfEmpty(_) => "DefaultIfEmpty",
            Self::Tracking(true) => "AsTracking",
            Self::Tracking(false) => "AsNoTracking",
            Self::Tag(_) => "TagWith",
            Self::IgnoreQueryFilters => "IgnoreQueryFilters",
            Self::Include(_) => "Include",
            Self::Custom { name, .. } => name,
        }
    }

    /// Expression operands, in declaration order
    pub fn expressions(&self) -> Vec<&Expr> {
        match self {
            Self::Take(e)
            | Self::Skip(e)
            | Self::All(e)
            | Self::Concat(e)
            | Self::Union(e)
            | Self::Intersect(e)
            | Self::Except(e)
            | Self::Contains(e)
            | Self::DefaultIfEmpty(Some(e)) => vec![e],
            Self::GroupBy { key, element, .. } => vec![key, element],
            Self::Custom { args, .. } => args.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Query-level annotations, removed from the model before execution
    pub fn is_annotation(&self) -> bool {
        matches!(
            self,
            Self::Tracking(_) | Self::Tag(_) | Self::IgnoreQueryFilters | Self::Include(_)
        )
    }

    /// Operators that reduce the sequence to a non-entity scalar
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Count
                | Self::LongCount
                | Self::Any
                | Self::All(_)
                | Self::Sum
                | Self::Min
                | Self::Max
                | Self::Average
                | Self::Contains(_)
        )
    }
}

/// Structured form of one query or subquery.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryModel {
    pub main_from: QuerySourceId,
    pub body_clauses: Vec<BodyClause>,
    pub select: Expr,
    pub result_operators: Vec<ResultOperator>,
}

impl QueryModel {
    /// Model that selects the items of `main_from` unchanged
    pub fn new(main_from: QuerySourceId) -> Self {
        Self {
            main_from,
            body_clauses: Vec::new(),
            select: Expr::SourceRef(main_from),
            result_operators: Vec::new(),
        }
    }

    /// Every clause, select and operator expression of this model
    pub fn expressions(&self) -> Vec<&Expr> {
        let mut all: Vec<&Expr> = self
            .body_clauses
            .iter()
            .flat_map(|c| c.expressions())
            .collect();
        all.push(&self.select);
        all.extend(self.result_operators.iter().flat_map(|op| op.expressions()));
        all
    }

    /// Last result operator that is not an annotation
    pub fn last_operator(&self) -> Option<&ResultOperator> {
        self.result_operators
            .iter()
            .rev()
            .find(|op| !op.is_annotation())
    }

    pub fn has_scalar_result(&self) -> bool {
        self.result_operators.iter().any(ResultOperator::is_scalar)
    }

    /// Sources this model declares: the main source, clause sources and the
    /// group source of a `GroupBy`
    pub fn declared_sources(&self) -> Vec<QuerySourceId> {
        let mut sources = vec![self.main_from];
        sources.extend(self.body_clauses.iter().filter_map(BodyClause::introduced_source));
        sources.extend(self.result_operators.iter().filter_map(|op| match op {
            ResultOperator::GroupBy { source, .. } => Some(*source),
            _ => None,
        }));
        sources
    }
}

/// Owner of all models and sources of one translated query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryModelArena {
    models: Vec<QueryModel>,
    sources: Vec<QuerySource>,
}

impl QueryModelArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(
        &mut self,
        item_name: impl Into<Arc<str>>,
        kind: QuerySourceKind,
        from_expression: Expr,
        item_type: Option<Arc<str>>,
    ) -> QuerySourceId {
        let id = QuerySourceId(self.sources.len());
        self.sources.push(QuerySource {
            id,
            item_name: item_name.into(),
            kind,
            from_expression,
            item_type,
        });
        id
    }

    pub fn source(&self, id: QuerySourceId) -> Option<&QuerySource> {
        self.sources.get(id.0)
    }

    pub fn source_mut(&mut self, id: QuerySourceId) -> Option<&mut QuerySource> {
        self.sources.get_mut(id.0)
    }

    pub fn add_model(&mut self, model: QueryModel) -> ModelId {
        let id = ModelId(self.models.len());
        self.models.push(model);
        id
    }

    pub fn model(&self, id: ModelId) -> TranslationResult<&QueryModel> {
        self.models
            .get(id.0)
            .ok_or(TranslationError::UnknownSubquery(id.0))
    }

    pub fn model_mut(&mut self, id: ModelId) -> TranslationResult<&mut QueryModel> {
        self.models
            .get_mut(id.0)
            .ok_or(TranslationError::UnknownSubquery(id.0))
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn sources(&self) -> impl Iterator<Item = &QuerySource> {
        self.sources.iter()
    }

    /// Every expression reachable from a model without entering subqueries,
    /// including the from-expressions of the sources it declares
    pub fn model_expressions(&self, id: ModelId) -> TranslationResult<Vec<&Expr>> {
        let model = self.model(id)?;
        let mut all = Vec::new();
        for source_id in model.declared_sources() {
            let source = self.source(source_id).ok_or_else(|| {
                TranslationError::internal(format!("unknown query source #{}", source_id.0))
            })?;
            all.push(&source.from_expression);
        }
        all.extend(model.expressions());
        Ok(all)
    }

    /// Subquery models directly referenced by a model, in expression order
    pub fn referenced_subqueries(&self, id: ModelId) -> TranslationResult<Vec<ModelId>> {
        Ok(self
            .model_expressions(id)?
            .into_iter()
            .flat_map(Expr::subqueries)
            .collect())
    }

    /// Source whose items a source re-exposes: the select source of a
    /// subquery (or its trailing group), the source a group result's element
    /// selector reads, or a directly referenced source.
    pub fn underlying_source(&self, id: QuerySourceId) -> Option<QuerySourceId> {
        let source = self.source(id)?;
        self.source_of_expression(&source.from_expression)
    }

    /// Entity type of a source's items, looking through re-exposing sources
    pub fn entity_type_of(&self, id: QuerySourceId) -> Option<Arc<str>> {
        let mut current = Some(id);
        let mut visited = Vec::new();
        while let Some(id) = current {
            if visited.contains(&id) {
                return None;
            }
            visited.push(id);
            let source = self.source(id)?;
            if let Some(item_type) = &source.item_type {
                return Some(item_type.clone());
            }
            if source.kind == QuerySourceKind::GroupResult {
                return None;
            }
            current = self.underlying_source(id);
        }
        None
    }

    fn source_of_expression(&self, expr: &Expr) -> Option<QuerySourceId> {
        match expr.strip_convert() {
            Expr::SourceRef(id) => Some(*id),
            Expr::SubQuery(model) => {
                let model = self.models.get(model.0)?;
                match model.last_operator() {
                    Some(ResultOperator::GroupBy { source, .. }) => Some(*source),
                    _ => match model.select.strip_convert() {
                        Expr::SourceRef(id) => Some(*id),
                        _ => None,
                    },
                }
            }
            _ => None,
        }
    }

    /// Sources whose items are returned as the result of model `root`,
    /// outermost first.
    ///
    /// The chain stops at a group result: items below it are only reachable
    /// inside groups. A projection or scalar result yields an empty chain.
    pub fn result_sources(&self, root: ModelId) -> TranslationResult<Vec<QuerySourceId>> {
        let model = self.model(root)?;
        if model.has_scalar_result() {
            return Ok(Vec::new());
        }
        let mut current = match model.last_operator() {
            Some(ResultOperator::GroupBy { source, .. }) => Some(*source),
            _ => self.source_of_expression(&model.select),
        };

        let mut chain = Vec::new();
        while let Some(id) = current {
            let source = self.source(id).ok_or_else(|| {
                TranslationError::internal(format!("unknown query source #{}", id.0))
            })?;
            if source.kind == QuerySourceKind::GroupResult || chain.contains(&id) {
                break;
            }
            chain.push(id);
            current = self.underlying_source(id);
        }
        Ok(chain)
    }

    /// Check that every model reachable from `root` only references sources
    /// and subqueries present in this arena
    pub fn validate(&self, root: ModelId) -> TranslationResult<()> {
        let mut pending = vec![root];
        let mut seen = Vec::new();
        while let Some(id) = pending.pop() {
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            for expr in self.model_expressions(id)? {
                let dangling = expr.any(|node| match node {
                    Expr::SourceRef(source) => self.source(*source).is_none(),
                    _ => false,
                });
                if dangling {
                    return Err(TranslationError::internal(format!(
                        "model #{} references a source outside its arena",
                        id.0
                    )));
                }
                for sub in expr.subqueries() {
                    self.model(sub)?;
                    pending.push(sub);
                }
            }
        }
        Ok(())
    }

    /// Diagnostic rendering of model `root`; never fails
    pub fn render(&self, root: ModelId) -> String {
        ExpressionPrinter::with_arena(self).print_model(root)
    }
}
