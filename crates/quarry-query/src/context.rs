//! Per-compilation state collected from query annotations.

use crate::config::QueryTrackingBehavior;
use crate::model::{ModelId, QuerySourceId};
use std::sync::Arc;

/// A query-level directive taken out of a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationKind {
    /// `AsTracking` (`true`) / `AsNoTracking` (`false`)
    Tracking(bool),
    Tag(String),
    IgnoreQueryFilters,
    Include { navigation_path: Vec<Arc<str>> },
}

/// An annotation bound to the source and model it was declared on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryAnnotation {
    pub kind: AnnotationKind,
    pub source: QuerySourceId,
    pub model: ModelId,
}

impl QueryAnnotation {
    /// Navigation path of an include annotation
    pub fn include_path(&self) -> Option<&[Arc<str>]> {
        match &self.kind {
            AnnotationKind::Include { navigation_path } => Some(navigation_path),
            _ => None,
        }
    }
}

/// Accumulated directives of one query compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilationContext {
    default_tracking: QueryTrackingBehavior,
    tracking: Option<bool>,
    tags: Vec<String>,
    ignore_query_filters: bool,
    annotations: Vec<QueryAnnotation>,
}

impl CompilationContext {
    pub fn new(default_tracking: QueryTrackingBehavior) -> Self {
        Self {
            default_tracking,
            ..Self::default()
        }
    }

    /// Record an annotation; the last tracking directive wins and repeated
    /// tags are kept once
    pub fn add_annotation(&mut self, annotation: QueryAnnotation) {
        match &annotation.kind {
            AnnotationKind::Tracking(tracking) => self.tracking = Some(*tracking),
            AnnotationKind::Tag(tag) => {
                if !self.tags.contains(tag) {
                    self.tags.push(tag.clone());
                }
            }
            AnnotationKind::IgnoreQueryFilters => self.ignore_query_filters = true,
            AnnotationKind::Include { .. } => {}
        }
        self.annotations.push(annotation);
    }

    /// Whether results of this query are tracked
    pub fn is_tracking(&self) -> bool {
        self.tracking
            .unwrap_or_else(|| self.default_tracking.is_tracking())
    }

    /// Explicit tracking directive, if the query carried one
    pub fn tracking_override(&self) -> Option<bool> {
        self.tracking
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn ignore_query_filters(&self) -> bool {
        self.ignore_query_filters
    }

    pub fn annotations(&self) -> &[QueryAnnotation] {
        &self.annotations
    }

    pub fn includes(&self) -> impl Iterator<Item = &QueryAnnotation> {
        self.annotations
            .iter()
            .filter(|a| matches!(a.kind, AnnotationKind::Include { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation(kind: AnnotationKind) -> QueryAnnotation {
        QueryAnnotation {
            kind,
            source: QuerySourceId(0),
            model: ModelId(0),
        }
    }

    #[test]
    fn test_tracking_defaults_to_configuration() {
        assert!(CompilationContext::new(QueryTrackingBehavior::TrackAll).is_tracking());
        assert!(!CompilationContext::new(QueryTrackingBehavior::NoTracking).is_tracking());
    }

    #[test]
    fn test_last_tracking_directive_wins() {
        let mut context = CompilationContext::new(QueryTrackingBehavior::TrackAll);
        context.add_annotation(annotation(AnnotationKind::Tracking(false)));
        context.add_annotation(annotation(AnnotationKind::Tracking(true)));
        assert_eq!(context.tracking_override(), Some(true));
        assert!(context.is_tracking());
    }

    #[test]
    fn test_tags_are_deduplicated_in_order() {
        let mut context = CompilationContext::default();
        for tag in ["b", "a", "b"] {
            context.add_annotation(annotation(AnnotationKind::Tag(tag.to_string())));
        }
        assert_eq!(context.tags(), ["b", "a"]);
        assert_eq!(context.annotations().len(), 3);
    }
}
