//! Annotation extraction.
//!
//! Tracking, tag, ignore-filters and include operators are directives for
//! the compilation rather than steps of the query. They are removed from
//! every model of the arena and recorded in the [`CompilationContext`].
//!
//! Models are visited post-order with an explicit worklist, so annotations
//! of the innermost subqueries are recorded first and nesting depth never
//! grows the call stack.

use crate::context::{AnnotationKind, CompilationContext, QueryAnnotation};
use crate::error::TranslationResult;
use crate::model::{ModelId, QueryModelArena, ResultOperator};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationExtractor;

impl AnnotationExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Move the annotations of `root` and every subquery it reaches into
    /// `context`
    pub fn extract(
        &self,
        arena: &mut QueryModelArena,
        root: ModelId,
        context: &mut CompilationContext,
    ) -> TranslationResult<()> {
        let mut worklist = vec![(root, false)];
        let mut visited = HashSet::new();

        while let Some((id, expanded)) = worklist.pop() {
            if expanded {
                self.extract_model(arena, id, context)?;
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            worklist.push((id, true));
            let children = arena.referenced_subqueries(id)?;
            worklist.extend(children.into_iter().rev().map(|child| (child, false)));
        }
        Ok(())
    }

    fn extract_model(
        &self,
        arena: &mut QueryModelArena,
        id: ModelId,
        context: &mut CompilationContext,
    ) -> TranslationResult<()> {
        let model = arena.model_mut(id)?;
        let main_from = model.main_from;
        let operators = std::mem::take(&mut model.result_operators);

        for operator in operators {
            let (kind, source) = match operator {
                ResultOperator::Tracking(tracking) => {
                    (AnnotationKind::Tracking(tracking), main_from)
                }
                ResultOperator::Tag(tag) => (AnnotationKind::Tag(tag), main_from),
                ResultOperator::IgnoreQueryFilters => {
                    (AnnotationKind::IgnoreQueryFilters, main_from)
                }
                ResultOperator::Include(include) => (
                    AnnotationKind::Include {
                        navigation_path: include.navigation_path,
                    },
                    include.source.unwrap_or(main_from),
                ),
                other => {
                    model.result_operators.push(other);
                    continue;
                }
            };
            debug!(
                model = id.0,
                source = source.0,
                annotation = ?kind,
                "extracted query annotation"
            );
            context.add_annotation(QueryAnnotation {
                kind,
                source,
                model: id,
            });
        }
        Ok(())
    }
}
