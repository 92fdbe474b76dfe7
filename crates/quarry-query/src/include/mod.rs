//! Include compilation.
//!
//! Turns the include annotations of a compilation into per-source
//! [`IncludePlan`]s: the ordered steps that attach eagerly loaded related
//! entities to each materialized result entity. Collection navigations also
//! produce [`CorrelatedCollectionMetadata`] for the collection loader.

mod fixup;

pub use fixup::{is_include_method, AsyncFixupSink, AsyncPlanFixup, FixupSink, IncludeFixup};

use crate::context::CompilationContext;
use crate::error::{TranslationError, TranslationResult};
use crate::metadata::{MetadataProvider, Navigation};
use crate::model::{ModelId, QueryModelArena, QuerySourceId};
use std::sync::Arc;
use tracing::{debug, warn};

/// Metadata for one correlated collection load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelatedCollectionMetadata {
    pub id: usize,
    pub tracking: bool,
    /// First navigation of the include path, leaving the root entity
    pub first_navigation: Navigation,
    /// The collection navigation itself
    pub last_navigation: Navigation,
    pub query_source: QuerySourceId,
}

/// One action of an include plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncludeStep {
    /// Start tracking the root entity before related entities are attached
    StartTracking,
    /// Attach the pre-loaded entity in `included[slot]`
    Reference {
        path: Vec<Arc<str>>,
        navigation: Navigation,
        slot: usize,
    },
    /// Load the correlated collection `collection_id`
    Collection {
        path: Vec<Arc<str>>,
        navigation: Navigation,
        collection_id: usize,
    },
}

impl IncludeStep {
    pub fn path(&self) -> &[Arc<str>] {
        match self {
            Self::StartTracking => &[],
            Self::Reference { path, .. } | Self::Collection { path, .. } => path,
        }
    }
}

/// Include steps for the entities produced by one query source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludePlan {
    pub source: QuerySourceId,
    pub entity_type: Arc<str>,
    pub steps: Vec<IncludeStep>,
}

impl IncludePlan {
    /// Number of pre-loaded reference entities the fixup expects
    pub fn reference_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, IncludeStep::Reference { .. }))
            .count()
    }
}

/// A bound include path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeSpecification {
    pub source: QuerySourceId,
    pub model: ModelId,
    pub entity_type: Arc<str>,
    pub navigations: Vec<Navigation>,
}

impl IncludeSpecification {
    fn has_collection(&self) -> bool {
        self.navigations.iter().any(|n| n.is_collection)
    }

    fn has_dependent_to_principal(&self) -> bool {
        self.navigations.iter().any(|n| n.is_dependent_to_principal)
    }

    /// Only the last navigation may be a collection
    fn is_supported(&self) -> bool {
        match self.navigations.split_last() {
            Some((_, references)) => references.iter().all(|n| !n.is_collection),
            None => false,
        }
    }

    fn display_path(&self) -> String {
        self.navigations
            .iter()
            .map(|n| n.name.as_ref())
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Output of include compilation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledIncludes {
    pub plans: Vec<IncludePlan>,
    pub collections: Vec<CorrelatedCollectionMetadata>,
}

impl CompiledIncludes {
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn plan_for(&self, source: QuerySourceId) -> Option<&IncludePlan> {
        self.plans.iter().find(|p| p.source == source)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeCompiler;

impl IncludeCompiler {
    pub fn new() -> Self {
        Self
    }

    pub fn compile(
        &self,
        arena: &QueryModelArena,
        root: ModelId,
        context: &CompilationContext,
        metadata: &dyn MetadataProvider,
    ) -> TranslationResult<CompiledIncludes> {
        if context.includes().next().is_none() {
            return Ok(CompiledIncludes::default());
        }
        if arena.model(root)?.has_scalar_result() {
            debug!("query returns a scalar, includes not applied");
            return Ok(CompiledIncludes::default());
        }

        let result_sources = arena.result_sources(root)?;
        let mut specifications = Vec::new();
        for annotation in context.includes() {
            let Some(path) = annotation.include_path() else {
                continue;
            };
            if !result_sources.contains(&annotation.source) {
                warn!(
                    event = "include_ignored",
                    path = %path.join("."),
                    "include ignored because its source is not part of the query result"
                );
                continue;
            }
            let specification =
                self.bind(arena, annotation.source, annotation.model, path, metadata)?;
            if !specification.is_supported() {
                debug!(
                    path = %specification.display_path(),
                    "include through a collection left to the collection loader"
                );
                continue;
            }
            specifications.push(specification);
        }

        // Collections first, then principal-to-dependent before dependent-to-principal
        specifications.sort_by_key(|s| (!s.has_collection(), s.has_dependent_to_principal()));

        let tracking = context.is_tracking();
        let mut compiled = CompiledIncludes::default();
        for specification in specifications {
            let position = compiled
                .plans
                .iter()
                .position(|p| p.source == specification.source);
            let index = match position {
                Some(index) => index,
                None => {
                    compiled.plans.push(IncludePlan {
                        source: specification.source,
                        entity_type: specification.entity_type.clone(),
                        steps: if tracking {
                            vec![IncludeStep::StartTracking]
                        } else {
                            Vec::new()
                        },
                    });
                    compiled.plans.len() - 1
                }
            };
            let plan = &mut compiled.plans[index];

            let mut path = Vec::with_capacity(specification.navigations.len());
            for navigation in &specification.navigations {
                path.push(navigation.name.clone());
                if plan.steps.iter().any(|s| s.path() == path.as_slice()) {
                    continue;
                }
                debug!(path = %path.join("."), "including navigation");
                let step = if navigation.is_collection {
                    let collection_id = compiled.collections.len();
                    compiled.collections.push(CorrelatedCollectionMetadata {
                        id: collection_id,
                        tracking,
                        first_navigation: specification.navigations[0].clone(),
                        last_navigation: navigation.clone(),
                        query_source: specification.source,
                    });
                    IncludeStep::Collection {
                        path: path.clone(),
                        navigation: navigation.clone(),
                        collection_id,
                    }
                } else {
                    IncludeStep::Reference {
                        path: path.clone(),
                        navigation: navigation.clone(),
                        slot: plan.reference_count(),
                    }
                };
                plan.steps.push(step);
            }
        }
        Ok(compiled)
    }

    fn bind(
        &self,
        arena: &QueryModelArena,
        source: QuerySourceId,
        model: ModelId,
        path: &[Arc<str>],
        metadata: &dyn MetadataProvider,
    ) -> TranslationResult<IncludeSpecification> {
        let not_bindable = || TranslationError::IncludeNotBindable {
            path: path.join("."),
        };
        let entity_type = arena.entity_type_of(source).ok_or_else(not_bindable)?;
        let mut current = metadata
            .find_entity_type(&entity_type)
            .ok_or_else(not_bindable)?;

        let mut navigations = Vec::with_capacity(path.len());
        for name in path {
            let navigation = current.find_navigation(name).cloned().ok_or_else(not_bindable)?;
            current = metadata
                .find_entity_type(&navigation.target)
                .ok_or_else(not_bindable)?;
            navigations.push(navigation);
        }
        if navigations.is_empty() {
            return Err(not_bindable());
        }

        Ok(IncludeSpecification {
            source,
            model,
            entity_type,
            navigations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::AnnotationExtractor;
    use crate::config::QueryTrackingBehavior;
    use crate::expr::{ops, Expr};
    use crate::metadata::{EntityType, ModelMetadata};
    use crate::model::QueryModelBuilder;
    use tracing_test::traced_test;

    fn metadata() -> ModelMetadata {
        ModelMetadata::new()
            .with_entity(
                EntityType::new("Customer")
                    .with_navigation(
                        Navigation::collection("Orders", "Order").with_inverse("Customer"),
                    )
                    .with_navigation(
                        Navigation::reference("Address", "Address").principal_to_dependent(),
                    ),
            )
            .with_entity(
                EntityType::new("Order")
                    .with_navigation(
                        Navigation::reference("Customer", "Customer").with_inverse("Orders"),
                    )
                    .with_navigation(Navigation::collection("Lines", "OrderLine")),
            )
            .with_entity(EntityType::new("OrderLine"))
            .with_entity(EntityType::new("Address"))
    }

    fn nav(entity_param: &str, owner: &str, name: &str) -> Expr {
        Expr::lambda([entity_param], Expr::member(Expr::var(entity_param), owner, name))
    }

    fn compile_with(
        query: Expr,
        tracking: QueryTrackingBehavior,
    ) -> TranslationResult<CompiledIncludes> {
        let built = QueryModelBuilder::default().build(query)?;
        let mut arena = built.arena;
        let mut context = CompilationContext::new(tracking);
        AnnotationExtractor::new().extract(&mut arena, built.root, &mut context)?;
        IncludeCompiler::new().compile(&arena, built.root, &context, &metadata())
    }

    fn compile(query: Expr) -> TranslationResult<CompiledIncludes> {
        compile_with(query, QueryTrackingBehavior::TrackAll)
    }

    #[test]
    fn test_collection_include_emits_metadata() {
        let query = ops::include(Expr::entity_query("Customer"), nav("c", "Customer", "Orders"));
        let compiled = compile(query).unwrap();
        assert_eq!(compiled.plans.len(), 1);
        assert_eq!(compiled.collections.len(), 1);
        let collection = &compiled.collections[0];
        assert_eq!(collection.id, 0);
        assert!(collection.tracking);
        assert_eq!(&*collection.last_navigation.name, "Orders");
        assert_eq!(collection.query_source, compiled.plans[0].source);
        assert_eq!(compiled.plans[0].steps[0], IncludeStep::StartTracking);
    }

    #[test]
    fn test_reference_chain_gets_slots() {
        let query = ops::then_include(
            ops::include(Expr::entity_query("Order"), nav("o", "Order", "Customer")),
            nav("c", "Customer", "Address"),
        );
        let compiled = compile_with(query, QueryTrackingBehavior::NoTracking).unwrap();
        let plan = &compiled.plans[0];
        assert_eq!(plan.entity_type.as_ref(), "Order");
        let slots: Vec<_> = plan
            .steps
            .iter()
            .map(|s| match s {
                IncludeStep::Reference { slot, .. } => *slot,
                other => panic!("unexpected step {:?}", other),
            })
            .collect();
        assert_eq!(slots, vec![0, 1]);
        assert!(compiled.collections.is_empty());
    }

    #[test]
    fn test_collections_ordered_before_references() {
        let query = ops::include(
            ops::include(Expr::entity_query("Customer"), nav("c", "Customer", "Address")),
            nav("c", "Customer", "Orders"),
        );
        let compiled = compile(query).unwrap();
        let names: Vec<_> = compiled.plans[0]
            .steps
            .iter()
            .filter_map(|s| s.path().last().cloned())
            .collect();
        assert_eq!(names, vec![Arc::<str>::from("Orders"), Arc::from("Address")]);
    }

    #[test]
    fn test_unknown_navigation_is_not_bindable() {
        let query = ops::include_path(Expr::entity_query("Customer"), "Orders.Invoices");
        assert_eq!(
            compile(query).unwrap_err(),
            TranslationError::IncludeNotBindable {
                path: "Orders.Invoices".to_string()
            }
        );
    }

    #[test]
    fn test_scalar_result_skips_includes() {
        let query = ops::count(ops::include(
            Expr::entity_query("Customer"),
            nav("c", "Customer", "Orders"),
        ));
        assert!(compile(query).unwrap().is_empty());
    }

    #[test]
    fn test_nested_collection_left_to_loader() {
        let query = ops::include_path(Expr::entity_query("Customer"), "Orders.Lines");
        assert!(compile(query).unwrap().is_empty());
    }

    #[test]
    #[traced_test]
    fn test_projected_include_is_ignored_with_warning() {
        let query = ops::select(
            ops::include(Expr::entity_query("Customer"), nav("c", "Customer", "Orders")),
            nav("c", "Customer", "Address"),
        );
        let compiled = compile(query).unwrap();
        assert!(compiled.is_empty());
        assert!(logs_contain("include_ignored"));
    }
}
