//! Entity metadata used to bind include paths.

use std::collections::HashMap;
use std::sync::Arc;

/// A navigation property between two entity types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Navigation {
    pub name: Arc<str>,
    /// Entity type on the other end
    pub target: Arc<str>,
    pub is_collection: bool,
    /// `true` when the declaring entity holds the foreign key
    pub is_dependent_to_principal: bool,
    pub inverse: Option<Arc<str>>,
}

impl Navigation {
    /// Navigation to a single related entity
    pub fn reference(name: impl Into<Arc<str>>, target: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            is_collection: false,
            is_dependent_to_principal: true,
            inverse: None,
        }
    }

    /// Navigation to a set of dependent entities
    pub fn collection(name: impl Into<Arc<str>>, target: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            is_collection: true,
            is_dependent_to_principal: false,
            inverse: None,
        }
    }

    /// Mark a reference navigation as pointing from principal to dependent
    pub fn principal_to_dependent(mut self) -> Self {
        self.is_dependent_to_principal = false;
        self
    }

    pub fn with_inverse(mut self, inverse: impl Into<Arc<str>>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
    pub name: Arc<str>,
    pub navigations: Vec<Navigation>,
}

impl EntityType {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            navigations: Vec::new(),
        }
    }

    pub fn with_navigation(mut self, navigation: Navigation) -> Self {
        self.navigations.push(navigation);
        self
    }

    pub fn find_navigation(&self, name: &str) -> Option<&Navigation> {
        self.navigations.iter().find(|n| &*n.name == name)
    }
}

/// Source of entity type metadata
pub trait MetadataProvider: Send + Sync {
    fn find_entity_type(&self, name: &str) -> Option<Arc<EntityType>>;
}

/// In-memory metadata model.
#[derive(Debug, Clone, Default)]
pub struct ModelMetadata {
    entity_types: HashMap<Arc<str>, Arc<EntityType>>,
}

impl ModelMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: EntityType) -> Self {
        self.add_entity(entity);
        self
    }

    pub fn add_entity(&mut self, entity: EntityType) -> Arc<EntityType> {
        let entity = Arc::new(entity);
        self.entity_types
            .insert(entity.name.clone(), Arc::clone(&entity));
        entity
    }

    pub fn len(&self) -> usize {
        self.entity_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_types.is_empty()
    }
}

impl MetadataProvider for ModelMetadata {
    fn find_entity_type(&self, name: &str) -> Option<Arc<EntityType>> {
        self.entity_types.get(name).cloned()
    }
}
