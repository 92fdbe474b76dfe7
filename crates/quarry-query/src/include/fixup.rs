//! Include fixup procedures.
//!
//! [`IncludeFixup`] is what materialization code calls for every root
//! entity; the delegates built from an [`IncludePlan`] do the actual
//! attaching through a sink owned by the change tracker / state manager.

use super::{IncludePlan, IncludeStep};
use crate::error::{TranslationError, TranslationResult};
use crate::expr::{known, MethodRef};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Whether `method` is any closed form of the sync or async include method
pub fn is_include_method(method: &MethodRef) -> bool {
    known::include_definitions()
        .iter()
        .any(|definition| method.is_form_of(definition))
}

/// Receiver of synchronous include fixups
pub trait FixupSink<E> {
    fn start_tracking(&self, entity: &E);

    /// Attach `related` (absent when nothing was loaded) at `path`
    fn set_reference(&self, entity: &E, path: &[Arc<str>], related: Option<&E>);

    fn load_collection(&self, entity: &E, path: &[Arc<str>], collection_id: usize);
}

/// Receiver of asynchronous include fixups
#[async_trait]
pub trait AsyncFixupSink<E: Send + Sync>: Send + Sync {
    async fn start_tracking(&self, entity: &E) -> TranslationResult<()>;

    async fn set_reference(
        &self,
        entity: &E,
        path: &[Arc<str>],
        related: Option<&E>,
    ) -> TranslationResult<()>;

    async fn load_collection(
        &self,
        entity: &E,
        path: &[Arc<str>],
        collection_id: usize,
        cancel: &CancellationToken,
    ) -> TranslationResult<()>;
}

/// Entry points woven into materialization code.
pub struct IncludeFixup;

impl IncludeFixup {
    /// Run `fixup` for a non-null entity and hand the entity back unchanged
    pub fn include<E, F>(entity: Option<E>, included: &[Option<E>], fixup: F) -> Option<E>
    where
        F: FnOnce(&E, &[Option<E>]),
    {
        if let Some(entity) = &entity {
            fixup(entity, included);
        }
        entity
    }

    /// Async form of [`IncludeFixup::include`].
    ///
    /// A null entity is returned as is. Otherwise fails with
    /// [`TranslationError::Cancelled`] when `cancel` has already fired, or
    /// awaits `fixup` (which takes the entity and returns it).
    pub async fn include_async<'a, E, F, Fut>(
        entity: Option<E>,
        included: &'a [Option<E>],
        fixup: F,
        cancel: &'a CancellationToken,
    ) -> TranslationResult<Option<E>>
    where
        F: FnOnce(E, &'a [Option<E>], &'a CancellationToken) -> Fut,
        Fut: Future<Output = TranslationResult<E>>,
    {
        match entity {
            Some(_) if cancel.is_cancelled() => Err(TranslationError::Cancelled),
            Some(entity) => Ok(Some(fixup(entity, included, cancel).await?)),
            None => Ok(None),
        }
    }
}

impl IncludePlan {
    /// Synchronous fixup delegate applying this plan through `sink`
    pub fn fixup_delegate<'p, E, S>(&'p self, sink: &'p S) -> impl Fn(&E, &[Option<E>]) + 'p
    where
        S: FixupSink<E> + ?Sized,
    {
        move |entity: &E, included: &[Option<E>]| {
            for step in &self.steps {
                match step {
                    IncludeStep::StartTracking => sink.start_tracking(entity),
                    IncludeStep::Reference { path, slot, .. } => {
                        let related = included.get(*slot).and_then(Option::as_ref);
                        sink.set_reference(entity, path, related)
                    }
                    IncludeStep::Collection {
                        path,
                        collection_id,
                        ..
                    } => sink.load_collection(entity, path, *collection_id),
                }
            }
        }
    }

    /// Asynchronous fixup delegate applying this plan through `sink`
    pub fn async_fixup_delegate<'p, S: ?Sized>(&'p self, sink: &'p S) -> AsyncPlanFixup<'p, S> {
        AsyncPlanFixup { plan: self, sink }
    }
}

/// Asynchronous application of an include plan.
pub struct AsyncPlanFixup<'p, S: ?Sized> {
    plan: &'p IncludePlan,
    sink: &'p S,
}

impl<S: ?Sized> AsyncPlanFixup<'_, S> {
    /// Apply every step to `entity`, checking `cancel` between steps
    pub async fn fixup<E>(
        &self,
        entity: E,
        included: &[Option<E>],
        cancel: &CancellationToken,
    ) -> TranslationResult<E>
    where
        E: Send + Sync,
        S: AsyncFixupSink<E>,
    {
        for step in &self.plan.steps {
            if cancel.is_cancelled() {
                return Err(TranslationError::Cancelled);
            }
            match step {
                IncludeStep::StartTracking => self.sink.start_tracking(&entity).await?,
                IncludeStep::Reference { path, slot, .. } => {
                    let related = included.get(*slot).and_then(Option::as_ref);
                    self.sink.set_reference(&entity, path, related).await?
                }
                IncludeStep::Collection {
                    path,
                    collection_id,
                    ..
                } => {
                    self.sink
                        .load_collection(&entity, path, *collection_id, cancel)
                        .await?
                }
            }
        }
        Ok(entity)
    }
}
