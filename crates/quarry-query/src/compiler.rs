//! Query compilation pipeline.
//!
//! ```text
//! Expr ─ normalize ─ extract parameters ─┬─ cache hit ───────────────────────────┐
//!                                        └─ build ─ annotations ─ includes ─ store ┴─ Arc<CompiledQuery>
//! ```

use crate::annotations::AnnotationExtractor;
use crate::cache::{CompiledQueryCache, Keyspace, QueryCacheKey};
use crate::config::TranslationConfig;
use crate::context::CompilationContext;
use crate::error::TranslationResult;
use crate::evaluate::{EvaluabilityOracle, Interpreter, ParameterExtractor, ParameterValues};
use crate::expr::{Expr, Value};
use crate::include::{CompiledIncludes, CorrelatedCollectionMetadata, IncludeCompiler};
use crate::metadata::MetadataProvider;
use crate::model::{ModelId, NodeTypeRegistry, QueryModelArena, QueryModelBuilder};
use crate::normalize::{ExpressionTransform, TreeNormalizer};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A query ready for provider-specific lowering
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedQuery {
    pub arena: QueryModelArena,
    pub root: ModelId,
    pub context: CompilationContext,
    pub includes: CompiledIncludes,
}

impl TranslatedQuery {
    pub fn correlated_collections(&self) -> &[CorrelatedCollectionMetadata] {
        &self.includes.collections
    }

    pub fn render(&self) -> String {
        self.arena.render(self.root)
    }
}

/// Cached compilation result
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub query: TranslatedQuery,
    pub keyspace: Keyspace,
}

pub type QueryCache = CompiledQueryCache<QueryCacheKey, Arc<CompiledQuery>>;

/// Runs the translation phases and memoizes compiled queries.
pub struct QueryCompiler {
    config: TranslationConfig,
    normalizer: TreeNormalizer,
    extractor: ParameterExtractor,
    builder: QueryModelBuilder,
    annotations: AnnotationExtractor,
    includes: IncludeCompiler,
    metadata: Arc<dyn MetadataProvider>,
    cache: Arc<QueryCache>,
}

impl fmt::Debug for QueryCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCompiler")
            .field("config", &self.config)
            .field("builder", &self.builder)
            .field("cache", &self.cache)
            .finish()
    }
}

impl QueryCompiler {
    pub fn new(metadata: Arc<dyn MetadataProvider>) -> Self {
        Self::with_config(metadata, TranslationConfig::default())
    }

    pub fn with_config(metadata: Arc<dyn MetadataProvider>, config: TranslationConfig) -> Self {
        let registry = Arc::new(NodeTypeRegistry::new());
        Self {
            normalizer: TreeNormalizer::new(),
            extractor: ParameterExtractor::default().with_config(&config),
            builder: QueryModelBuilder::with_config(registry, &config),
            annotations: AnnotationExtractor::new(),
            includes: IncludeCompiler::new(),
            metadata,
            cache: Arc::new(QueryCache::new()),
            config,
        }
    }

    /// Use a shared node-type registry
    pub fn with_registry(mut self, registry: Arc<NodeTypeRegistry>) -> Self {
        self.builder = QueryModelBuilder::with_config(registry, &self.config);
        self
    }

    /// Share a compiled query cache between compilers
    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Evaluate `Context` references against `context` during extraction
    pub fn with_context(mut self, context: Value) -> Self {
        self.extractor = ParameterExtractor::new(
            EvaluabilityOracle::default(),
            Interpreter::default().with_context(context),
        )
        .with_config(&self.config);
        self
    }

    /// Replace the parameter extractor
    pub fn with_extractor(mut self, extractor: ParameterExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &TranslationConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<NodeTypeRegistry> {
        self.builder.registry()
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Compile `expr` for synchronous execution; captured values land in
    /// `parameters`
    pub fn compile(
        &self,
        expr: Expr,
        parameters: &mut ParameterValues,
    ) -> TranslationResult<Arc<CompiledQuery>> {
        self.compile_in(Keyspace::Sync, expr, parameters)
    }

    /// Compile `expr` for asynchronous execution
    pub fn compile_async(
        &self,
        expr: Expr,
        parameters: &mut ParameterValues,
    ) -> TranslationResult<Arc<CompiledQuery>> {
        self.compile_in(Keyspace::Async, expr, parameters)
    }

    fn compile_in(
        &self,
        keyspace: Keyspace,
        expr: Expr,
        parameters: &mut ParameterValues,
    ) -> TranslationResult<Arc<CompiledQuery>> {
        let shape = self.prepare(expr, parameters)?;
        let key = QueryCacheKey::new(
            shape.clone(),
            self.config.default_tracking,
            keyspace == Keyspace::Async,
        );
        self.cache.try_get_or_add(keyspace, key, || {
            let query = self.translate(shape)?;
            Ok(Arc::new(CompiledQuery { query, keyspace }))
        })
    }

    /// Normalize and extract parameters; the result is the cache shape
    pub fn prepare(&self, expr: Expr, parameters: &mut ParameterValues) -> TranslationResult<Expr> {
        let expr = self.normalizer.transform(expr)?;
        self.extractor.extract(expr, parameters)
    }

    /// Translate a prepared tree without consulting the cache
    pub fn translate(&self, shape: Expr) -> TranslationResult<TranslatedQuery> {
        let built = self.builder.build(shape)?;
        let mut arena = built.arena;
        let root = built.root;

        let mut context = CompilationContext::new(self.config.default_tracking);
        self.annotations.extract(&mut arena, root, &mut context)?;
        let includes = self
            .includes
            .compile(&arena, root, &context, self.metadata.as_ref())?;

        debug!(
            models = arena.model_count(),
            annotations = context.annotations().len(),
            include_plans = includes.plans.len(),
            "translated query"
        );
        Ok(TranslatedQuery {
            arena,
            root,
            context,
            includes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{ops, BinaryOp, Record};
    use crate::metadata::{EntityType, ModelMetadata, Navigation};

    fn metadata() -> Arc<dyn MetadataProvider> {
        Arc::new(
            ModelMetadata::new()
                .with_entity(
                    EntityType::new("Customer")
                        .with_navigation(Navigation::collection("Orders", "Order")),
                )
                .with_entity(EntityType::new("Order")),
        )
    }

    fn adults(min_age: i64) -> Expr {
        // closure.minAge captured from the caller
        let closure = Expr::constant(Value::record(
            Record::new("<>c__DisplayClass0_0").with_field("minAge", min_age),
        ));
        ops::where_(
            Expr::entity_query("Customer"),
            Expr::lambda(
                ["c"],
                Expr::binary(
                    BinaryOp::Ge,
                    Expr::member(Expr::var("c"), "Customer", "Age"),
                    Expr::member(closure, "<>c__DisplayClass0_0", "minAge"),
                ),
            ),
        )
    }

    #[test]
    fn test_captured_values_share_cache_entry() {
        let compiler = QueryCompiler::new(metadata());
        let mut first = ParameterValues::new();
        let mut second = ParameterValues::new();

        let a = compiler.compile(adults(18), &mut first).unwrap();
        let b = compiler.compile(adults(21), &mut second).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(first.value("__minAge_0"), Some(&Value::Int(18)));
        assert_eq!(second.value("__minAge_0"), Some(&Value::Int(21)));
        assert_eq!(compiler.cache().stats().misses, 1);
    }

    #[test]
    fn test_sync_and_async_compile_separately() {
        let compiler = QueryCompiler::new(metadata());
        let sync = compiler.compile(adults(18), &mut ParameterValues::new()).unwrap();
        let async_query = compiler
            .compile_async(adults(18), &mut ParameterValues::new())
            .unwrap();
        assert!(!Arc::ptr_eq(&sync, &async_query));
        assert_eq!(async_query.keyspace, Keyspace::Async);
        assert_eq!(compiler.cache().len(), 2);
    }

    #[test]
    fn test_translation_collects_annotations_and_includes() {
        let compiler = QueryCompiler::new(metadata());
        let query = ops::tag_with(
            ops::include(
                ops::as_no_tracking(Expr::entity_query("Customer")),
                Expr::lambda(["c"], Expr::member(Expr::var("c"), "Customer", "Orders")),
            ),
            Expr::constant("customers with orders"),
        );
        let compiled = compiler.compile(query, &mut ParameterValues::new()).unwrap();
        let translated = &compiled.query;

        assert!(!translated.context.is_tracking());
        assert_eq!(translated.context.tags(), ["customers with orders"]);
        assert_eq!(translated.correlated_collections().len(), 1);
        assert!(!translated.correlated_collections()[0].tracking);
        assert_eq!(translated.render(), "from c in EntityQueryable<Customer> select c");
    }

    #[test]
    fn test_errors_are_not_cached() {
        let compiler = QueryCompiler::new(metadata());
        let query = ops::include_path(Expr::entity_query("Customer"), "Invoices");
        assert!(compiler.compile(query.clone(), &mut ParameterValues::new()).is_err());
        assert!(compiler.compile(query, &mut ParameterValues::new()).is_err());
        assert_eq!(compiler.cache().stats().misses, 0);
    }
}
