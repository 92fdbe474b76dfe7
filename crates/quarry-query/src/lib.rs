//! Quarry query translation core.
//!
//! Converts a general-purpose expression tree into a normalized, parameterized
//! query model ready for provider-specific lowering, compiles include directives
//! into fixup procedures, and caches compiled queries by structural shape.
//!
//! # Pipeline
//!
//! ```text
//! raw Expr
//!    │
//!    ├── TreeNormalizer        (dialect, inlining, string predicates, negation)
//!    ├── ParameterExtractor    (EvaluabilityOracle + Interpreter)
//!    ├── QueryModelBuilder     (NodeTypeRegistry)
//!    ├── AnnotationExtractor   (-> CompilationContext)
//!    └── IncludeCompiler       (-> IncludePlan, CorrelatedCollectionMetadata)
//!
//! QueryCompiler ties the phases together and memoizes results in a
//! CompiledQueryCache keyed by QueryCacheKey.
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use quarry_query::{Expr, ParameterValues, QueryCompiler, ops};
//!
//! let compiler = QueryCompiler::new(metadata);
//! let query = ops::where_(Expr::entity_query("Customer"), predicate);
//! let mut params = ParameterValues::new();
//! let compiled = compiler.compile(query, &mut params)?;
//! ```

pub mod annotations;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod context;
pub mod error;
pub mod evaluate;
pub mod expr;
pub mod include;
pub mod metadata;
pub mod model;
pub mod normalize;

pub use annotations::AnnotationExtractor;
pub use cache::{CacheStats, CompiledQueryCache, Keyspace, QueryCacheKey, QueryFilterCacheKey};
pub use compiler::{CompiledQuery, QueryCache, QueryCompiler, TranslatedQuery};
pub use config::{QueryTrackingBehavior, TranslationConfig};
pub use context::{AnnotationKind, CompilationContext, QueryAnnotation};
pub use error::{TranslationError, TranslationResult};
pub use evaluate::{
    ClientFunctions, ConstantFolder, EvaluabilityOracle, ExclusionPolicy, Interpreter,
    ParameterBinding, ParameterExtractor, ParameterValueStore, ParameterValues,
};
pub use expr::{
    known, ops, BinaryOp, EnumValue, Expr, ExpressionPrinter, Lambda, MemberRef, MethodRef,
    MethodSignature, Record, StringComparison, UnaryOp, Value,
};
pub use include::{
    is_include_method, AsyncFixupSink, AsyncPlanFixup, CompiledIncludes,
    CorrelatedCollectionMetadata, FixupSink, IncludeCompiler, IncludeFixup, IncludePlan,
    IncludeStep,
};
pub use metadata::{EntityType, MetadataProvider, ModelMetadata, Navigation};
pub use model::{
    BodyClause, BuiltQuery, IncludeOperator, ModelId, NodeTypeProvider, NodeTypeRegistry,
    OperatorKind, QueryModel, QueryModelArena, QueryModelBuilder, QuerySource, QuerySourceId,
    QuerySourceKind, ResultOperator,
};
pub use normalize::{ExpressionTransform, TreeNormalizer};
