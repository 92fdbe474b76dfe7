//! Node-type registry.
//!
//! Maps operator call sites to [`OperatorKind`]s. The registry is a list of
//! [`NodeTypeProvider`]s sorted by priority; the first provider that knows a
//! method decides its kind.
//!
//! Readers work on an immutable snapshot of the provider list. Writers
//! serialize on a mutex, build a new list and swap it in, so a lookup never
//! observes a half-built list and never waits for a writer to finish sorting.

use crate::expr::{known, MethodRef, MethodSignature};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// What the model builder does with a recognized operator call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    Where,
    Select,
    SelectMany,
    Join,
    GroupJoin,
    OrderBy,
    OrderByDescending,
    ThenBy,
    ThenByDescending,
    GroupBy,
    Take,
    Skip,
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
    Last,
    LastOrDefault,
    Count,
    LongCount,
    Any,
    All,
    Sum,
    Min,
    Max,
    Average,
    Distinct,
    Reverse,
    Concat,
    Union,
    Intersect,
    Except,
    Contains,
    Cast,
    OfType,
    DefaultIfEmpty,
    AsTracking,
    AsNoTracking,
    TagWith,
    IgnoreQueryFilters,
    Include,
    StringInclude,
    ThenInclude,
    /// Extension operator kept as an opaque result operator
    Custom(Arc<str>),
}

impl OperatorKind {
    /// Standard query operators and the arities (including the source
    /// argument) they are defined for
    const STANDARD: &'static [(&'static str, &'static [usize])] = &[
        ("Where", &[2]),
        ("Select", &[2]),
        ("SelectMany", &[2, 3]),
        ("Join", &[5]),
        ("GroupJoin", &[5]),
        ("OrderBy", &[2]),
        ("OrderByDescending", &[2]),
        ("ThenBy", &[2]),
        ("ThenByDescending", &[2]),
        ("GroupBy", &[2, 3]),
        ("Take", &[2]),
        ("Skip", &[2]),
        ("First", &[1, 2]),
        ("FirstOrDefault", &[1, 2]),
        ("Single", &[1, 2]),
        ("SingleOrDefault", &[1, 2]),
        ("Last", &[1, 2]),
        ("LastOrDefault", &[1, 2]),
        ("Count", &[1, 2]),
        ("LongCount", &[1, 2]),
        ("Any", &[1, 2]),
        ("All", &[2]),
        ("Sum", &[1, 2]),
        ("Min", &[1, 2]),
        ("Max", &[1, 2]),
        ("Average", &[1, 2]),
        ("Distinct", &[1]),
        ("Reverse", &[1]),
        ("Concat", &[2]),
        ("Union", &[2]),
        ("Intersect", &[2]),
        ("Except", &[2]),
        ("Contains", &[2]),
        ("Cast", &[1]),
        ("OfType", &[1]),
        ("DefaultIfEmpty", &[1, 2]),
    ];

    /// Kind of a standard operator or built-in annotation, by method name
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "Where" => Self::Where,
            "Select" => Self::Select,
            "SelectMany" => Self::SelectMany,
            "Join" => Self::Join,
            "GroupJoin" => Self::GroupJoin,
            "OrderBy" => Self::OrderBy,
            "OrderByDescending" => Self::OrderByDescending,
            "ThenBy" => Self::ThenBy,
            "ThenByDescending" => Self::ThenByDescending,
            "GroupBy" => Self::GroupBy,
            "Take" => Self::Take,
            "Skip" => Self::Skip,
            "First" => Self::First,
            "FirstOrDefault" => Self::FirstOrDefault,
            "Single" => Self::Single,
            "SingleOrDefault" => Self::SingleOrDefault,
            "Last" => Self::Last,
            "LastOrDefault" => Self::LastOrDefault,
            "Count" => Self::Count,
            "LongCount" => Self::LongCount,
            "Any" => Self::Any,
            "All" => Self::All,
            "Sum" => Self::Sum,
            "Min" => Self::Min,
            "Max" => Self::Max,
            "Average" => Self::Average,
            "Distinct" => Self::Distinct,
            "Reverse" => Self::Reverse,
            "Concat" => Self::Concat,
            "Union" => Self::Union,
            "Intersect" => Self::Intersect,
            "Except" => Self::Except,
            "Contains" => Self::Contains,
            "Cast" => Self::Cast,
            "OfType" => Self::OfType,
            "DefaultIfEmpty" => Self::DefaultIfEmpty,
            "AsTracking" => Self::AsTracking,
            "AsNoTracking" => Self::AsNoTracking,
            "TagWith" => Self::TagWith,
            "IgnoreQueryFilters" => Self::IgnoreQueryFilters,
            "Include" => Self::Include,
            "IncludeString" => Self::StringInclude,
            "ThenInclude" => Self::ThenInclude,
            _ => return None,
        })
    }

    /// Annotation operators carry query-level directives rather than shaping
    /// the result sequence
    pub fn is_annotation(&self) -> bool {
        matches!(
            self,
            Self::AsTracking
                | Self::AsNoTracking
                | Self::TagWith
                | Self::IgnoreQueryFilters
                | Self::Include
                | Self::StringInclude
                | Self::ThenInclude
        )
    }
}

/// Source of operator kinds for method calls.
pub trait NodeTypeProvider: Send + Sync {
    /// Name used in diagnostics
    fn name(&self) -> &str;

    /// Kind of `method`, or `None` when this provider does not know it
    fn lookup(&self, method: &MethodRef) -> Option<OperatorKind>;

    /// Priority (higher = consulted first). Default: 50
    fn priority(&self) -> u8 {
        50
    }
}

/// Exact lookup by open method definition.
#[derive(Debug, Clone, Default)]
pub struct SignatureNodeTypeProvider {
    kinds: HashMap<MethodSignature, OperatorKind>,
}

impl SignatureNodeTypeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard operators on both `Queryable` and `Enumerable`, plus the
    /// built-in annotation operators
    pub fn standard() -> Self {
        let mut provider = Self::new();
        for (name, arities) in OperatorKind::STANDARD {
            let Some(kind) = OperatorKind::from_name(name) else {
                continue;
            };
            for &arity in *arities {
                provider.add(known::queryable(name, arity).definition().clone(), kind.clone());
                provider.add(known::enumerable(name, arity).definition().clone(), kind.clone());
            }
        }

        for (method, kind) in [
            (known::as_tracking(), OperatorKind::AsTracking),
            (known::as_no_tracking(), OperatorKind::AsNoTracking),
            (known::tag_with(), OperatorKind::TagWith),
            (known::ignore_query_filters(), OperatorKind::IgnoreQueryFilters),
            (known::include(), OperatorKind::Include),
            (known::include_async(), OperatorKind::Include),
            (known::string_include(), OperatorKind::StringInclude),
            (known::then_include(), OperatorKind::ThenInclude),
            (known::then_include_async(), OperatorKind::ThenInclude),
        ] {
            provider.add(method.definition().clone(), kind);
        }
        provider
    }

    pub fn add(&mut self, signature: MethodSignature, kind: OperatorKind) {
        self.kinds.insert(signature, kind);
    }

    pub fn with_method(mut self, signature: MethodSignature, kind: OperatorKind) -> Self {
        self.add(signature, kind);
        self
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl NodeTypeProvider for SignatureNodeTypeProvider {
    fn name(&self) -> &str {
        "signature"
    }

    fn lookup(&self, method: &MethodRef) -> Option<OperatorKind> {
        self.kinds.get(method.definition()).cloned()
    }

    fn priority(&self) -> u8 {
        100
    }
}

/// Fallback lookup by method name, for operators declared on owners the
/// signature table does not list.
#[derive(Debug, Clone, Default)]
pub struct NameNodeTypeProvider {
    kinds: HashMap<Arc<str>, OperatorKind>,
}

impl NameNodeTypeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conventional annotation operator names
    pub fn conventional() -> Self {
        [
            "AsTracking",
            "AsNoTracking",
            "TagWith",
            "IgnoreQueryFilters",
            "Include",
            "ThenInclude",
        ]
        .into_iter()
        .filter_map(|name| OperatorKind::from_name(name).map(|kind| (name, kind)))
        .fold(Self::new(), |provider, (name, kind)| {
            provider.with_name(name, kind)
        })
    }

    pub fn with_name(mut self, name: impl Into<Arc<str>>, kind: OperatorKind) -> Self {
        self.kinds.insert(name.into(), kind);
        self
    }
}

impl NodeTypeProvider for NameNodeTypeProvider {
    fn name(&self) -> &str {
        "name"
    }

    fn lookup(&self, method: &MethodRef) -> Option<OperatorKind> {
        self.kinds.get(method.name()).cloned()
    }

    fn priority(&self) -> u8 {
        10
    }
}

type ProviderList = Arc<Vec<Arc<dyn NodeTypeProvider>>>;

/// Copy-on-write registry of node-type providers.
pub struct NodeTypeRegistry {
    /// Read-locked only to clone the `Arc`; write-locked only for the swap
    /// after the new list is built
    snapshot: RwLock<ProviderList>,
    /// Held by writers while they copy, extend and sort the list
    writer: Mutex<()>,
}

impl Default for NodeTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeTypeRegistry")
            .field("providers", &self.provider_names())
            .finish()
    }
}

impl NodeTypeRegistry {
    /// Registry with the standard signature table and the name fallback
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(Arc::new(SignatureNodeTypeProvider::standard()));
        registry.register(Arc::new(NameNodeTypeProvider::conventional()));
        registry
    }

    /// Registry without any providers
    pub fn empty() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Vec::new())),
            writer: Mutex::new(()),
        }
    }

    /// Current provider list; later registrations do not affect it
    pub fn snapshot(&self) -> ProviderList {
        self.snapshot.read().clone()
    }

    /// Add a provider (re-sorts by priority)
    pub fn register(&self, provider: Arc<dyn NodeTypeProvider>) {
        let _guard = self.writer.lock();
        let mut providers: Vec<_> = self.snapshot().iter().cloned().collect();
        debug!(provider = provider.name(), "registering node-type provider");
        providers.push(provider);
        providers.sort_by_key(|p| std::cmp::Reverse(p.priority()));
        *self.snapshot.write() = Arc::new(providers);
    }

    /// Register additional method definitions for one operator kind
    pub fn register_methods<I>(&self, methods: I, kind: OperatorKind)
    where
        I: IntoIterator<Item = MethodSignature>,
    {
        let provider = methods
            .into_iter()
            .fold(SignatureNodeTypeProvider::new(), |provider, method| {
                provider.with_method(method, kind.clone())
            });
        self.register(Arc::new(provider));
    }

    pub fn lookup(&self, method: &MethodRef) -> Option<OperatorKind> {
        self.snapshot()
            .iter()
            .find_map(|provider| provider.lookup(method))
    }

    pub fn is_registered(&self, method: &MethodRef) -> bool {
        self.lookup(method).is_some()
    }

    /// Get list of registered provider names, in lookup order
    pub fn provider_names(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }
}
