//! Method and member identities.
//!
//! A [`MethodRef`] is the closed form carried by a call node (it may list
//! generic arguments); its [`MethodSignature`] is the open definition used for
//! registry lookups and equivalence checks.

use std::fmt;
use std::sync::Arc;

/// Open method definition: owner, name and argument count.
///
/// Arity counts explicit arguments only. For extension-style operators the
/// source sequence is the first argument; instance methods carry their
/// receiver as the call target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodSignature {
    pub owner: Arc<str>,
    pub name: Arc<str>,
    pub arity: usize,
}

impl MethodSignature {
    pub fn new(owner: impl Into<Arc<str>>, name: impl Into<Arc<str>>, arity: usize) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            arity,
        }
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/{}", self.owner, self.name, self.arity)
    }
}

/// Closed method reference carried by call nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    signature: MethodSignature,
    generic_args: Vec<Arc<str>>,
    const_args: bool,
}

impl MethodRef {
    pub fn new(owner: impl Into<Arc<str>>, name: impl Into<Arc<str>>, arity: usize) -> Self {
        Self {
            signature: MethodSignature::new(owner, name, arity),
            generic_args: Vec::new(),
            const_args: false,
        }
    }

    /// Close the method over generic arguments
    pub fn with_generic_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        self.generic_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the method as requiring literal (never parameterized) arguments
    pub fn with_const_args(mut self) -> Self {
        self.const_args = true;
        self
    }

    /// The open definition this reference closes over
    pub fn definition(&self) -> &MethodSignature {
        &self.signature
    }

    pub fn owner(&self) -> &str {
        &self.signature.owner
    }

    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn arity(&self) -> usize {
        self.signature.arity
    }

    pub fn generic_args(&self) -> &[Arc<str>] {
        &self.generic_args
    }

    pub fn const_args(&self) -> bool {
        self.const_args
    }

    /// Check whether this reference is a closed form of `definition`
    pub fn is_form_of(&self, definition: &MethodSignature) -> bool {
        &self.signature == definition
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.signature.owner, self.signature.name)?;
        if !self.generic_args.is_empty() {
            write!(f, "<{}>", self.generic_args.join(", "))?;
        }
        write!(f, "/{}", self.signature.arity)
    }
}

/// Field or property identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberRef {
    pub owner: Arc<str>,
    pub name: Arc<str>,
}

impl MemberRef {
    pub fn new(owner: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

/// Well-known owners, methods and members.
pub mod known {
    use super::{MemberRef, MethodRef, MethodSignature};

    pub const QUERYABLE: &str = "Queryable";
    pub const ENUMERABLE: &str = "Enumerable";
    pub const ENTITY_QUERYABLE: &str = "EntityQueryableExtensions";
    pub const ASYNC_ENTITY_QUERYABLE: &str = "AsyncEntityQueryableExtensions";
    pub const STRING: &str = "String";
    pub const MATH: &str = "Math";
    pub const GUID: &str = "Guid";
    pub const RANDOM: &str = "Random";
    pub const DATE_TIME: &str = "DateTime";
    pub const DATE_TIME_OFFSET: &str = "DateTimeOffset";
    pub const VB_OPERATORS: &str = "Microsoft.VisualBasic.CompilerServices.Operators";

    /// A standard query operator (`Queryable.<name>`)
    pub fn queryable(name: &str, arity: usize) -> MethodRef {
        MethodRef::new(QUERYABLE, name, arity)
    }

    /// An in-memory sequence operator (`Enumerable.<name>`), as found inside lambdas
    pub fn enumerable(name: &str, arity: usize) -> MethodRef {
        MethodRef::new(ENUMERABLE, name, arity)
    }

    pub fn string_starts_with() -> MethodRef {
        MethodRef::new(STRING, "StartsWith", 1)
    }

    pub fn string_ends_with() -> MethodRef {
        MethodRef::new(STRING, "EndsWith", 1)
    }

    /// Canonical `String.Compare(a, b, StringComparison)`
    pub fn string_compare() -> MethodRef {
        MethodRef::new(STRING, "Compare", 3)
    }

    /// Foreign-dialect `Operators.CompareString(a, b, textCompare)`
    pub fn compare_string() -> MethodRef {
        MethodRef::new(VB_OPERATORS, "CompareString", 3)
    }

    pub fn new_guid() -> MethodRef {
        MethodRef::new(GUID, "NewGuid", 0)
    }

    pub fn random_next(arity: usize) -> MethodRef {
        MethodRef::new(RANDOM, "Next", arity)
    }

    pub fn date_time_now() -> MemberRef {
        MemberRef::new(DATE_TIME, "Now")
    }

    pub fn date_time_utc_now() -> MemberRef {
        MemberRef::new(DATE_TIME, "UtcNow")
    }

    pub fn date_time_today() -> MemberRef {
        MemberRef::new(DATE_TIME, "Today")
    }

    pub fn date_time_offset_now() -> MemberRef {
        MemberRef::new(DATE_TIME_OFFSET, "Now")
    }

    pub fn date_time_offset_utc_now() -> MemberRef {
        MemberRef::new(DATE_TIME_OFFSET, "UtcNow")
    }

    pub fn as_tracking() -> MethodRef {
        MethodRef::new(ENTITY_QUERYABLE, "AsTracking", 1)
    }

    pub fn as_no_tracking() -> MethodRef {
        MethodRef::new(ENTITY_QUERYABLE, "AsNoTracking", 1)
    }

    /// `TagWith(source, tag)`; the tag is always inlined as a literal
    pub fn tag_with() -> MethodRef {
        MethodRef::new(ENTITY_QUERYABLE, "TagWith", 2).with_const_args()
    }

    pub fn ignore_query_filters() -> MethodRef {
        MethodRef::new(ENTITY_QUERYABLE, "IgnoreQueryFilters", 1)
    }

    /// `Include(source, navigation lambda)`
    pub fn include() -> MethodRef {
        MethodRef::new(ENTITY_QUERYABLE, "Include", 2)
    }

    /// Async-surface `Include(source, navigation lambda)`
    pub fn include_async() -> MethodRef {
        MethodRef::new(ASYNC_ENTITY_QUERYABLE, "Include", 2)
    }

    /// `Include(source, "a.b.c")`; the path is always inlined as a literal
    pub fn string_include() -> MethodRef {
        MethodRef::new(ENTITY_QUERYABLE, "IncludeString", 2).with_const_args()
    }

    pub fn then_include() -> MethodRef {
        MethodRef::new(ENTITY_QUERYABLE, "ThenInclude", 2)
    }

    pub fn then_include_async() -> MethodRef {
        MethodRef::new(ASYNC_ENTITY_QUERYABLE, "ThenInclude", 2)
    }

    /// Definitions recognized as the include construct
    pub fn include_definitions() -> [MethodSignature; 2] {
        [
            include().definition().clone(),
            include_async().definition().clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_forms_share_definition() {
        let a = known::include().with_generic_args(["Customer", "Order"]);
        let b = known::include().with_generic_args(["Order", "Line"]);
        assert_ne!(a, b);
        assert_eq!(a.definition(), b.definition());
        assert!(a.is_form_of(known::include().definition()));
    }

    #[test]
    fn test_display_includes_generic_args() {
        let m = known::queryable("Where", 2).with_generic_args(["Customer"]);
        assert_eq!(m.to_string(), "Queryable.Where<Customer>/2");
        assert_eq!(m.definition().to_string(), "Queryable.Where/2");
    }

    #[test]
    fn test_const_args_flag() {
        assert!(known::tag_with().const_args());
        assert!(!known::include().const_args());
    }
}
