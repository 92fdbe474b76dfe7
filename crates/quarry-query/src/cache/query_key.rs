use crate::config::QueryTrackingBehavior;
use crate::expr::Expr;

/// Cache key of a compiled query.
///
/// `shape` is the tree after parameter extraction, so executions that differ
/// only in captured values share one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryCacheKey {
    pub shape: Expr,
    pub tracking: QueryTrackingBehavior,
    pub is_async: bool,
}

impl QueryCacheKey {
    pub fn new(shape: Expr, tracking: QueryTrackingBehavior, is_async: bool) -> Self {
        Self {
            shape,
            tracking,
            is_async,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(key: &QueryCacheKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_same_shape_same_key() {
        let tracking = QueryTrackingBehavior::TrackAll;
        let a = QueryCacheKey::new(Expr::parameter("__p_0"), tracking, false);
        let b = QueryCacheKey::new(Expr::parameter("__p_0"), tracking, false);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_tracking_and_mode_distinguish_keys() {
        let base = QueryCacheKey::new(
            Expr::entity_query("Customer"),
            QueryTrackingBehavior::TrackAll,
            false,
        );
        let untracked = QueryCacheKey {
            tracking: QueryTrackingBehavior::NoTracking,
            ..base.clone()
        };
        let async_key = QueryCacheKey {
            is_async: true,
            ..base.clone()
        };
        assert_ne!(base, untracked);
        assert_ne!(base, async_key);
    }
}
