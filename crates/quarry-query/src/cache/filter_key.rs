use crate::metadata::EntityType;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Cache key of the query filters applied to one entity type.
///
/// Entity types compare by identity. Filter identifiers compare as a set:
/// order and duplicates do not matter.
#[derive(Debug, Clone)]
pub struct QueryFilterCacheKey {
    entity_type: Arc<EntityType>,
    filters: HashSet<Arc<str>>,
}

impl QueryFilterCacheKey {
    pub fn new<I, S>(entity_type: Arc<EntityType>, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        Self {
            entity_type,
            filters: filters.into_iter().map(Into::into).collect(),
        }
    }

    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    pub fn filters(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().map(|f| f.as_ref())
    }
}

impl PartialEq for QueryFilterCacheKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entity_type, &other.entity_type)
            && self.filters.len() == other.filters.len()
            && self.filters.iter().all(|f| other.filters.contains(f))
    }
}

impl Eq for QueryFilterCacheKey {}

impl Hash for QueryFilterCacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.entity_type), state);
        // Wrapping sum keeps the hash independent of iteration order
        let combined = self.filters.iter().fold(0u64, |acc, filter| {
            let mut hasher = DefaultHasher::new();
            filter.hash(&mut hasher);
            acc.wrapping_add(hasher.finish())
        });
        combined.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of(key: &QueryFilterCacheKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_filter_order_is_irrelevant() {
        let customer = Arc::new(EntityType::new("Customer"));
        let a = QueryFilterCacheKey::new(Arc::clone(&customer), ["a", "b"]);
        let b = QueryFilterCacheKey::new(Arc::clone(&customer), ["b", "a", "b"]);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_entity_types_compare_by_identity() {
        let first = Arc::new(EntityType::new("Customer"));
        let second = Arc::new(EntityType::new("Customer"));
        assert_eq!(*first, *second);
        let a = QueryFilterCacheKey::new(first, ["tenant"]);
        let b = QueryFilterCacheKey::new(second, ["tenant"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_different_filter_sets_differ() {
        let customer = Arc::new(EntityType::new("Customer"));
        let a = QueryFilterCacheKey::new(Arc::clone(&customer), ["a"]);
        let b = QueryFilterCacheKey::new(Arc::clone(&customer), ["a", "b"]);
        assert_ne!(a, b);
    }

    mod laws {
        use super::*;
        use proptest::prelude::*;

        fn filters_and_permutation() -> impl Strategy<Value = (Vec<String>, Vec<String>)> {
            prop::collection::vec("[a-e]{1,3}", 0..6)
                .prop_flat_map(|filters| (Just(filters.clone()), Just(filters).prop_shuffle()))
        }

        fn key(entity: &Arc<EntityType>, filters: &[String]) -> QueryFilterCacheKey {
            QueryFilterCacheKey::new(Arc::clone(entity), filters.iter().map(String::as_str))
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(200))]

            #[test]
            fn permuted_filters_give_equal_keys((filters, shuffled) in filters_and_permutation()) {
                let customer = Arc::new(EntityType::new("Customer"));
                let a = key(&customer, &filters);
                let b = key(&customer, &shuffled);
                prop_assert_eq!(&a, &b);
                prop_assert_eq!(hash_of(&a), hash_of(&b));
            }

            #[test]
            fn duplicated_filters_give_equal_keys(
                (filters, shuffled) in filters_and_permutation(),
            ) {
                let customer = Arc::new(EntityType::new("Customer"));
                let doubled: Vec<String> = filters.iter().chain(shuffled.iter()).cloned().collect();
                let a = key(&customer, &filters);
                let b = key(&customer, &doubled);
                prop_assert_eq!(&a, &b);
                prop_assert_eq!(hash_of(&a), hash_of(&b));
            }

            #[test]
            fn extra_filter_gives_different_key(
                filters in prop::collection::vec("[a-e]{1,3}", 0..6),
                extra in "[f-h]{1,3}",
            ) {
                let customer = Arc::new(EntityType::new("Customer"));
                let mut extended = filters.clone();
                extended.push(extra);
                prop_assert_ne!(key(&customer, &filters), key(&customer, &extended));
            }

            #[test]
            fn distinct_entity_instances_give_different_keys(
                filters in prop::collection::vec("[a-e]{1,3}", 0..6),
            ) {
                let first = Arc::new(EntityType::new("Customer"));
                let second = Arc::new(EntityType::new("Customer"));
                prop_assert_ne!(key(&first, &filters), key(&second, &filters));
            }
        }
    }
}
