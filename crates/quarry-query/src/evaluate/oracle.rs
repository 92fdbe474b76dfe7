//! Evaluability oracle.
//!
//! Decides, node by node, whether a subtree may be computed on the client
//! before the query runs. The verdict here is node-local; the parameter
//! extractor combines verdicts bottom-up so that an excluded leaf keeps every
//! ancestor that depends on it in the query.

use crate::expr::{known, Expr, MemberRef, MethodRef, MethodSignature};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Extra exclusion rule
pub type ExclusionPredicate = Arc<dyn Fn(&Expr) -> bool + Send + Sync>;

/// The set of calls and members that must stay in the query.
///
/// These are non-deterministic or clock-dependent operations: folding them
/// would fix one value at compile time for every later execution.
#[derive(Clone)]
pub struct ExclusionPolicy {
    methods: HashSet<MethodSignature>,
    members: HashSet<MemberRef>,
    predicates: Vec<ExclusionPredicate>,
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for ExclusionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusionPolicy")
            .field("methods", &self.methods)
            .field("members", &self.members)
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

impl ExclusionPolicy {
    /// Policy that excludes nothing
    pub fn empty() -> Self {
        Self {
            methods: HashSet::new(),
            members: HashSet::new(),
            predicates: Vec::new(),
        }
    }

    /// Unique identifiers, pseudo-random numbers and clock reads
    pub fn standard() -> Self {
        Self::empty()
            .exclude_method(known::new_guid().definition().clone())
            .exclude_method(known::random_next(0).definition().clone())
            .exclude_method(known::random_next(1).definition().clone())
            .exclude_method(known::random_next(2).definition().clone())
            .exclude_member(known::date_time_now())
            .exclude_member(known::date_time_utc_now())
            .exclude_member(known::date_time_today())
            .exclude_member(known::date_time_offset_now())
            .exclude_member(known::date_time_offset_utc_now())
    }

    pub fn exclude_method(mut self, signature: MethodSignature) -> Self {
        self.methods.insert(signature);
        self
    }

    pub fn exclude_member(mut self, member: MemberRef) -> Self {
        self.members.insert(member);
        self
    }

    /// Exclude every node matching `predicate`
    pub fn exclude_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Expr) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Arc::new(predicate));
        self
    }

    /// Check whether this policy keeps `expr` in the query
    pub fn excludes(&self, expr: &Expr) -> bool {
        let listed = match expr {
            Expr::Call { method, .. } => self.methods.contains(method.definition()),
            Expr::Member { member, .. } => self.members.contains(member),
            _ => false,
        };
        listed || self.predicates.iter().any(|p| p(expr))
    }
}

/// Node-local evaluability verdicts under an injected [`ExclusionPolicy`].
///
/// The oracle holds no mutable state, so its verdict for a node cannot change
/// during a pass.
#[derive(Debug, Clone, Default)]
pub struct EvaluabilityOracle {
    policy: ExclusionPolicy,
}

impl EvaluabilityOracle {
    pub fn new(policy: ExclusionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ExclusionPolicy {
        &self.policy
    }

    /// Check whether `method` is a query operator (always part of the query)
    pub fn is_query_operator(method: &MethodRef) -> bool {
        matches!(
            method.owner(),
            known::QUERYABLE | known::ENTITY_QUERYABLE | known::ASYNC_ENTITY_QUERYABLE
        )
    }

    /// Check whether `expr`, considered on its own, may be computed on the client.
    ///
    /// Children are not inspected. Lambdas are never evaluation roots: their
    /// bodies depend on values bound at query execution.
    pub fn is_evaluatable(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Variable(_)
            | Expr::Parameter(_)
            | Expr::SourceRef(_)
            | Expr::SubQuery(_)
            | Expr::EntityQuery(_)
            | Expr::Lambda(_) => false,
            Expr::Call { method, .. } if Self::is_query_operator(method) => false,
            other => !self.policy.excludes(other),
        }
    }

    /// Bottom-up verdict for a whole subtree
    pub fn is_subtree_evaluatable(&self, expr: &Expr) -> bool {
        self.is_evaluatable(expr)
            && expr
                .children()
                .into_iter()
                .all(|child| self.is_subtree_evaluatable(child))
    }
}
