//! Translation error types.

use thiserror::Error;

/// Errors raised while translating or compiling a query.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslationError {
    /// A call in sequence position that no node-type provider recognizes
    #[error("Could not translate method call '{method}': no query operator is registered for it")]
    UnrecognizedOperator { method: String },

    /// A recognized operator whose arguments have an unexpected shape
    #[error("Invalid arguments for query operator '{operator}': {message}")]
    InvalidOperatorArguments { operator: String, message: String },

    /// An include path that does not resolve to navigations on the entity type
    #[error("Include path '{path}' does not bind to a chain of navigations")]
    IncludeNotBindable { path: String },

    /// Client evaluation of an extracted subtree failed
    #[error("Failed to evaluate query parameter: {0}")]
    Parameterization(String),

    /// Client evaluation reached a node it cannot compute
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// A subquery id that is not present in the model arena
    #[error("Unknown subquery model #{0}")]
    UnknownSubquery(usize),

    /// Internal invariant violated (programmer error, never user-recoverable)
    #[error("Internal consistency error: {0}")]
    InternalConsistency(String),

    /// Cancellation signalled before an async fixup ran
    #[error("Operation was cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for translation operations
pub type TranslationResult<T> = Result<T, TranslationError>;

impl TranslationError {
    /// Create an unrecognized-operator error
    pub fn unrecognized(method: impl Into<String>) -> Self {
        Self::UnrecognizedOperator {
            method: method.into(),
        }
    }

    /// Create an invalid-arguments error
    pub fn invalid_arguments(operator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOperatorArguments {
            operator: operator.into(),
            message: message.into(),
        }
    }

    /// Create an evaluation error
    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    /// Create an internal consistency error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalConsistency(msg.into())
    }

    /// Check if this error reports a broken internal invariant
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InternalConsistency(_))
    }

    /// Check if this error should be surfaced to the application as a query compile error
    pub fn is_query_error(&self) -> bool {
        matches!(
            self,
            Self::UnrecognizedOperator { .. }
                | Self::InvalidOperatorArguments { .. }
                | Self::IncludeNotBindable { .. }
                | Self::Parameterization(_)
        )
    }
}

impl From<toml::de::Error> for TranslationError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecognized_names_method() {
        let err = TranslationError::unrecognized("Queryable.Frobnicate/2");
        assert!(err.to_string().contains("Queryable.Frobnicate/2"));
        assert!(err.is_query_error());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_internal_is_fatal() {
        let err = TranslationError::internal("cannot invert Add");
        assert!(err.is_fatal());
        assert!(!err.is_query_error());
    }
}
