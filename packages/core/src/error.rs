//! Error taxonomy for cache operations.
//!
//! Loader and writer failures wrap the opaque error returned by the user
//! callback; argument and lifecycle misuse get dedicated variants. Listener
//! failures and dispatcher overflow are handled locally by the engine and
//! never surface here.

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced to callers of cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A read-through loader failed. No cache state was changed.
    #[error("cache loader failed")]
    Loader(#[source] anyhow::Error),

    /// A write-through writer failed. The in-memory mutation has already
    /// been applied and is not rolled back.
    #[error("cache writer failed")]
    Writer(#[source] anyhow::Error),

    /// An argument was rejected before any side effect took place.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument.
        reason: String,
    },

    /// The cache is closing or closed; only `is_closed` remains usable.
    #[error("cache is closed")]
    Closed,
}

impl CacheError {
    /// Shorthand for an [`CacheError::InvalidArgument`].
    #[must_use]
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = CacheError::invalid_argument("listener already registered");
        assert_eq!(
            err.to_string(),
            "invalid argument: listener already registered"
        );
        assert_eq!(CacheError::Closed.to_string(), "cache is closed");
    }

    #[test]
    fn loader_error_preserves_source() {
        let err = CacheError::Loader(anyhow::anyhow!("backend unreachable"));
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "backend unreachable");
    }
}
