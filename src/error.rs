//! Construction-time error types.
//!
//! These errors are local to a single builder call: a failed `with_value`,
//! `with_timeout` or `with_deadline` never affects the parent tree.
//! Cancellation itself is not an error of this kind; it is reported through
//! [`CancelKind`](crate::types::CancelKind) by `Context::err`.

use std::sync::Arc;
use std::time::Duration;

/// Errors returned by the tree builder.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The key type is built only from primitive and standard-library types,
    /// which every module shares.
    ///
    /// Keys must be caller-defined types so unrelated modules cannot collide.
    #[error("invalid context key type `{type_name}`: use a caller-defined key type")]
    InvalidKey {
        /// Name of the rejected key type.
        type_name: &'static str,
    },

    /// `now + timeout` is not representable by the monotonic clock.
    #[error("invalid deadline: timeout of {timeout:?} overflows the clock")]
    InvalidDeadline {
        /// The requested timeout.
        timeout: Duration,
    },

    /// The deadline scheduler thread could not be started.
    #[error("deadline scheduler unavailable: {source}")]
    SchedulerUnavailable {
        /// Underlying spawn failure.
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl Error {
    /// Returns true if this is an [`Error::InvalidKey`].
    #[must_use]
    pub const fn is_invalid_key(&self) -> bool {
        matches!(self, Self::InvalidKey { .. })
    }

    /// Returns true if this is an [`Error::InvalidDeadline`].
    #[must_use]
    pub const fn is_invalid_deadline(&self) -> bool {
        matches!(self, Self::InvalidDeadline { .. })
    }

    /// Returns true if this is an [`Error::SchedulerUnavailable`].
    #[must_use]
    pub const fn is_scheduler_unavailable(&self) -> bool {
        matches!(self, Self::SchedulerUnavailable { .. })
    }
}

/// A specialized [`Result`](std::result::Result) for builder operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_problem() {
        let err = Error::InvalidKey {
            type_name: "&str",
        };
        assert!(err.is_invalid_key());
        assert!(err.to_string().contains("`&str`"));

        let err = Error::InvalidDeadline {
            timeout: Duration::MAX,
        };
        assert!(err.is_invalid_deadline());
        assert!(err.to_string().starts_with("invalid deadline"));
    }

    #[test]
    fn scheduler_error_exposes_source() {
        use std::error::Error as _;
        let err = Error::SchedulerUnavailable {
            source: Arc::new(std::io::Error::other("no threads left")),
        };
        assert!(err.is_scheduler_unavailable());
        assert!(err.source().is_some());
        assert!(err.to_string().contains("no threads left"));
    }
}
