//! Unified error type for the reelgen orchestrator.
//!
//! All crates funnel their failures into [`Error`]. Beyond display and HTTP
//! mapping, the type carries the classification that drives retry decisions:
//! every error has an [`ErrorKind`], and [`Error::is_retryable`] answers
//! whether the failure handler may re-run the pipeline for it.

use std::fmt;

/// Coarse classification of a failure, independent of where it was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An operation exceeded its time budget.
    Timeout,
    /// Object-store or database access failed.
    Storage,
    /// A generation backend (synthesis, enhancement, encoding) failed.
    Model,
    /// The request itself is at fault.
    Validation,
    /// Process-level or network infrastructure failed.
    System,
    /// Nothing more specific is known.
    Unknown,
}

impl ErrorKind {
    /// Whether failures of this kind are worth another attempt.
    ///
    /// Timeouts, infrastructure hiccups, and backend errors are assumed
    /// transient; validation and storage failures will not improve on
    /// re-execution.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::System | ErrorKind::Model)
    }

    /// Lowercase label used in logs and persisted failure messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Storage => "storage",
            ErrorKind::Model => "model",
            ErrorKind::Validation => "validation",
            ErrorKind::System => "system",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type covering all failure modes in reelgen.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An operation exceeded its time budget.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Object-store access failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A generation backend call failed.
    #[error("Model error: {0}")]
    Model(String),

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Process-level or network failure outside any backend.
    #[error("System error: {0}")]
    System(String),

    /// The caller's monthly submission quota is exhausted.
    #[error("Quota exceeded: monthly limit of {limit} videos reached")]
    QuotaExceeded {
        /// The tier limit that was hit.
        limit: u32,
    },

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// A database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Catch-all for errors with no better classification.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl Error {
    /// Map this error onto the retry taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Storage(_) | Error::Database(_) => ErrorKind::Storage,
            Error::Model(_) => ErrorKind::Model,
            Error::Validation(_) | Error::QuotaExceeded { .. } | Error::NotFound { .. } => {
                ErrorKind::Validation
            }
            Error::System(_) => ErrorKind::System,
            Error::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Whether the failure handler may re-run the pipeline for this error.
    ///
    /// Kind-driven, with a message heuristic as the fallback for
    /// [`Error::Unknown`]: an unclassified error still earns a retry when its
    /// message reads like a transient infrastructure failure.
    pub fn is_retryable(&self) -> bool {
        match self.kind() {
            ErrorKind::Unknown => is_transient_message(&self.to_string()),
            kind => kind.is_retryable(),
        }
    }

    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::QuotaExceeded { .. } => 429,
            Error::Timeout(_) => 504,
            Error::Model(_) => 502,
            Error::Storage(_) | Error::Database(_) | Error::System(_) | Error::Unknown(_) => 500,
        }
    }

    /// Convenience constructor for [`Error::Timeout`].
    pub fn timeout(message: impl Into<String>) -> Self {
        Error::Timeout(message.into())
    }

    /// Convenience constructor for [`Error::Storage`].
    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage(message.into())
    }

    /// Convenience constructor for [`Error::Model`].
    pub fn model(message: impl Into<String>) -> Self {
        Error::Model(message.into())
    }

    /// Convenience constructor for [`Error::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Convenience constructor for [`Error::System`].
    pub fn system(message: impl Into<String>) -> Self {
        Error::System(message.into())
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Database`].
    pub fn database(message: impl Into<String>) -> Self {
        Error::Database(message.into())
    }

    /// Convenience constructor for [`Error::Unknown`].
    pub fn unknown(message: impl Into<String>) -> Self {
        Error::Unknown(message.into())
    }

    /// Wrap an untagged message, inferring its kind from the text.
    ///
    /// Used at boundaries where only a string is available (opaque transport
    /// failures, foreign error types).
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match classify_message(&message) {
            ErrorKind::Timeout => Error::Timeout(message),
            ErrorKind::Storage => Error::Storage(message),
            ErrorKind::Model => Error::Model(message),
            ErrorKind::Validation => Error::Validation(message),
            ErrorKind::System => Error::System(message),
            ErrorKind::Unknown => Error::Unknown(message),
        }
    }
}

/// Infer an [`ErrorKind`] from free-form message text.
pub fn classify_message(message: &str) -> ErrorKind {
    let m = message.to_lowercase();
    if m.contains("timeout") || m.contains("timed out") || m.contains("deadline") {
        ErrorKind::Timeout
    } else if m.contains("rate limit")
        || m.contains("too many requests")
        || m.contains("unavailable")
        || m.contains("overloaded")
        || m.contains("model")
    {
        ErrorKind::Model
    } else if m.contains("connection")
        || m.contains("connect")
        || m.contains("reset by peer")
        || m.contains("broken pipe")
        || m.contains("network")
    {
        ErrorKind::System
    } else if m.contains("no space") || m.contains("disk") || m.contains("read-only") {
        ErrorKind::Storage
    } else if m.contains("invalid") || m.contains("malformed") {
        ErrorKind::Validation
    } else {
        ErrorKind::Unknown
    }
}

/// Whether free-form message text reads like a transient failure.
///
/// Substring match against the vocabulary of known transient errors; used
/// when deciding whether an unclassified exception deserves a retry.
pub fn is_transient_message(message: &str) -> bool {
    let m = message.to_lowercase();
    const TRANSIENT: &[&str] = &[
        "timeout",
        "timed out",
        "connection",
        "rate limit",
        "too many requests",
        "unavailable",
        "temporarily",
        "overloaded",
        "reset by peer",
    ];
    TRANSIENT.iter().any(|needle| m.contains(needle))
}

/// Log-and-discard wrapper for non-critical side channels.
///
/// Webhook delivery, asset-row bookkeeping, and cleanup are best-effort:
/// their failures must never fail the operation that triggered them.
/// Callers route those results through here instead of `?`.
pub fn best_effort<T>(what: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(%error, "{what} failed; continuing");
            None
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display_and_kind() {
        let err = Error::timeout("synthesis exceeded 600s");
        assert_eq!(err.to_string(), "Timeout: synthesis exceeded 600s");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_retryable());
        assert_eq!(err.http_status(), 504);
    }

    #[test]
    fn storage_is_not_retryable() {
        let err = Error::storage("write failed: permission denied");
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(!err.is_retryable());
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn model_is_retryable() {
        let err = Error::model("inference worker crashed");
        assert_eq!(err.kind(), ErrorKind::Model);
        assert!(err.is_retryable());
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn validation_display() {
        let err = Error::validation("prompt is required");
        assert_eq!(err.to_string(), "Validation error: prompt is required");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn system_is_retryable() {
        let err = Error::system("worker pool shutting down");
        assert_eq!(err.kind(), ErrorKind::System);
        assert!(err.is_retryable());
    }

    #[test]
    fn quota_exceeded_display() {
        let err = Error::QuotaExceeded { limit: 10 };
        assert_eq!(
            err.to_string(),
            "Quota exceeded: monthly limit of 10 videos reached"
        );
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());
        assert_eq!(err.http_status(), 429);
    }

    #[test]
    fn not_found_display() {
        let err = Error::not_found("job", "abc-123");
        assert_eq!(err.to_string(), "job not found: abc-123");
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn database_maps_to_storage_kind() {
        let err = Error::database("connection pool exhausted");
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(!err.is_retryable());
    }

    #[test]
    fn unknown_uses_message_heuristic() {
        let transient = Error::unknown("upstream connection reset by peer");
        assert!(transient.is_retryable());

        let opaque = Error::unknown("segmentation fault");
        assert!(!opaque.is_retryable());
    }

    #[test]
    fn classify_message_covers_vocabulary() {
        assert_eq!(classify_message("request timed out"), ErrorKind::Timeout);
        assert_eq!(classify_message("429 rate limit hit"), ErrorKind::Model);
        assert_eq!(classify_message("service unavailable"), ErrorKind::Model);
        assert_eq!(classify_message("connection refused"), ErrorKind::System);
        assert_eq!(classify_message("no space left on device"), ErrorKind::Storage);
        assert_eq!(classify_message("invalid frame index"), ErrorKind::Validation);
        assert_eq!(classify_message("wat"), ErrorKind::Unknown);
    }

    #[test]
    fn from_message_builds_matching_variant() {
        assert!(matches!(
            Error::from_message("encoder timed out"),
            Error::Timeout(_)
        ));
        assert!(matches!(
            Error::from_message("totally novel failure"),
            Error::Unknown(_)
        ));
    }

    #[test]
    fn transient_vocabulary() {
        assert!(is_transient_message("Connection refused"));
        assert!(is_transient_message("upstream temporarily unavailable"));
        assert!(!is_transient_message("prompt rejected by safety filter"));
    }

    #[test]
    fn best_effort_swallows_errors() {
        assert_eq!(best_effort("noop", Ok(7)), Some(7));
        let lost: Option<()> = best_effort("doomed", Err(Error::storage("boom")));
        assert_eq!(lost, None);
    }

    #[test]
    fn kind_labels() {
        assert_eq!(ErrorKind::Timeout.as_str(), "timeout");
        assert_eq!(ErrorKind::Model.to_string(), "model");
    }

    #[test]
    fn result_alias() {
        fn ok_fn() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(ok_fn().unwrap(), 42);
    }
}
