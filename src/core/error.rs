use thiserror::Error;

/// Failure taxonomy of the submission engine.
///
/// The split matters operationally: `Validation` fails fast before any
/// network call, `RateLimited` is recoverable and must delay the next
/// attempt instead of consuming it, `Transport` is retried up to the attempt
/// ceiling, and `NotFound` is a log-and-return. A provider rejecting a
/// document is not an error at all; it is the `Rejected` terminal status on
/// the submission.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Document is missing required fields or violates an arithmetic
    /// invariant. Raised before serialization, never after a network call.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A named provider limit is exhausted. Carries how long the caller must
    /// wait; the retry scheduler delays by at least `retry_after_secs`.
    #[error("rate limit '{limit}' exhausted, retry after {retry_after_secs}s")]
    RateLimited {
        limit: String,
        retry_after_secs: u64,
    },

    /// Timeout, 5xx, connection failure, or a provider response that could
    /// not be parsed. Retried with a bounded attempt counter.
    #[error("transport error: {0}")]
    Transport(String),

    /// The invoice or submission vanished between enqueue and processing.
    /// Handlers log and return; there is nothing left to act on.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Misconfiguration (unknown provider key, malformed limit spec). Fatal
    /// for the invocation, never silently ignored.
    #[error("configuration error: {0}")]
    Config(String),

    /// Durable object storage write/read failure.
    #[error("object storage error: {0}")]
    Storage(String),

    /// Submission/invoice store failure.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl EngineError {
    /// Recoverable errors re-enqueue the poll instead of terminating the
    /// submission.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::RateLimited { .. } | EngineError::Transport(_)
        )
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Persistence(err.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Transport(err.to_string())
    }
}

impl From<quick_xml::Error> for EngineError {
    fn from(err: quick_xml::Error) -> Self {
        EngineError::Transport(format!("malformed XML: {err}"))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
