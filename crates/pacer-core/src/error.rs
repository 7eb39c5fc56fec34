use std::path::PathBuf;

use thiserror::Error;

/// Why a request's ticket resolved with an error.
///
/// `Failed` carries the operation's own error from its last attempt, so the
/// caller sees the same error it would have seen calling the operation
/// directly.
#[derive(Debug, Error)]
pub enum RequestError<E> {
    #[error("{0}")]
    Failed(E),

    #[error("request cancelled: queue was cleared")]
    Cancelled,

    #[error("request aborted before it could settle")]
    Aborted,
}

impl<E> RequestError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RequestError::Cancelled)
    }

    /// The operation's error, if the request failed on its own.
    pub fn into_failure(self) -> Option<E> {
        match self {
            RequestError::Failed(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("max_concurrent must be at least 1")]
    ZeroConcurrency,

    #[error("backoff_multiplier must be finite and >= 1.0, got {0}")]
    InvalidMultiplier(f64),
}
