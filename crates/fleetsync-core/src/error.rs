//! Error types for fleetsync-core.
//!
//! Nothing in this engine is allowed to terminate the process. Every error
//! here degrades to "keep using last-known-good state and keep retrying":
//!
//! | Error Type | Strategy |
//! |------------|----------|
//! | [`Error::Transport`] | Scheduled reconnect, never fatal |
//! | [`Error::InvalidMessage`] | Drop the single message, keep the channel |
//! | [`Error::TimeFetch`] | Bounded retries, then keep the stale offset |
//! | [`Error::InvalidConfig`] | Fix configuration and restart |

use thiserror::Error;

/// Errors that can occur inside the synchronization engine.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Socket failed to open or dropped abnormally.
    #[error("transport error on channel '{channel}': {message}")]
    Transport {
        /// The logical channel the socket belonged to.
        channel: String,
        /// Description of the failure.
        message: String,
    },

    /// An inbound message could not be parsed or classified.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A server time fetch failed.
    #[error("time fetch failed: {0}")]
    TimeFetch(String),

    /// Invalid configuration provided.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error (configuration file loading).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a transport error with channel context.
    pub fn transport(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-message error.
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::InvalidMessage(message.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidMessage(err.to_string())
    }
}

/// Result type alias using fleetsync-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::transport("device-feed", "connection refused");
        assert!(err.to_string().contains("device-feed"));
        assert!(err.to_string().contains("connection refused"));

        let err = Error::TimeFetch("503 from /api/time/".to_string());
        assert!(err.to_string().contains("time fetch failed"));

        let err = Error::invalid_config("store.log_window must be > 0");
        assert!(err.to_string().contains("log_window"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::InvalidMessage(_)));
    }
}
