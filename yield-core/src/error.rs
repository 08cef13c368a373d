//! Error types for the yield engine

use thiserror::Error;

/// Maximum number of payload characters kept on a parse error
const PAYLOAD_EXCERPT_LEN: usize = 512;

/// Engine-wide error type for source and adapter operations
#[derive(Error, Debug, Clone)]
pub enum YieldError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    /// Upstream payload did not match the expected shape (not retryable)
    #[error("Parse error: {message} (payload: {payload})")]
    Parse { message: String, payload: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Circuit open for source: {0}")]
    CircuitOpen(String),

    #[error("Source error ({source_name}): {message}")]
    Source { source_name: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl YieldError {
    pub fn api(msg: impl Into<String>) -> Self {
        YieldError::Api(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        YieldError::Network(msg.into())
    }

    /// Build a parse error, keeping a bounded excerpt of the offending payload
    pub fn parse(msg: impl Into<String>, payload: &str) -> Self {
        let payload = if payload.len() > PAYLOAD_EXCERPT_LEN {
            let mut end = PAYLOAD_EXCERPT_LEN;
            while !payload.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &payload[..end])
        } else {
            payload.to_string()
        };

        YieldError::Parse {
            message: msg.into(),
            payload,
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        YieldError::NotFound(msg.into())
    }

    pub fn source(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        YieldError::Source {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        YieldError::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        YieldError::Internal(msg.into())
    }

    /// Whether another attempt could reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            YieldError::Api(_)
                | YieldError::Network(_)
                | YieldError::Timeout(_)
                | YieldError::Source { .. }
        )
    }
}

/// Result type alias for engine operations
pub type YieldResult<T> = Result<T, YieldError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_truncates_payload() {
        let payload = "x".repeat(2_000);
        match YieldError::parse("bad shape", &payload) {
            YieldError::Parse { payload, .. } => {
                assert_eq!(payload.len(), PAYLOAD_EXCERPT_LEN + 3);
                assert!(payload.ends_with("..."));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(YieldError::network("reset").is_retryable());
        assert!(YieldError::Timeout(100).is_retryable());
        assert!(!YieldError::parse("bad", "{}").is_retryable());
        assert!(!YieldError::CircuitOpen("aave".into()).is_retryable());
    }
}
