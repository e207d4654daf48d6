//! Error types for price fetches.

use thiserror::Error;

/// Errors that can occur while fetching one price.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Bad response: {0}")]
    BadResponse(String),

    #[error("Exchange not supported: {0}")]
    UnknownExchange(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::BadResponse(err.to_string())
        } else if err.is_timeout() {
            FetchError::Network(format!("timeout: {}", err))
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::BadResponse(err.to_string())
    }
}

impl FetchError {
    /// Returns true if the same request may succeed on a later tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Network("reset".into()).is_transient());
        assert!(!FetchError::BadResponse("empty".into()).is_transient());
        assert!(!FetchError::UnknownExchange("Kraken".into()).is_transient());
    }

    #[test]
    fn test_from_serde_error_is_bad_response() {
        let err: FetchError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, FetchError::BadResponse(_)));
    }
}
