//! Error types for configuration and detection-service access.
//!
//! None of these reach the editor's mutation pipeline: the overlay logs them
//! and keeps its previous state.

use std::time::Duration;

use miette::Diagnostic;

/// Failure talking to the detection service.
#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum ApiError {
    /// No response within the configured timeout.
    #[error("detection request timed out after {timeout:?}")]
    #[diagnostic(code(shield::api::timeout))]
    Timeout { timeout: Duration },

    /// Connection-level failure.
    #[error("network error talking to detection service")]
    #[diagnostic(code(shield::api::network))]
    Network(#[source] reqwest::Error),

    /// Non-2xx response.
    #[error("detection service returned {status}: {body}")]
    #[diagnostic(code(shield::api::status))]
    Status { status: u16, body: String },

    /// 2xx response with a body we could not read.
    #[error("could not decode detection service response")]
    #[diagnostic(code(shield::api::decode))]
    Decode(#[source] reqwest::Error),

    #[error("invalid detection service url {url:?}")]
    #[diagnostic(code(shield::api::url), help("check `base_url` in the configuration"))]
    InvalidUrl { url: String },

    #[error("no API key configured")]
    #[diagnostic(
        code(shield::api::no_key),
        help("set SHIELD_API_KEY or `api_key` in the configuration file")
    )]
    MissingApiKey,
}

impl ApiError {
    /// Classify a transport error from reqwest.
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout { timeout }
        } else if err.is_decode() {
            Self::Decode(err)
        } else {
            Self::Network(err)
        }
    }

    /// Timeouts, network failures, 5xx and 429 are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) | Self::InvalidUrl { .. } | Self::MissingApiKey => false,
        }
    }

    /// HTTP status, for errors that carry one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Main error type for the overlay's outer layers.
#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum ShieldError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Api(#[from] ApiError),

    /// Configuration value that could not be used.
    #[error("invalid configuration: {0}")]
    #[diagnostic(code(shield::config))]
    Config(String),

    /// Configuration file in a format we do not read.
    #[error("unsupported configuration file format: {path}")]
    #[diagnostic(code(shield::config::format), help("use a .json or .toml file"))]
    UnsupportedFormat { path: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        let status = |status| ApiError::Status {
            status,
            body: String::new(),
        };
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(401).is_retryable());
        assert!(!status(404).is_retryable());
        assert_eq!(status(502).status(), Some(502));
    }

    #[test]
    fn test_other_errors() {
        let timeout = ApiError::Timeout {
            timeout: Duration::from_secs(30),
        };
        assert!(timeout.is_retryable());
        assert_eq!(timeout.status(), None);
        assert!(!ApiError::MissingApiKey.is_retryable());
        assert!(
            !ApiError::InvalidUrl {
                url: "nope".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_shield_error_wraps_api_error() {
        let err: ShieldError = ApiError::MissingApiKey.into();
        assert_eq!(err.to_string(), "no API key configured");
        assert_eq!(
            err.code().map(|c| c.to_string()).as_deref(),
            Some("shield::api::no_key")
        );
    }
}
