//! Error types for the DDNS system
//!
//! [`Error`] is the single error type used across the workspace. Each variant
//! maps onto one [`ErrorKind`], the coarse taxonomy the orchestrator branches
//! on and that is surfaced in [`UpdateOutcome`](crate::model::UpdateOutcome).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for DDNS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the DDNS system
#[derive(Error, Debug)]
pub enum Error {
    /// Every detection strategy failed for the requested address family
    #[error("IP detection exhausted: {0}")]
    DetectionExhausted(String),

    /// A single detection strategy failed (internal to the detector chain)
    #[error("IP source error: {0}")]
    IpSource(String),

    /// The provider rejected the credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The provider throttled the request
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Transport failure, timeout or 5xx from the provider
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The requested DNS record does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Malformed domain or settings input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Credential vault failure (missing entry, decrypt failure)
    #[error("Credential error: {0}")]
    Credential(String),

    /// No domain with the given id is registered
    #[error("Domain not found: {0}")]
    DomainNotFound(String),

    /// Provider-specific rejection that is none of the above
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// The run was abandoned because its domain went away
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Persistent storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DetectionExhausted,
    AuthError,
    RateLimited,
    ProviderUnavailable,
    RecordNotFound,
    ValidationError,
    CredentialError,
    DomainNotFound,
    ProviderRejected,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Whether the next scheduled tick is expected to retry this failure
    pub fn is_deferred_retry(self) -> bool {
        matches!(self, Self::RateLimited | Self::ProviderUnavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DetectionExhausted => "DetectionExhausted",
            Self::AuthError => "AuthError",
            Self::RateLimited => "RateLimited",
            Self::ProviderUnavailable => "ProviderUnavailable",
            Self::RecordNotFound => "RecordNotFound",
            Self::ValidationError => "ValidationError",
            Self::CredentialError => "CredentialError",
            Self::DomainNotFound => "DomainNotFound",
            Self::ProviderRejected => "ProviderRejected",
            Self::Cancelled => "Cancelled",
            Self::Internal => "Internal",
        };
        f.write_str(s)
    }
}

impl Error {
    /// Create a detection-exhausted error
    pub fn detection_exhausted(msg: impl Into<String>) -> Self {
        Self::DetectionExhausted(msg.into())
    }

    /// Create an IP source error
    pub fn ip_source(msg: impl Into<String>) -> Self {
        Self::IpSource(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create a provider-unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::ProviderUnavailable(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a credential vault error
    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential(msg.into())
    }

    /// Create a domain-not-found error
    pub fn domain_not_found(id: impl Into<String>) -> Self {
        Self::DomainNotFound(id.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DetectionExhausted(_) | Self::IpSource(_) => ErrorKind::DetectionExhausted,
            Self::Authentication(_) => ErrorKind::AuthError,
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            Self::NotFound(_) => ErrorKind::RecordNotFound,
            Self::InvalidInput(_) | Self::Config(_) => ErrorKind::ValidationError,
            Self::Credential(_) => ErrorKind::CredentialError,
            Self::DomainNotFound(_) => ErrorKind::DomainNotFound,
            Self::Provider { .. } => ErrorKind::ProviderRejected,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Storage(_) | Self::Io(_) | Self::Json(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::auth("bad token").kind(), ErrorKind::AuthError);
        assert_eq!(Error::rate_limited("slow down").kind(), ErrorKind::RateLimited);
        assert_eq!(Error::unavailable("503").kind(), ErrorKind::ProviderUnavailable);
        assert_eq!(Error::not_found("www").kind(), ErrorKind::RecordNotFound);
        assert_eq!(Error::invalid_input("x").kind(), ErrorKind::ValidationError);
        assert_eq!(Error::provider("aliyun", "nope").kind(), ErrorKind::ProviderRejected);
    }

    #[test]
    fn test_deferred_retry() {
        assert!(ErrorKind::RateLimited.is_deferred_retry());
        assert!(ErrorKind::ProviderUnavailable.is_deferred_retry());
        assert!(!ErrorKind::AuthError.is_deferred_retry());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::AuthError).unwrap();
        assert_eq!(json, "\"auth_error\"");
    }
}
