//! Error types for buddy client operations

use std::time::Duration;
use thiserror::Error;

/// Remote resource errors.
///
/// This is the closed taxonomy every backend call is translated into.
/// Transport-specific shapes (reqwest errors, raw status codes, response
/// bodies) never cross this boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// Backend unreachable, connection reset, or request timed out.
    #[error("Network error: {reason}")]
    Network { reason: String },

    /// 401/403: credentials missing, expired or rejected.
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// 429: caller should back off.
    #[error("Rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    /// 5xx, or a success response whose body did not match the expected shape.
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// 404: the resource does not exist.
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// Any other 4xx, or input rejected before the request was sent.
    #[error("Validation failed ({status}): {message}")]
    Validation { status: u16, message: String },
}

impl ApiError {
    pub fn network(reason: impl Into<String>) -> Self {
        Self::Network {
            reason: reason.into(),
        }
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Translate a non-success HTTP status into the taxonomy.
    ///
    /// `resource` names the request target for `NotFound`; `message` is the
    /// best human-readable text extracted from the response body.
    pub fn from_status(
        status: u16,
        resource: &str,
        message: impl Into<String>,
        retry_after_ms: Option<u64>,
    ) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Auth { message },
            404 => Self::NotFound {
                resource: resource.to_string(),
            },
            429 => Self::RateLimited { retry_after_ms },
            500..=599 => Self::Server { status, message },
            _ => Self::Validation { status, message },
        }
    }

    /// Whether a caller-driven retry can reasonably succeed.
    ///
    /// Nothing in this workspace retries automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::RateLimited { .. } | Self::Server { .. }
        )
    }

    /// Whether the error should trigger re-authentication.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// HTTP status associated with the error, when there is one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Network { .. } => None,
            Self::Auth { .. } => Some(401),
            Self::RateLimited { .. } => Some(429),
            Self::Server { status, .. } | Self::Validation { status, .. } => Some(*status),
            Self::NotFound { .. } => Some(404),
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

/// Input rejected locally, before any request is issued.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::Validation {
            status: 400,
            message: err.to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or BUDDY_CONFIG)")]
    MissingConfigPath,

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Master error type for all buddy client errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuddyError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for buddy client operations.
pub type BuddyResult<T> = Result<T, BuddyError>;

// =============================================================================
// TESTS
// =============================================================================
