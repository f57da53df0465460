//! Error handling module for the Dynamics 365 gateway
//!
//! Two error families matter to callers: locally detected validation
//! failures (raised before any network I/O) and remote rejections that the
//! Dynamics Web API reports through its structured OData error envelope.
//! Everything else (DNS failures, timeouts, non-JSON bodies) surfaces as a
//! transport-class error so callers can distinguish "your input was
//! rejected" from "the remote system is unavailable".

use crate::validation::Violation;
use serde_json::Value;
use thiserror::Error;

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error types for the Dynamics 365 gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Missing or malformed gateway configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The client-credentials exchange was rejected or unreachable
    #[error("Authentication error: {message}")]
    Authentication { message: String },

    /// Locally detected validation failures. The message joins every
    /// violation line; callers should inspect `violations` instead of
    /// parsing the rendered string.
    #[error("{}", join_violations(.violations))]
    Validation {
        violations: Vec<Violation>,
        provided_fields: Vec<String>,
    },

    /// Dynamics rejected the request with a structured OData error body
    #[error("Dynamics 365 rejected the request: {message}")]
    RemoteValidation { message: String, body: Value },

    /// Non-2xx response without a structured error envelope
    #[error("External API error: {status} - {message}")]
    ExternalApi { status: u16, message: String },

    /// Network-level failure from the HTTP client
    #[error("Transport error: {source}")]
    Transport {
        #[from]
        source: reqwest::Error,
    },

    /// Serialization/deserialization failure
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// Internal gateway errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.message.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

impl GatewayError {
    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new authentication error
    pub fn authentication<S: Into<String>>(message: S) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a new validation error from a list of violations
    pub fn validation(violations: Vec<Violation>, provided_fields: Vec<String>) -> Self {
        Self::Validation {
            violations,
            provided_fields,
        }
    }

    /// Create a validation error for a single field
    pub fn invalid_field<S1, S2>(field: S1, rule: &'static str, message: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        let field = field.into();
        Self::Validation {
            violations: vec![Violation {
                field: field.clone(),
                rule,
                message: message.into(),
            }],
            provided_fields: vec![field],
        }
    }

    /// Create a new remote validation error carrying the raw provider body
    pub fn remote_validation<S: Into<String>>(message: S, body: Value) -> Self {
        Self::RemoteValidation {
            message: message.into(),
            body,
        }
    }

    /// Create a new external API error
    pub fn external_api<S: Into<String>>(status: u16, message: S) -> Self {
        Self::ExternalApi {
            status,
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The offending field, when exactly one violation was recorded
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { violations, .. } if violations.len() == 1 => {
                Some(violations[0].field.as_str())
            }
            _ => None,
        }
    }

    /// Structured violation list for validation errors
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Validation { violations, .. } => violations,
            _ => &[],
        }
    }

    /// Whether this error means the input was rejected (locally or remotely)
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::RemoteValidation { .. })
    }

    /// Get the error code for this error (for logging and API responses)
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Authentication { .. } => "AUTHENTICATION_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::RemoteValidation { .. } => "REMOTE_VALIDATION_ERROR",
            Self::ExternalApi { .. } => "EXTERNAL_API_ERROR",
            Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::Serialization { .. } => "SERIALIZATION_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Check if this error is retryable. The gateway itself never retries;
    /// this classification is for the caller's retry policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::ExternalApi { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
