//! Error types for ticketero.
//!
//! This module defines `TicketeroError`, the unified error type used
//! throughout the application for consistent error handling and propagation.
//!
//! # Security
//!
//! All error messages are sanitized to ensure GLPI tokens are never leaked
//! in logs or user-facing replies. Use `sanitize_message()` when constructing
//! error messages from external sources.

use thiserror::Error;

/// Unified error type for all ticketero operations.
///
/// Each variant provides specific context about the failure, enabling
/// meaningful user-facing messages without leaking sensitive information
/// like API tokens.
#[derive(Error, Debug)]
pub enum TicketeroError {
    /// Configuration error - missing or invalid environment variables,
    /// or the ticketing backend is not configured at all.
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP request failed during transmission.
    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),

    /// HTTP client initialization failed.
    #[error("HTTP client error: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// HTTP response returned a non-success status code.
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        /// The HTTP status code returned.
        status: reqwest::StatusCode,
        /// The response body, potentially containing error details.
        body: String,
    },

    /// GLPI rejected the request at the API level.
    #[error("GLPI error {code}: {message}")]
    GlpiApi {
        /// GLPI error code string (e.g., "ERROR_ITEM_NOT_FOUND").
        code: String,
        /// Human-readable message from GLPI.
        message: String,
    },

    /// GLPI rejected a configured search-field id.
    ///
    /// Not retryable: the field-id configuration (or auto-detection) is
    /// wrong and every retry would fail the same way.
    #[error("invalid search field {field_id}: {message}")]
    InvalidFieldMapping {
        /// The numeric search-option id GLPI rejected.
        field_id: u32,
        /// The backend's verbatim complaint.
        message: String,
    },

    /// The GLPI session token expired or was rejected.
    ///
    /// The client retries exactly once with a fresh login before
    /// surfacing this.
    #[error("GLPI session token rejected")]
    InvalidSession,

    /// Authentication failed - likely an invalid app or user token.
    #[error("authentication failed - check GLPI_APP_TOKEN and GLPI_USER_TOKEN")]
    Authentication,

    /// JSON serialization or deserialization failed.
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Input validation failed.
    #[error("validation error: {0}")]
    Validation(String),

    /// The messaging channel failed to deliver an outbound action.
    #[error("channel error: {0}")]
    Channel(String),
}

impl TicketeroError {
    /// Creates a configuration error for a missing environment variable.
    pub fn missing_env(var_name: &str) -> Self {
        TicketeroError::Config(format!(
            "missing required environment variable: {}",
            var_name
        ))
    }

    /// Creates a configuration error for an invalid value.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        TicketeroError::Config(message.into())
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        TicketeroError::Validation(message.into())
    }

    /// Creates a GLPI API error.
    pub fn glpi_api(code: impl Into<String>, message: impl Into<String>) -> Self {
        TicketeroError::GlpiApi {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a channel delivery error.
    pub fn channel(message: impl Into<String>) -> Self {
        TicketeroError::Channel(message.into())
    }

    /// Returns true if this error means the GLPI session token must be
    /// refreshed before the request can succeed.
    #[must_use]
    pub fn is_invalid_session(&self) -> bool {
        match self {
            TicketeroError::InvalidSession => true,
            TicketeroError::GlpiApi { code, .. } => code == "ERROR_SESSION_TOKEN_INVALID",
            TicketeroError::HttpStatus { status, .. } => status.as_u16() == 401,
            _ => false,
        }
    }

    /// Returns true if the user can recover by sending different input
    /// (as opposed to an operational failure the user cannot fix).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TicketeroError::Validation(_))
    }

    /// Sanitizes a message to remove any occurrence of the given secrets.
    ///
    /// Tokens must never appear in logs, error messages, or replies sent
    /// back over the messaging channel.
    #[must_use]
    pub fn sanitize_message(message: &str, secrets: &[&str]) -> String {
        let mut out = message.to_string();
        for secret in secrets {
            if !secret.is_empty() {
                out = out.replace(secret, "[REDACTED]");
            }
        }
        out
    }
}
