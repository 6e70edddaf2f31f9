//! Error handling for Monitra Core.
//!
//! This module provides:
//! - A single error type with context and chaining
//! - Stable error codes for machine-readable responses
//! - User-facing messages kept apart from internal details
//! - Retry classification used by the job workers
//! - Error logging and metrics integration
//!
//! # Usage
//!
//! ```rust,ignore
//! use monitra_core::error::{MonitraError, Result, ErrorContext};
//!
//! fn load() -> Result<()> {
//!     read_something()
//!         .context("Failed to read endpoint definitions")?;
//!     Ok(())
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Monitra operations.
pub type Result<T> = std::result::Result<T, MonitraError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable; the gateway in front of the core maps them to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Endpoint Errors (1000-1099)
    EndpointNotFound,
    InvalidTarget,
    IntervalOutOfRange,

    // Scheduling & Queue Errors (1100-1199)
    QueueError,
    QueueConnectionFailed,
    JobPayloadInvalid,

    // Probe & Notification Errors (1200-1299)
    ProbeUnavailable,
    MailDeliveryFailed,
    TemplateError,

    // Database Errors (2000-2099)
    DatabaseError,
    DatabaseConnectionFailed,
    DatabaseQueryFailed,
    RecordNotFound,
    DuplicateRecord,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,

    // External Service Errors (3000-3099)
    ExternalServiceError,
    NetworkError,
    Timeout,

    // Validation Errors (4100-4199)
    ValidationError,
    InvalidInput,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
    UnknownError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::EndpointNotFound => 1000,
            Self::InvalidTarget => 1001,
            Self::IntervalOutOfRange => 1002,

            Self::QueueError => 1100,
            Self::QueueConnectionFailed => 1101,
            Self::JobPayloadInvalid => 1102,

            Self::ProbeUnavailable => 1200,
            Self::MailDeliveryFailed => 1201,
            Self::TemplateError => 1202,

            Self::DatabaseError => 2000,
            Self::DatabaseConnectionFailed => 2001,
            Self::DatabaseQueryFailed => 2002,
            Self::RecordNotFound => 2004,
            Self::DuplicateRecord => 2005,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::ExternalServiceError => 3000,
            Self::NetworkError => 3001,
            Self::Timeout => 3002,

            Self::ValidationError => 4100,
            Self::InvalidInput => 4101,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            Self::InternalError => 9000,
            Self::UnknownError => 9099,
        }
    }

    /// Get the HTTP status code the gateway should answer with.
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::EndpointNotFound | Self::RecordNotFound => 404,

            Self::DuplicateRecord => 409,

            Self::InvalidTarget
            | Self::IntervalOutOfRange
            | Self::ValidationError
            | Self::InvalidInput => 422,

            Self::Timeout => 504,

            Self::DatabaseConnectionFailed
            | Self::QueueConnectionFailed
            | Self::ExternalServiceError
            | Self::ProbeUnavailable => 503,

            Self::NetworkError | Self::MailDeliveryFailed => 502,

            Self::QueueError
            | Self::JobPayloadInvalid
            | Self::TemplateError
            | Self::DatabaseError
            | Self::DatabaseQueryFailed
            | Self::SerializationError
            | Self::DeserializationError
            | Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InvalidConfiguration
            | Self::InternalError
            | Self::UnknownError => 500,
        }
    }

    /// Check if this error is transient and worth retrying.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseConnectionFailed
                | Self::DatabaseQueryFailed
                | Self::DatabaseError
                | Self::QueueConnectionFailed
                | Self::QueueError
                | Self::NetworkError
                | Self::ExternalServiceError
                | Self::Timeout
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "endpoint",
            1100..=1199 => "queue",
            1200..=1299 => "delivery",
            2000..=2099 => "database",
            2200..=2299 => "serialization",
            3000..=3099 => "external_service",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad input, unknown ids)
    Low,
    /// Operational issues (timeouts, a mail relay refusing a message)
    Medium,
    /// System errors (queries failing, corrupt payloads)
    High,
    /// Infrastructure unreachable
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::ValidationError
            | ErrorCode::InvalidInput
            | ErrorCode::InvalidTarget
            | ErrorCode::IntervalOutOfRange
            | ErrorCode::EndpointNotFound
            | ErrorCode::RecordNotFound
            | ErrorCode::DuplicateRecord => Self::Low,

            ErrorCode::Timeout
            | ErrorCode::MailDeliveryFailed
            | ErrorCode::ProbeUnavailable
            | ErrorCode::NetworkError
            | ErrorCode::ExternalServiceError => Self::Medium,

            ErrorCode::DatabaseError
            | ErrorCode::DatabaseQueryFailed
            | ErrorCode::QueueError
            | ErrorCode::JobPayloadInvalid
            | ErrorCode::TemplateError
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::DatabaseConnectionFailed
            | ErrorCode::QueueConnectionFailed
            | ErrorCode::InternalError
            | ErrorCode::UnknownError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (endpoint, job, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Monitra Core.
#[derive(Error, Debug)]
pub struct MonitraError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for MonitraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl MonitraError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create a not found error.
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        Self::new(
            ErrorCode::RecordNotFound,
            format!("{} not found: {}", entity_type, entity_id),
        )
        .with_details(ErrorDetails::new().with_entity(&entity_type, &entity_id))
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "monitra_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Response Body
// ═══════════════════════════════════════════════════════════════════════════════

/// Error body handed to the gateway layer.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false for errors
    pub success: bool,

    pub error: ErrorInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub numeric_code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&MonitraError> for ErrorResponse {
    fn from(error: &MonitraError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: if error.details.context.is_empty() && error.details.entity_id.is_none() {
                    None
                } else {
                    Some(error.details.clone())
                },
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| MonitraError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| MonitraError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| MonitraError::new(ErrorCode::RecordNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| MonitraError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for MonitraError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::RowNotFound => (
                ErrorCode::RecordNotFound,
                "The requested record was not found",
            ),
            sqlx::Error::Database(db_err) => {
                if let Some(constraint) = db_err.constraint() {
                    if constraint.contains("unique") || constraint.contains("pkey") {
                        return Self::with_internal(
                            ErrorCode::DuplicateRecord,
                            "A record with this identifier already exists",
                            format!("Constraint violation: {}", constraint),
                        )
                        .with_source(error);
                    }
                }
                (ErrorCode::DatabaseQueryFailed, "A database error occurred")
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => (
                ErrorCode::DatabaseConnectionFailed,
                "Unable to connect to the database",
            ),
            _ => (ErrorCode::DatabaseError, "A database error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<redis::RedisError> for MonitraError {
    fn from(error: redis::RedisError) -> Self {
        let (code, user_msg) = if error.is_connection_refusal() || error.is_connection_dropped() {
            (ErrorCode::QueueConnectionFailed, "Unable to connect to the queue")
        } else if error.is_timeout() {
            (ErrorCode::QueueError, "Queue operation timed out")
        } else {
            (ErrorCode::QueueError, "A queue error occurred")
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for MonitraError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<reqwest::Error> for MonitraError {
    fn from(error: reqwest::Error) -> Self {
        let (code, user_msg) = if error.is_timeout() {
            (ErrorCode::Timeout, "External service request timed out")
        } else if error.is_connect() {
            (ErrorCode::NetworkError, "Failed to connect to external service")
        } else if error.is_status() {
            (ErrorCode::ExternalServiceError, "External service returned an error")
        } else {
            (ErrorCode::NetworkError, "Network error occurred")
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<tera::Error> for MonitraError {
    fn from(error: tera::Error) -> Self {
        Self::with_internal(
            ErrorCode::TemplateError,
            "Failed to render notification template",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for MonitraError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(ErrorCode::Timeout, "Operation timed out", error.to_string())
            .with_source(error)
    }
}

impl From<std::io::Error> for MonitraError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, user_msg) = match error.kind() {
            ErrorKind::TimedOut => (ErrorCode::Timeout, "Operation timed out"),
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
                (ErrorCode::NetworkError, "Connection failed")
            }
            _ => (ErrorCode::InternalError, "An I/O error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<anyhow::Error> for MonitraError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<MonitraError>() {
            Ok(monitra_error) => monitra_error,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for MonitraError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl MonitraError {
    /// Create an endpoint not found error.
    pub fn endpoint_not_found(endpoint_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::EndpointNotFound,
            format!("Endpoint not found: {}", endpoint_id),
        )
        .with_details(ErrorDetails::new().with_entity("endpoint", endpoint_id.to_string()))
    }

    /// Create an invalid target error.
    pub fn invalid_target(target: impl Into<String>, reason: impl Into<String>) -> Self {
        let target = target.into();
        Self::new(
            ErrorCode::InvalidTarget,
            format!("Invalid target '{}': {}", target, reason.into()),
        )
        .with_context("target", &target)
    }

    /// Create an interval out of range error.
    pub fn interval_out_of_range(interval_secs: u64, min_secs: u64, max_secs: u64) -> Self {
        Self::new(
            ErrorCode::IntervalOutOfRange,
            format!(
                "Check interval {}s is outside the allowed range {}s..={}s",
                interval_secs, min_secs, max_secs
            ),
        )
        .with_context("interval_secs", interval_secs)
        .with_context("min_secs", min_secs)
        .with_context("max_secs", max_secs)
    }

    /// Create an invalid job payload error.
    pub fn job_payload_invalid(queue: &str, reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::JobPayloadInvalid,
            format!("Invalid payload on queue {}: {}", queue, reason.into()),
        )
        .with_context("queue", queue)
    }

    /// Create a mail delivery error.
    pub fn mail_delivery_failed(recipient: &str, reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::MailDeliveryFailed,
            format!("Failed to deliver mail to {}: {}", recipient, reason.into()),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::EndpointNotFound.http_status(), 404);
        assert_eq!(ErrorCode::IntervalOutOfRange.http_status(), 422);
        assert_eq!(ErrorCode::InternalError.http_status(), 500);
        assert_eq!(ErrorCode::DatabaseConnectionFailed.http_status(), 503);
    }

    #[test]
    fn test_error_code_is_retryable() {
        assert!(ErrorCode::DatabaseConnectionFailed.is_retryable());
        assert!(ErrorCode::QueueError.is_retryable());
        assert!(!ErrorCode::ValidationError.is_retryable());
        assert!(!ErrorCode::EndpointNotFound.is_retryable());
        assert!(!ErrorCode::JobPayloadInvalid.is_retryable());
    }

    #[test]
    fn test_error_creation() {
        let error = MonitraError::endpoint_not_found(uuid::Uuid::new_v4());
        assert_eq!(error.code(), ErrorCode::EndpointNotFound);
        assert_eq!(error.http_status(), 404);
        assert!(!error.is_retryable());
        assert_eq!(error.details().entity_type.as_deref(), Some("endpoint"));
    }

    #[test]
    fn test_interval_error_context() {
        let error = MonitraError::interval_out_of_range(10, 30, 86400);
        assert_eq!(error.code(), ErrorCode::IntervalOutOfRange);
        assert!(error.details().context.contains_key("min_secs"));
        assert!(error.user_message().contains("10s"));
    }

    #[test]
    fn test_error_response_serialization() {
        let error = MonitraError::validation("Name must not be empty");
        let response = ErrorResponse::from(&error);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("VALIDATION_ERROR"));
        assert!(json.contains("Name must not be empty"));
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::ValidationError),
            ErrorSeverity::Low
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::Timeout),
            ErrorSeverity::Medium
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::DatabaseQueryFailed),
            ErrorSeverity::High
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::QueueConnectionFailed),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_option_context() {
        let missing: Option<u32> = None;
        let error = missing.context("no such endpoint").unwrap_err();
        assert_eq!(error.code(), ErrorCode::RecordNotFound);
    }

    #[test]
    fn test_error_display() {
        let error = MonitraError::with_internal(
            ErrorCode::DatabaseError,
            "Database connection failed",
            "Connection refused: localhost:5432",
        );

        let display = format!("{}", error);
        assert!(display.contains("DatabaseError"));
        assert!(display.contains("Database connection failed"));
        assert!(display.contains("Connection refused"));
    }
}
