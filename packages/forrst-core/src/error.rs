//! Error taxonomy shared by every Forrst component.
//!
//! [`ErrorCode`] is the closed set of machine-readable codes that travel on the
//! wire. [`ForrstError`] is the protocol-level error type: every failure that
//! reaches a client is first expressed as a `ForrstError` and then rendered into
//! an [`ErrorEntry`] via [`ForrstError::to_error_entry`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::envelope::{ErrorEntry, ErrorSource};

/// Machine-readable error codes.
///
/// Serialized as `SCREAMING_SNAKE_CASE` strings (e.g. `"FUNCTION_NOT_FOUND"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    FunctionNotFound,
    VersionNotFound,
    Conflict,
    ReservedNamespace,
    InvalidArguments,
    SchemaValidationFailed,
    Unauthorized,
    Forbidden,
    RateLimited,
    DeadlineExceeded,
    OperationNotFound,
    OperationCannotCancel,
    InvalidOperationState,
    InternalError,
    Unavailable,
}

impl ErrorCode {
    /// Wire representation of the code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::FunctionNotFound => "FUNCTION_NOT_FOUND",
            Self::VersionNotFound => "VERSION_NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::ReservedNamespace => "RESERVED_NAMESPACE",
            Self::InvalidArguments => "INVALID_ARGUMENTS",
            Self::SchemaValidationFailed => "SCHEMA_VALIDATION_FAILED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::RateLimited => "RATE_LIMITED",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::OperationNotFound => "OPERATION_NOT_FOUND",
            Self::OperationCannotCancel => "OPERATION_CANNOT_CANCEL",
            Self::InvalidOperationState => "INVALID_OPERATION_STATE",
            Self::InternalError => "INTERNAL_ERROR",
            Self::Unavailable => "UNAVAILABLE",
        }
    }

    /// Whether a client may retry the same request later and expect a different outcome.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::DeadlineExceeded | Self::Unavailable | Self::InternalError
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message sent to clients in place of any internal fault description.
pub const REDACTED_INTERNAL_MESSAGE: &str = "Internal server error";

/// Protocol-level error.
///
/// Display strings are client-safe for every variant except [`ForrstError::Internal`],
/// whose message is replaced by [`REDACTED_INTERNAL_MESSAGE`] on the wire.
#[derive(Debug, thiserror::Error)]
pub enum ForrstError {
    #[error("parse error: {message}")]
    Parse { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest {
        message: String,
        pointer: Option<String>,
    },

    #[error("function not found: {function}")]
    FunctionNotFound { function: String },

    #[error("no matching version of {function} for selector {}", .selector.as_deref().unwrap_or("<latest stable>"))]
    VersionNotFound {
        function: String,
        selector: Option<String>,
    },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("namespace is reserved for system functions: {urn}")]
    ReservedNamespace { urn: String },

    #[error("invalid arguments: {message}")]
    InvalidArguments {
        message: String,
        pointer: Option<String>,
    },

    #[error("schema validation failed: {message}")]
    SchemaValidationFailed { message: String, details: Map<String, Value> },

    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        details: Map<String, Value>,
    },

    #[error("deadline of {timeout_ms}ms exceeded")]
    DeadlineExceeded { timeout_ms: u64 },

    #[error("operation not found: {id}")]
    OperationNotFound { id: String },

    #[error("operation {id} cannot be cancelled in status {status}")]
    OperationCannotCancel { id: String, status: String },

    #[error("operation {id} is {status}; cannot {action}")]
    InvalidOperationState {
        id: String,
        status: String,
        action: String,
    },

    #[error("service unavailable: {message}")]
    Unavailable { message: String },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ForrstError {
    /// Shorthand for an `InvalidRequest` pointing at `pointer`.
    pub fn invalid_request(message: impl Into<String>, pointer: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            pointer: Some(pointer.into()),
        }
    }

    /// Shorthand for an `InvalidArguments` without a source pointer.
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
            pointer: None,
        }
    }

    /// The wire code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Parse { .. } => ErrorCode::ParseError,
            Self::InvalidRequest { .. } => ErrorCode::InvalidRequest,
            Self::FunctionNotFound { .. } => ErrorCode::FunctionNotFound,
            Self::VersionNotFound { .. } => ErrorCode::VersionNotFound,
            Self::Conflict { .. } => ErrorCode::Conflict,
            Self::ReservedNamespace { .. } => ErrorCode::ReservedNamespace,
            Self::InvalidArguments { .. } => ErrorCode::InvalidArguments,
            Self::SchemaValidationFailed { .. } => ErrorCode::SchemaValidationFailed,
            Self::Unauthorized { .. } => ErrorCode::Unauthorized,
            Self::Forbidden { .. } => ErrorCode::Forbidden,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
            Self::OperationNotFound { .. } => ErrorCode::OperationNotFound,
            Self::OperationCannotCancel { .. } => ErrorCode::OperationCannotCancel,
            Self::InvalidOperationState { .. } => ErrorCode::InvalidOperationState,
            Self::Unavailable { .. } => ErrorCode::Unavailable,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Renders the error as a client-facing [`ErrorEntry`].
    ///
    /// Internal faults are logged with their full cause chain and replaced by a
    /// generic message so credentials, hostnames and backtraces never leave the server.
    #[must_use]
    pub fn to_error_entry(&self) -> ErrorEntry {
        let code = self.code();
        let mut entry = match self {
            Self::Internal(err) => {
                tracing::error!(error = ?err, "internal error redacted from response");
                return ErrorEntry::new(code, REDACTED_INTERNAL_MESSAGE);
            }
            _ => ErrorEntry::new(code, self.to_string()),
        };

        match self {
            Self::InvalidRequest {
                pointer: Some(pointer),
                ..
            }
            | Self::InvalidArguments {
                pointer: Some(pointer),
                ..
            } => {
                entry.source = Some(ErrorSource::pointer(pointer.clone()));
            }
            Self::VersionNotFound { function, selector } => {
                entry.details = Some(object(json!({
                    "function": function,
                    "version": selector,
                })));
            }
            Self::SchemaValidationFailed { details, .. } | Self::RateLimited { details, .. }
                if !details.is_empty() =>
            {
                entry.details = Some(details.clone());
            }
            Self::DeadlineExceeded { timeout_ms } => {
                entry.details = Some(object(json!({
                    "timeout": { "value": timeout_ms, "unit": "millisecond" },
                })));
            }
            Self::OperationNotFound { id }
            | Self::OperationCannotCancel { id, .. }
            | Self::InvalidOperationState { id, .. } => {
                entry.details = Some(object(json!({ "operation_id": id })));
            }
            _ => {}
        }
        entry
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
