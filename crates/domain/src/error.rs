//! Categorised gateway errors.
//!
//! Every pipeline stage returns either success or a [`GatewayError`] carrying
//! one of the canonical error codes. The code alone determines the HTTP
//! status and the [`Decision`](crate::log::Decision) recorded in the request
//! log; errors are values, never control flow.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::log::Decision;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error codes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Canonical error codes used in responses and request logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ErrResourceRequired,
    ErrUnknownResource,
    ErrResourceNotConfigured,
    ErrUnsupportedAction,
    ErrMissingAuth,
    ErrInvalidSignature,
    ErrExpiredTimestamp,
    ErrInvalidNonce,
    ErrUnsupportedPopVersion,
    ErrAppNotFound,
    ErrAppDisabled,
    ErrPermissionDenied,
    ErrPermissionExpired,
    ErrConstraintViolation,
    ErrPolicyViolation,
    ErrModelNotAllowed,
    ErrMaxTokensExceeded,
    ErrToolsNotAllowed,
    ErrStreamingNotAllowed,
    ErrRateLimitExceeded,
    ErrBudgetExceeded,
    ErrInvalidRequest,
    ErrInvalidJson,
    ErrContractValidationFailed,
    ErrInternal,
    ErrUpstreamError,
    ErrInvalidPairingString,
    ErrInvalidConnectCode,
    ErrSessionExpired,
}

impl ErrorCode {
    /// The wire representation (`ERR_*`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ErrResourceRequired => "ERR_RESOURCE_REQUIRED",
            Self::ErrUnknownResource => "ERR_UNKNOWN_RESOURCE",
            Self::ErrResourceNotConfigured => "ERR_RESOURCE_NOT_CONFIGURED",
            Self::ErrUnsupportedAction => "ERR_UNSUPPORTED_ACTION",
            Self::ErrMissingAuth => "ERR_MISSING_AUTH",
            Self::ErrInvalidSignature => "ERR_INVALID_SIGNATURE",
            Self::ErrExpiredTimestamp => "ERR_EXPIRED_TIMESTAMP",
            Self::ErrInvalidNonce => "ERR_INVALID_NONCE",
            Self::ErrUnsupportedPopVersion => "ERR_UNSUPPORTED_POP_VERSION",
            Self::ErrAppNotFound => "ERR_APP_NOT_FOUND",
            Self::ErrAppDisabled => "ERR_APP_DISABLED",
            Self::ErrPermissionDenied => "ERR_PERMISSION_DENIED",
            Self::ErrPermissionExpired => "ERR_PERMISSION_EXPIRED",
            Self::ErrConstraintViolation => "ERR_CONSTRAINT_VIOLATION",
            Self::ErrPolicyViolation => "ERR_POLICY_VIOLATION",
            Self::ErrModelNotAllowed => "ERR_MODEL_NOT_ALLOWED",
            Self::ErrMaxTokensExceeded => "ERR_MAX_TOKENS_EXCEEDED",
            Self::ErrToolsNotAllowed => "ERR_TOOLS_NOT_ALLOWED",
            Self::ErrStreamingNotAllowed => "ERR_STREAMING_NOT_ALLOWED",
            Self::ErrRateLimitExceeded => "ERR_RATE_LIMIT_EXCEEDED",
            Self::ErrBudgetExceeded => "ERR_BUDGET_EXCEEDED",
            Self::ErrInvalidRequest => "ERR_INVALID_REQUEST",
            Self::ErrInvalidJson => "ERR_INVALID_JSON",
            Self::ErrContractValidationFailed => "ERR_CONTRACT_VALIDATION_FAILED",
            Self::ErrInternal => "ERR_INTERNAL",
            Self::ErrUpstreamError => "ERR_UPSTREAM_ERROR",
            Self::ErrInvalidPairingString => "ERR_INVALID_PAIRING_STRING",
            Self::ErrInvalidConnectCode => "ERR_INVALID_CONNECT_CODE",
            Self::ErrSessionExpired => "ERR_SESSION_EXPIRED",
        }
    }

    /// Default HTTP status for this code. Adapter-mapped upstream errors may
    /// override it via [`GatewayError::status_override`].
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ErrMissingAuth
            | Self::ErrInvalidSignature
            | Self::ErrExpiredTimestamp
            | Self::ErrInvalidNonce
            | Self::ErrUnsupportedPopVersion
            | Self::ErrAppNotFound => 401,

            Self::ErrAppDisabled
            | Self::ErrPermissionDenied
            | Self::ErrPermissionExpired
            | Self::ErrPolicyViolation
            | Self::ErrModelNotAllowed
            | Self::ErrMaxTokensExceeded
            | Self::ErrToolsNotAllowed
            | Self::ErrStreamingNotAllowed => 403,

            Self::ErrRateLimitExceeded | Self::ErrBudgetExceeded => 429,

            Self::ErrResourceRequired
            | Self::ErrConstraintViolation
            | Self::ErrInvalidRequest
            | Self::ErrInvalidJson
            | Self::ErrContractValidationFailed
            | Self::ErrInvalidPairingString
            | Self::ErrInvalidConnectCode => 400,

            Self::ErrUnknownResource | Self::ErrUnsupportedAction => 404,

            Self::ErrSessionExpired => 410,

            Self::ErrUpstreamError => 502,

            Self::ErrResourceNotConfigured | Self::ErrInternal => 500,
        }
    }

    /// The request-log decision this code maps to.
    pub fn decision(&self) -> Decision {
        match self {
            Self::ErrMissingAuth
            | Self::ErrInvalidSignature
            | Self::ErrExpiredTimestamp
            | Self::ErrInvalidNonce
            | Self::ErrUnsupportedPopVersion
            | Self::ErrAppNotFound => Decision::DeniedAuth,

            Self::ErrAppDisabled | Self::ErrPermissionDenied | Self::ErrPermissionExpired => {
                Decision::DeniedPermission
            }

            Self::ErrPolicyViolation
            | Self::ErrModelNotAllowed
            | Self::ErrMaxTokensExceeded
            | Self::ErrToolsNotAllowed
            | Self::ErrStreamingNotAllowed
            | Self::ErrConstraintViolation
            | Self::ErrInvalidRequest
            | Self::ErrInvalidJson
            | Self::ErrContractValidationFailed => Decision::DeniedConstraint,

            Self::ErrRateLimitExceeded => Decision::DeniedRateLimit,
            Self::ErrBudgetExceeded => Decision::DeniedBudget,

            _ => Decision::Error,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GatewayError
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A categorised failure produced by any pipeline stage.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct GatewayError {
    pub code: ErrorCode,
    pub message: String,
    /// Clients may retry when `true` (provider 429/5xx). The gateway itself
    /// never retries.
    pub retryable: bool,
    /// Upstream HTTP status mapped by the adapter, when it differs from the
    /// code's default.
    pub status_override: Option<u16>,
    /// Extra machine-readable context (e.g. `resetAt` for rate limits).
    pub details: Option<serde_json::Value>,
}

impl GatewayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: false,
            status_override: None,
            details: None,
        }
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_override = Some(status);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Effective HTTP status (override wins).
    pub fn http_status(&self) -> u16 {
        self.status_override.unwrap_or_else(|| self.code.http_status())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ErrInternal, message)
    }

    /// The inbound request was cancelled (client disconnect or deadline).
    /// Logged as `decision=ERROR`, `reason="cancelled"`.
    pub fn cancelled() -> Self {
        Self::new(ErrorCode::ErrInternal, "cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::ErrInternal && self.message == "cancelled"
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
