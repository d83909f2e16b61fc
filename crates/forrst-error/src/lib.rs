//! Closed error taxonomy for the Forrst RPC runtime core.
//!
//! Every error the pipeline can surface carries an [`ErrorCode`] — a stable,
//! machine-readable tag — plus a human-readable message, optional cause
//! chain, and arbitrary structured context. The taxonomy is closed: callers
//! cannot construct arbitrary codes, only the ones enumerated here, which
//! keeps the wire-level `code` field and the HTTP status mapping in lock
//! step.
//!
//! Use the builder returned by [`ForrstError::new`] to construct errors
//! fluently, and [`ErrorCode::http_status`] / [`ErrorCode::is_retryable`] to
//! drive transport mapping and retry-guidance derivation.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Envelope parsing, protocol version, function/version resolution, and
    /// argument/extension applicability failures raised before invocation.
    Protocol,
    /// Errors surfaced by or about the invoked function itself.
    Function,
    /// Cross-cutting operational failures (deadlines, rate limits,
    /// dependencies, maintenance).
    Operational,
    /// Atomic-lock primitive failures.
    Lock,
    /// Replay queue failures.
    Replay,
    /// Cancellation broker failures.
    Cancellation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Protocol => "protocol",
            Self::Function => "function",
            Self::Operational => "operational",
            Self::Lock => "lock",
            Self::Replay => "replay",
            Self::Cancellation => "cancellation",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serializes to the `SCREAMING_SNAKE_CASE` string named in the
/// canonical error table. These strings are guaranteed not to change across
/// patch releases; new variants may be added but existing ones never are
/// renamed or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Envelope bytes could not be parsed as a single UTF-8 JSON object.
    ParseError,
    /// Envelope parsed but violates a structural invariant (e.g. a
    /// top-level array, or a missing required member).
    InvalidRequest,
    /// `protocol.version` major component is not supported.
    InvalidProtocolVersion,
    /// `call.function` does not resolve to any registered URN.
    FunctionNotFound,
    /// The requested (or default) version could not be resolved.
    VersionNotFound,
    /// The resolved function is administratively disabled.
    FunctionDisabled,
    /// Argument validation failed.
    InvalidArguments,
    /// Schema-based validation (beyond the pluggable validator) failed.
    SchemaValidationFailed,
    /// A declared extension is not known to the server.
    ExtensionNotSupported,
    /// A declared extension is not applicable to the resolved function.
    ExtensionNotApplicable,
    /// Caller is not authenticated (delegated to transport; surfaced here
    /// only when a function body itself raises it).
    Unauthorized,
    /// Caller is authenticated but not permitted to perform the operation.
    Forbidden,
    /// A domain resource referenced by the function was not found.
    NotFound,
    /// The requested mutation conflicts with current state.
    Conflict,
    /// The requested resource existed but has been permanently removed.
    Gone,
    /// The per-request deadline was exceeded during execution.
    DeadlineExceeded,
    /// The caller has exceeded its rate limit.
    RateLimited,
    /// An unmapped function error or fatal extension failure.
    InternalError,
    /// A dependency is temporarily unavailable.
    Unavailable,
    /// A downstream dependency returned an error.
    DependencyError,
    /// An idempotency key conflicts with a prior, different request.
    IdempotencyConflict,
    /// A request with this idempotency key is still being processed.
    IdempotencyProcessing,
    /// The whole server is in a maintenance window.
    ServerMaintenance,
    /// The resolved function is in a maintenance window.
    FunctionMaintenance,
    /// `release`/`status` referenced a lock key with no record.
    LockNotFound,
    /// `release` was called with an owner token that does not match the
    /// record.
    LockOwnershipMismatch,
    /// `cancel` referenced a token the broker has never issued.
    CancellationTokenUnknown,
    /// `cancel` was called after the target request already reached a
    /// terminal state.
    CancellationTooLate,
    /// A replay lookup referenced an unknown `replay_id`.
    ReplayNotFound,
    /// A replay record's TTL elapsed before it could run.
    ReplayExpired,
    /// A replay record already reached a terminal `completed`/`failed`
    /// state.
    ReplayAlreadyComplete,
    /// A replay record was explicitly cancelled.
    ReplayCancelled,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        use ErrorCode::*;
        match self {
            ParseError | InvalidRequest | InvalidProtocolVersion | FunctionNotFound
            | VersionNotFound | FunctionDisabled | InvalidArguments | SchemaValidationFailed
            | ExtensionNotSupported | ExtensionNotApplicable => ErrorCategory::Protocol,

            Unauthorized | Forbidden | NotFound | Conflict | Gone => ErrorCategory::Function,

            DeadlineExceeded | RateLimited | InternalError | Unavailable | DependencyError
            | IdempotencyConflict | IdempotencyProcessing | ServerMaintenance
            | FunctionMaintenance => ErrorCategory::Operational,

            LockNotFound | LockOwnershipMismatch => ErrorCategory::Lock,

            CancellationTokenUnknown | CancellationTooLate => ErrorCategory::Cancellation,

            ReplayNotFound | ReplayExpired | ReplayAlreadyComplete | ReplayCancelled => {
                ErrorCategory::Replay
            }
        }
    }

    /// Stable `&'static str` representation (e.g. `"PARSE_ERROR"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            ParseError => "PARSE_ERROR",
            InvalidRequest => "INVALID_REQUEST",
            InvalidProtocolVersion => "INVALID_PROTOCOL_VERSION",
            FunctionNotFound => "FUNCTION_NOT_FOUND",
            VersionNotFound => "VERSION_NOT_FOUND",
            FunctionDisabled => "FUNCTION_DISABLED",
            InvalidArguments => "INVALID_ARGUMENTS",
            SchemaValidationFailed => "SCHEMA_VALIDATION_FAILED",
            ExtensionNotSupported => "EXTENSION_NOT_SUPPORTED",
            ExtensionNotApplicable => "EXTENSION_NOT_APPLICABLE",
            Unauthorized => "UNAUTHORIZED",
            Forbidden => "FORBIDDEN",
            NotFound => "NOT_FOUND",
            Conflict => "CONFLICT",
            Gone => "GONE",
            DeadlineExceeded => "DEADLINE_EXCEEDED",
            RateLimited => "RATE_LIMITED",
            InternalError => "INTERNAL_ERROR",
            Unavailable => "UNAVAILABLE",
            DependencyError => "DEPENDENCY_ERROR",
            IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            IdempotencyProcessing => "IDEMPOTENCY_PROCESSING",
            ServerMaintenance => "SERVER_MAINTENANCE",
            FunctionMaintenance => "FUNCTION_MAINTENANCE",
            LockNotFound => "LOCK_NOT_FOUND",
            LockOwnershipMismatch => "LOCK_OWNERSHIP_MISMATCH",
            CancellationTokenUnknown => "CANCELLATION_TOKEN_UNKNOWN",
            CancellationTooLate => "CANCELLATION_TOO_LATE",
            ReplayNotFound => "REPLAY_NOT_FOUND",
            ReplayExpired => "REPLAY_EXPIRED",
            ReplayAlreadyComplete => "REPLAY_ALREADY_COMPLETE",
            ReplayCancelled => "REPLAY_CANCELLED",
        }
    }

    /// `true` if clients may retry a request that failed with this code.
    ///
    /// Mirrors the retryable column of the canonical error table in the
    /// spec's external-interfaces section exactly; drives [`crate`]
    /// consumers such as the runtime's retry-guidance extension.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        use ErrorCode::*;
        matches!(
            self,
            DeadlineExceeded
                | RateLimited
                | InternalError
                | Unavailable
                | DependencyError
                | IdempotencyProcessing
                | ServerMaintenance
                | FunctionMaintenance
        )
    }

    /// The canonical HTTP status code for the one-true HTTP transport
    /// binding. Transports other than HTTP are free to ignore this.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        use ErrorCode::*;
        match self {
            ParseError | InvalidRequest | InvalidProtocolVersion | InvalidArguments
            | ExtensionNotSupported | ExtensionNotApplicable => 400,
            SchemaValidationFailed => 422,
            Unauthorized => 401,
            Forbidden => 403,
            FunctionNotFound | VersionNotFound | NotFound | LockNotFound
            | CancellationTokenUnknown | ReplayNotFound => 404,
            FunctionDisabled | ServerMaintenance | FunctionMaintenance | Unavailable => 503,
            Conflict | IdempotencyConflict | IdempotencyProcessing | LockOwnershipMismatch
            | CancellationTooLate | ReplayAlreadyComplete => 409,
            Gone | ReplayExpired | ReplayCancelled => 410,
            DeadlineExceeded => 408,
            RateLimited => 429,
            InternalError => 500,
            DependencyError => 502,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All 32 error codes, in declaration order. Primarily for exhaustive
/// iteration in tests that assert taxonomy-wide properties.
pub const ALL_CODES: &[ErrorCode] = &[
    ErrorCode::ParseError,
    ErrorCode::InvalidRequest,
    ErrorCode::InvalidProtocolVersion,
    ErrorCode::FunctionNotFound,
    ErrorCode::VersionNotFound,
    ErrorCode::FunctionDisabled,
    ErrorCode::InvalidArguments,
    ErrorCode::SchemaValidationFailed,
    ErrorCode::ExtensionNotSupported,
    ErrorCode::ExtensionNotApplicable,
    ErrorCode::Unauthorized,
    ErrorCode::Forbidden,
    ErrorCode::NotFound,
    ErrorCode::Conflict,
    ErrorCode::Gone,
    ErrorCode::DeadlineExceeded,
    ErrorCode::RateLimited,
    ErrorCode::InternalError,
    ErrorCode::Unavailable,
    ErrorCode::DependencyError,
    ErrorCode::IdempotencyConflict,
    ErrorCode::IdempotencyProcessing,
    ErrorCode::ServerMaintenance,
    ErrorCode::FunctionMaintenance,
    ErrorCode::LockNotFound,
    ErrorCode::LockOwnershipMismatch,
    ErrorCode::CancellationTokenUnknown,
    ErrorCode::CancellationTooLate,
    ErrorCode::ReplayNotFound,
    ErrorCode::ReplayExpired,
    ErrorCode::ReplayAlreadyComplete,
    ErrorCode::ReplayCancelled,
];

// ---------------------------------------------------------------------------
// ErrorSource: pointer XOR position
// ---------------------------------------------------------------------------

/// Where in the request document an error originated.
///
/// Exactly one variant applies per error: a structural/parse failure knows
/// only a byte offset, while an argument-validation failure knows an RFC
/// 6901 JSON pointer rooted at the request document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    /// RFC 6901 JSON pointer into the request document.
    Pointer(String),
    /// Byte offset into the raw request bytes.
    Position(u64),
}

// ---------------------------------------------------------------------------
// ForrstError
// ---------------------------------------------------------------------------

/// A single structured error, matching the wire-level `Error` object.
///
/// # Builder usage
///
/// ```
/// use forrst_error::{ForrstError, ErrorCode, ErrorSource};
///
/// let err = ForrstError::new(ErrorCode::InvalidArguments, "customer_id must not be empty")
///     .with_source(ErrorSource::Pointer("/call/arguments/customer_id".into()))
///     .with_detail("field", "customer_id");
/// ```
pub struct ForrstError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Pointer-or-position locating the error in the request document.
    pub source: Option<ErrorSource>,
    /// Arbitrary structured detail payload.
    pub details: BTreeMap<String, serde_json::Value>,
    /// Optional underlying Rust cause, for in-process diagnostics only.
    /// Never serialized onto the wire.
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ForrstError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            details: BTreeMap::new(),
            cause: None,
        }
    }

    /// Attach a `source.pointer` or `source.position`.
    #[must_use]
    pub fn with_source(mut self, source: ErrorSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach a key-value pair to `details`.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialization
    /// fails the entry is silently skipped, matching the teacher crate's
    /// `with_context` behavior.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.insert(key.into(), v);
        }
        self
    }

    /// Attach an in-process cause (not serialized).
    #[must_use]
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Shorthand for `self.code.category()`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Shorthand for `self.code.is_retryable()`.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Shorthand for `self.code.http_status()`.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }
}

impl fmt::Debug for ForrstError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ForrstError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref s) = self.source {
            d.field("source", s);
        }
        if !self.details.is_empty() {
            d.field("details", &self.details);
        }
        if let Some(ref cause) = self.cause {
            d.field("cause", &cause.to_string());
        }
        d.finish()
    }
}

impl fmt::Display for ForrstError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ForrstError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Wire-level serializable form of a [`ForrstError`] (the `cause` field is
/// dropped; it never crosses the process boundary).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDto {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Location of the error in the request document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,
    /// Arbitrary structured detail payload.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl From<&ForrstError> for ErrorDto {
    fn from(err: &ForrstError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            source: err.source.clone(),
            details: err.details.clone(),
        }
    }
}

impl From<ErrorDto> for ForrstError {
    fn from(dto: ErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: dto.source,
            details: dto.details,
            cause: None,
        }
    }
}
