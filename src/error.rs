//! Error taxonomy for outbound calls.
//!
//! Every failure a caller can observe maps onto one [`ErrorCode`], so callers branch on
//! `err.code()` (and `err.status()` for `HTTP_STATUS`) instead of matching message text.
//!
//! Classes:
//! - configuration: `INVALID_ARGUMENT`, `CONFIG_ERROR` (never retried)
//! - admission: `RATE_LIMITED`, `CIRCUIT_OPEN`, `BULKHEAD_REJECTED` (no transport call, no retry)
//! - transport: `CONNECT_TIMEOUT`, `READ_TIMEOUT`, `TOTAL_TIMEOUT`, `TIMEOUT`, `NETWORK_ERROR`
//!   (retried per policy)
//! - payload: `RESPONSE_TOO_LARGE`, `SERIALIZATION_ERROR` (never retried)
//! - status: `HTTP_STATUS` (raised only when `fail_on_non_2xx` is set)

use crate::response::Response;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T, E = HttpError> = std::result::Result<T, E>;

/// Fieldless discriminant of [`HttpError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCode {
    InvalidArgument,
    ConfigError,
    ConnectTimeout,
    ReadTimeout,
    TotalTimeout,
    Timeout,
    NetworkError,
    HttpStatus,
    ResponseTooLarge,
    SerializationError,
    RateLimited,
    CircuitOpen,
    BulkheadRejected,
}

impl ErrorCode {
    /// Stable wire name, e.g. `"CIRCUIT_OPEN"`.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::ConnectTimeout => "CONNECT_TIMEOUT",
            ErrorCode::ReadTimeout => "READ_TIMEOUT",
            ErrorCode::TotalTimeout => "TOTAL_TIMEOUT",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::HttpStatus => "HTTP_STATUS",
            ErrorCode::ResponseTooLarge => "RESPONSE_TOO_LARGE",
            ErrorCode::SerializationError => "SERIALIZATION_ERROR",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::BulkheadRejected => "BULKHEAD_REJECTED",
        }
    }

    /// Any of the four timeout codes.
    pub fn is_timeout(self) -> bool {
        matches!(
            self,
            ErrorCode::ConnectTimeout
                | ErrorCode::ReadTimeout
                | ErrorCode::TotalTimeout
                | ErrorCode::Timeout
        )
    }

    /// Admission gates that reject before any transport activity.
    pub fn is_rejection(self) -> bool {
        matches!(self, ErrorCode::RateLimited | ErrorCode::CircuitOpen | ErrorCode::BulkheadRejected)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Unified error returned by [`HttpRuntime::execute`](crate::HttpRuntime::execute).
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    /// Caller supplied an unusable value (bad header, bad URL, invalid config field).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Runtime misuse: unknown client, double init, factory failure.
    #[error("configuration error: {0}")]
    Config(String),
    /// Connection could not be established in time.
    #[error("connect timed out after {timeout:?}")]
    ConnectTimeout { timeout: Duration },
    /// The transport did not complete within the read timeout.
    #[error("read timed out after {timeout:?}")]
    ReadTimeout { timeout: Duration },
    /// The transport exceeded its total per-attempt budget.
    #[error("total timeout of {timeout:?} exceeded")]
    TotalTimeout { timeout: Duration },
    /// Unclassified timeout reported by the transport.
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// I/O or protocol failure below HTTP.
    #[error("network error: {0}")]
    Network(String),
    /// Final status was not 2xx and `fail_on_non_2xx` is set.
    #[error("unexpected HTTP status {status}")]
    HttpStatus { status: u16, response: Box<Response> },
    /// Response body exceeded `max_response_body_bytes`.
    #[error("response body of {actual} bytes exceeds limit of {limit} bytes")]
    ResponseTooLarge { limit: u64, actual: u64 },
    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The client's token bucket is empty.
    #[error("rate limit exceeded for client '{client}' (next token in {retry_in:?})")]
    RateLimited { client: String, retry_in: Duration },
    /// The client's circuit breaker is failing fast.
    #[error("circuit breaker open for client '{client}' (open for {open_for:?})")]
    CircuitOpen { client: String, open_for: Duration },
    /// The client's bulkhead has no free permit or queue slot.
    #[error("bulkhead rejected call for client '{client}' ({active} active, max {max})")]
    BulkheadRejected { client: String, active: usize, max: usize },
}

impl HttpError {
    /// Discriminant for programmatic branching.
    pub fn code(&self) -> ErrorCode {
        match self {
            HttpError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            HttpError::Config(_) => ErrorCode::ConfigError,
            HttpError::ConnectTimeout { .. } => ErrorCode::ConnectTimeout,
            HttpError::ReadTimeout { .. } => ErrorCode::ReadTimeout,
            HttpError::TotalTimeout { .. } => ErrorCode::TotalTimeout,
            HttpError::Timeout(_) => ErrorCode::Timeout,
            HttpError::Network(_) => ErrorCode::NetworkError,
            HttpError::HttpStatus { .. } => ErrorCode::HttpStatus,
            HttpError::ResponseTooLarge { .. } => ErrorCode::ResponseTooLarge,
            HttpError::Serialization(_) => ErrorCode::SerializationError,
            HttpError::RateLimited { .. } => ErrorCode::RateLimited,
            HttpError::CircuitOpen { .. } => ErrorCode::CircuitOpen,
            HttpError::BulkheadRejected { .. } => ErrorCode::BulkheadRejected,
        }
    }

    /// Numeric status for `HTTP_STATUS` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The final response carried by an `HTTP_STATUS` error.
    pub fn response(&self) -> Option<&Response> {
        match self {
            HttpError::HttpStatus { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Check if this error is one of the timeout codes.
    pub fn is_timeout(&self) -> bool {
        self.code().is_timeout()
    }

    /// Check if this error came from an admission gate.
    pub fn is_rejection(&self) -> bool {
        self.code().is_rejection()
    }

    /// Transport-class errors the retry controller may retry.
    pub fn is_retryable_kind(&self) -> bool {
        self.is_timeout() || self.code() == ErrorCode::NetworkError
    }

    /// Check if the failure should count against a circuit breaker.
    pub fn is_transport_failure(&self) -> bool {
        self.is_retryable_kind()
    }
}

impl From<serde_json::Error> for HttpError {
    fn from(err: serde_json::Error) -> Self {
        HttpError::Serialization(err.to_string())
    }
}

/// Failures reported by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("total timeout of {0:?} exceeded")]
    TotalTimeout(Duration),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
}

impl From<TransportError> for HttpError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConnectTimeout(timeout) => HttpError::ConnectTimeout { timeout },
            TransportError::TotalTimeout(timeout) => HttpError::TotalTimeout { timeout },
            TransportError::Timeout(msg) => HttpError::Timeout(msg),
            TransportError::Network(msg) => HttpError::Network(msg),
        }
    }
}
