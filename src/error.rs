// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replication sink.
//!
//! Errors are split by where they arise: producing the payload (encoding),
//! reading it back (decoding), handing it to a destination (dispatch), or
//! setting the sink up (configuration).
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Encoding` | No | Payload could not be produced for an entry |
//! | `Decoding` | No | Payload is malformed or corrupt |
//! | `Dispatch` | Per class | Destination rejected or failed to acknowledge |
//! | `DestinationMissing` | No | Destination does not exist (may be provisioned) |
//! | `Overflow` | No | Record exceeds the maximum payload size |
//! | `NotMapped` | No | Table has no configured destination |
//! | `Redis` | Yes | Redis-stream backend network/command failure |
//! | `Config` | No | Configuration invalid |
//! | `Shutdown` | No | Endpoint is not running |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! The endpoint never retries on its own. A failed batch is reported to the
//! caller, who can consult [`ExportError::is_retryable()`] before resubmitting.

use thiserror::Error;

/// Result type alias for sink operations.
pub type Result<T> = std::result::Result<T, ExportError>;

/// Whether a dispatch failure is worth resubmitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchClass {
    /// Throttling, timeouts, temporary unavailability.
    Retryable,
    /// Malformed request, permission denied, size exceeded.
    NonRetryable,
}

impl std::fmt::Display for DispatchClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retryable => write!(f, "retryable"),
            Self::NonRetryable => write!(f, "non-retryable"),
        }
    }
}

/// Errors that can occur while exporting change events.
#[derive(Error, Debug)]
pub enum ExportError {
    /// The wire payload could not be produced.
    ///
    /// Fatal for the entry; the endpoint aborts the whole batch.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A wire payload could not be turned back into a change event.
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// The destination rejected the record or failed to acknowledge it.
    #[error("Dispatch error ({destination}, {class}): {message}")]
    Dispatch {
        destination: String,
        class: DispatchClass,
        message: String,
    },

    /// The destination does not exist.
    ///
    /// `provisioned` is set when the sink created it in response; the record
    /// itself was still not delivered.
    #[error("Destination missing: {destination} (provisioned: {provisioned})")]
    DestinationMissing {
        destination: String,
        provisioned: bool,
    },

    /// The record exceeds the maximum payload size.
    ///
    /// Raised before any network call is attempted.
    #[error("Record of {size} bytes exceeds maximum of {max} bytes")]
    Overflow { size: usize, max: usize },

    /// The table has no configured destination.
    #[error("Table not mapped to a destination: {table}")]
    NotMapped { table: String },

    /// Redis command error in the Redis-stream backend.
    #[error("Redis error ({operation}): {message}")]
    Redis {
        operation: String,
        message: String,
        #[source]
        source: Option<redis::RedisError>,
    },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The endpoint is not running.
    #[error("Endpoint is not running")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExportError {
    /// Create a dispatch error.
    pub fn dispatch(
        destination: impl Into<String>,
        class: DispatchClass,
        message: impl Into<String>,
    ) -> Self {
        Self::Dispatch {
            destination: destination.into(),
            class,
            message: message.into(),
        }
    }

    /// Create a Redis error from a redis::RedisError
    pub fn redis(operation: impl Into<String>, source: redis::RedisError) -> Self {
        Self::Redis {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Dispatch { class, .. } => *class == DispatchClass::Retryable,
            Self::Redis { .. } => true,
            Self::Encoding(_) => false,
            Self::Decoding(_) => false,
            Self::DestinationMissing { .. } => false,
            Self::Overflow { .. } => false,
            Self::NotMapped { .. } => false,
            Self::Config(_) => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Encoding(_) => "encoding",
            Self::Decoding(_) => "decoding",
            Self::Dispatch { .. } => "dispatch",
            Self::DestinationMissing { .. } => "destination_missing",
            Self::Overflow { .. } => "overflow",
            Self::NotMapped { .. } => "not_mapped",
            Self::Redis { .. } => "redis",
            Self::Config(_) => "config",
            Self::Shutdown => "shutdown",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<redis::RedisError> for ExportError {
    fn from(e: redis::RedisError) -> Self {
        Self::redis("unknown", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_follows_class() {
        let err = ExportError::dispatch("orders", DispatchClass::Retryable, "throttled");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("orders"));
        assert!(err.to_string().contains("retryable"));

        let err = ExportError::dispatch("orders", DispatchClass::NonRetryable, "bad request");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("non-retryable"));
    }

    #[test]
    fn test_destination_missing_not_retryable() {
        let err = ExportError::DestinationMissing {
            destination: "orders-topic".to_string(),
            provisioned: true,
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("orders-topic"));
        assert!(err.to_string().contains("provisioned: true"));
    }

    #[test]
    fn test_overflow_not_retryable() {
        let err = ExportError::Overflow {
            size: 2_000_000,
            max: 1_024_000,
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("2000000"));
        assert!(err.to_string().contains("1024000"));
    }

    #[test]
    fn test_not_retryable_encoding_and_decoding() {
        assert!(!ExportError::Encoding("bad".into()).is_retryable());
        assert!(!ExportError::Decoding("bad".into()).is_retryable());
    }

    #[test]
    fn test_not_retryable_config_shutdown_internal() {
        assert!(!ExportError::Config("empty table map".into()).is_retryable());
        assert!(!ExportError::Shutdown.is_retryable());
        assert!(!ExportError::Internal("oops".into()).is_retryable());
        assert!(!ExportError::NotMapped { table: "t".into() }.is_retryable());
    }

    #[test]
    fn test_redis_error_formatting() {
        let err = ExportError::Redis {
            operation: "XADD".to_string(),
            message: "timeout".to_string(),
            source: None,
        };
        assert!(err.is_retryable());
        let msg = err.to_string();
        assert!(msg.contains("Redis error"));
        assert!(msg.contains("XADD"));
        assert!(msg.contains("timeout"));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ExportError::Encoding("x".into()).kind(), "encoding");
        assert_eq!(ExportError::Overflow { size: 1, max: 0 }.kind(), "overflow");
        assert_eq!(ExportError::Shutdown.kind(), "shutdown");
        assert_eq!(
            ExportError::dispatch("d", DispatchClass::Retryable, "m").kind(),
            "dispatch"
        );
    }
}
