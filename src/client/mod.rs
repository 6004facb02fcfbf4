// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Destination client ports.
//!
//! Each sink strategy talks to its destination through one of three traits,
//! matching the delivery model of the service behind it:
//!
//! | Port | Delivery model | Used by |
//! |------|----------------|---------|
//! | [`TopicClient`] | one record, acknowledged per call | [`ImmediateAckSink`](crate::sink::ImmediateAckSink) |
//! | [`BulkClient`] | many records, per-record outcome | [`BatchedQueueSink`](crate::sink::BatchedQueueSink) |
//! | [`PartitionedClient`] | one record per partition key, retried by the client | [`PartitionedSink`](crate::sink::PartitionedSink) |
//!
//! Clients are process-wide and held through a [`SharedClient`], which
//! connects once on first use and hands out the same instance afterwards.
//!
//! # Example
//!
//! ```rust,no_run
//! use replication_sink::client::{ClientFuture, TopicClient};
//! use bytes::Bytes;
//!
//! struct Discard;
//!
//! impl TopicClient for Discard {
//!     fn send(&self, _destination: String, _key: String, _payload: Bytes) -> ClientFuture<'_, ()> {
//!         Box::pin(async { Ok(()) })
//!     }
//!
//!     fn destination_exists(&self, _destination: String) -> ClientFuture<'_, bool> {
//!         Box::pin(async { Ok(true) })
//!     }
//!
//!     fn create_destination(
//!         &self,
//!         _destination: String,
//!         _partitions: u32,
//!         _replication_factor: u16,
//!     ) -> ClientFuture<'_, ()> {
//!         Box::pin(async { Ok(()) })
//!     }
//! }
//! ```

pub mod redis;

use crate::error::{DispatchClass, ExportError, Result};
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;

pub use self::redis::RedisStreamClient;

/// Boxed future returned by destination clients.
pub type ClientFuture<'a, T> =
    Pin<Box<dyn Future<Output = std::result::Result<T, DestinationError>> + Send + 'a>>;

// =============================================================================
// Destination errors
// =============================================================================

/// How a destination call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationErrorKind {
    /// The destination does not exist.
    NotFound,
    /// Rate limit or quota exceeded for now.
    Throttled,
    /// No acknowledgment within the client's deadline.
    Timeout,
    /// The request was refused (malformed, unauthorized, too large).
    Rejected,
    /// The service could not be reached.
    Unavailable,
}

impl DestinationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Throttled => "throttled",
            Self::Timeout => "timeout",
            Self::Rejected => "rejected",
            Self::Unavailable => "unavailable",
        }
    }

    pub fn dispatch_class(&self) -> DispatchClass {
        match self {
            Self::Throttled | Self::Timeout | Self::Unavailable => DispatchClass::Retryable,
            Self::NotFound | Self::Rejected => DispatchClass::NonRetryable,
        }
    }
}

/// Error reported by a destination client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {}", .kind.as_str(), .message)]
pub struct DestinationError {
    pub kind: DestinationErrorKind,
    pub message: String,
}

impl DestinationError {
    pub fn new(kind: DestinationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(DestinationErrorKind::NotFound, message)
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(DestinationErrorKind::Throttled, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(DestinationErrorKind::Rejected, message)
    }

    /// Convert into the crate error for `destination`.
    pub fn into_export(self, destination: &str) -> ExportError {
        match self.kind {
            DestinationErrorKind::NotFound => ExportError::DestinationMissing {
                destination: destination.to_string(),
                provisioned: false,
            },
            kind => ExportError::dispatch(
                destination,
                kind.dispatch_class(),
                format!("{}: {}", kind.as_str(), self.message),
            ),
        }
    }
}

// =============================================================================
// Ports
// =============================================================================

/// A topic-style destination: one record per call, acknowledged before the
/// future resolves.
pub trait TopicClient: Send + Sync + 'static {
    /// Append one keyed record and wait for the acknowledgment.
    fn send(&self, destination: String, key: String, payload: Bytes) -> ClientFuture<'_, ()>;

    fn destination_exists(&self, destination: String) -> ClientFuture<'_, bool>;

    /// Create the destination. Creating one that already exists succeeds.
    fn create_destination(
        &self,
        destination: String,
        partitions: u32,
        replication_factor: u16,
    ) -> ClientFuture<'_, ()>;
}

/// Per-record result of a bulk submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Delivered,
    Failed { code: String, message: String },
}

impl RecordOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, RecordOutcome::Delivered)
    }
}

/// A bulk destination: many records per request, each with its own outcome.
pub trait BulkClient: Send + Sync + 'static {
    /// Submit `records` as one request.
    ///
    /// On `Ok`, the outcomes are in request order, one per record. `Err`
    /// means the whole request was refused.
    fn put_record_batch(
        &self,
        destination: String,
        records: Vec<Bytes>,
    ) -> ClientFuture<'_, Vec<RecordOutcome>>;
}

/// One delivery attempt made by a partitioned client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub success: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl Attempt {
    pub fn ok() -> Self {
        Self {
            success: true,
            error_code: None,
            error_message: None,
        }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }
}

/// Final result for one record, with every attempt the client made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecordResult {
    pub successful: bool,
    pub shard_id: Option<String>,
    pub attempts: Vec<Attempt>,
}

impl UserRecordResult {
    /// Attempt failures as `code: message`, in attempt order.
    pub fn attempt_errors(&self) -> Vec<String> {
        self.attempts
            .iter()
            .filter(|a| !a.success)
            .map(|a| {
                format!(
                    "{}: {}",
                    a.error_code.as_deref().unwrap_or("unknown"),
                    a.error_message.as_deref().unwrap_or("")
                )
            })
            .collect()
    }
}

/// A partitioned stream: records are routed by partition key and the client
/// retries internally before reporting.
pub trait PartitionedClient: Send + Sync + 'static {
    fn add_user_record(
        &self,
        destination: String,
        partition_key: String,
        payload: Bytes,
    ) -> ClientFuture<'_, UserRecordResult>;

    /// Resolve once every record handed to the client has been delivered or
    /// given up on.
    fn flush_all(&self) -> ClientFuture<'_, ()>;
}

// =============================================================================
// Shared handle
// =============================================================================

/// Boxed connect future for [`SharedClient`].
pub type ConnectFuture<C> = Pin<Box<dyn Future<Output = Result<Arc<C>>> + Send>>;

type Connector<C> = Box<dyn Fn() -> ConnectFuture<C> + Send + Sync>;

/// A once-initialized, lazily connected client handle.
///
/// Concurrent first callers wait on the same connect. A failed connect is not
/// cached and the next call tries again; a successful one is kept for the
/// life of the handle.
pub struct SharedClient<C: ?Sized> {
    cell: OnceCell<Arc<C>>,
    connect: Option<Connector<C>>,
}

impl<C: ?Sized + Send + Sync + 'static> SharedClient<C> {
    /// A handle that connects with `connect` on first use.
    pub fn lazy<F>(connect: F) -> Self
    where
        F: Fn() -> ConnectFuture<C> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            connect: Some(Box::new(connect)),
        }
    }

    /// A handle around an already connected client.
    pub fn ready(client: Arc<C>) -> Self {
        Self {
            cell: OnceCell::new_with(Some(client)),
            connect: None,
        }
    }

    /// The client, connecting first if needed.
    pub async fn get(&self) -> Result<Arc<C>> {
        let client = self
            .cell
            .get_or_try_init(|| async {
                match &self.connect {
                    Some(connect) => connect().await,
                    None => Err(ExportError::Internal("shared client has no connector".into())),
                }
            })
            .await?;
        Ok(Arc::clone(client))
    }

    pub fn is_connected(&self) -> bool {
        self.cell.initialized()
    }
}

impl<C: ?Sized> fmt::Debug for SharedClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedClient")
            .field("connected", &self.cell.initialized())
            .finish()
    }
}

/// The process-wide client handles available to the sink registry.
///
/// Strategies whose client is absent fail to build with a config error.
#[derive(Clone, Default)]
pub struct DestinationClients {
    pub topic: Option<Arc<SharedClient<dyn TopicClient>>>,
    pub bulk: Option<Arc<SharedClient<dyn BulkClient>>>,
    pub partitioned: Option<Arc<SharedClient<dyn PartitionedClient>>>,
}

impl DestinationClients {
    pub fn with_topic(mut self, client: Arc<dyn TopicClient>) -> Self {
        self.topic = Some(Arc::new(SharedClient::ready(client)));
        self
    }

    pub fn with_bulk(mut self, client: Arc<dyn BulkClient>) -> Self {
        self.bulk = Some(Arc::new(SharedClient::ready(client)));
        self
    }

    pub fn with_partitioned(mut self, client: Arc<dyn PartitionedClient>) -> Self {
        self.partitioned = Some(Arc::new(SharedClient::ready(client)));
        self
    }
}
