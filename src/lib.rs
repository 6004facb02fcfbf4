//! # Replication Sink
//!
//! Exports write-ahead-log change events from a source store to streaming
//! destinations.
//!
//! ## Architecture
//!
//! A [`ReplicationEndpoint`] receives batches of [`ChangeEvent`]s for one
//! source shard and pushes them through a single pipeline into a [`Sink`]:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                         ReplicationEndpoint                               │
//! │                                                                           │
//! │  ┌──────────────┐   ┌──────────────┐   ┌────────────┐   ┌──────────────┐  │
//! │  │ FilterChain  │──►│ Sink mapping │──►│ Host       │──►│ codec::encode│  │
//! │  │ (table, cf)  │   │ filter       │   │ filters    │   │ (JSON, zstd) │  │
//! │  └──────────────┘   └──────────────┘   └────────────┘   └──────────────┘  │
//! │         │                                                      │          │
//! │         ▼                                                      ▼          │
//! │  ┌──────────────────┐                           ┌──────────────────────┐  │
//! │  │ ExistenceOracle  │                           │ Sink::put_record     │  │
//! │  │ (local catalog)  │                           │ begin/commit/abort   │  │
//! │  └──────────────────┘                           └──────────────────────┘  │
//! └───────────────────────────────────────────────────────────────────────────┘
//!                                                              │
//!              ┌───────────────────────────┬───────────────────┴──────┐
//!              ▼                           ▼                          ▼
//!     ┌──────────────────┐      ┌────────────────────┐     ┌────────────────────┐
//!     │ ImmediateAckSink │      │ BatchedQueueSink   │     │ PartitionedSink    │
//!     │ one ack per put  │      │ queues + flusher   │     │ hashed keys, pool  │
//!     └──────────────────┘      └────────────────────┘     └────────────────────┘
//! ```
//!
//! ## Strategies
//!
//! 1. **Immediate-ack**: each record is sent and acknowledged before
//!    `put_record` returns. Missing destinations can be provisioned.
//! 2. **Batched queue**: records queue per destination and go out in bulk
//!    requests. Partial failures stay queued for the next cycle.
//! 3. **Hash-partitioned**: records are routed by a hashed partition key and
//!    either awaited or submitted through a bounded pool.
//!
//! Delivery is at-least-once. The endpoint never retries a failed batch.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use replication_sink::{
//!     DestinationClients, ExportConfig, NoOpOracle, ReplicationBatch, ReplicationEndpoint,
//!     RedisStreamClient, SinkRegistry,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> replication_sink::Result<()> {
//!     let mut config = ExportConfig::default();
//!     config.sink.table_map = vec!["orders:orders-stream".into()];
//!
//!     let clients = DestinationClients {
//!         topic: Some(Arc::new(RedisStreamClient::shared("redis://127.0.0.1:6379"))),
//!         ..Default::default()
//!     };
//!     let sink = SinkRegistry::with_clients(clients).build(&config.sink)?;
//!
//!     let mut endpoint = ReplicationEndpoint::new(config, sink, Arc::new(NoOpOracle));
//!     endpoint.start()?;
//!
//!     let summary = endpoint.replicate(ReplicationBatch::new("wal-0", Vec::new())).await?;
//!     println!("shipped {}", summary.shipped);
//!
//!     endpoint.stop().await
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod filter;
pub mod mapping;
pub mod metrics;
pub mod model;
pub mod resilience;
pub mod sink;

// Re-exports for convenience
pub use client::{
    BulkClient, DestinationClients, DestinationError, DestinationErrorKind, PartitionedClient,
    RedisStreamClient, SharedClient, TopicClient,
};
pub use config::{
    BatchedQueueConfig, ExportConfig, FilterConfig, ImmediateAckConfig, PartitionedConfig,
    SinkConfig,
};
pub use endpoint::{
    EndpointState, ReplicateSummary, ReplicationBatch, ReplicationEndpoint, TransactionState,
};
pub use error::{DispatchClass, ExportError, Result};
pub use filter::{EntryFilter, ExistenceOracle, FilterChain, NoOpOracle};
pub use mapping::DestinationMapping;
pub use model::{Cell, CellType, ChangeEvent, Edit, RowKey};
pub use sink::{BatchedQueueSink, ImmediateAckSink, PartitionedSink, Sink, SinkRegistry};
