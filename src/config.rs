// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the replication sink.
//!
//! Configuration can be constructed programmatically or deserialized from
//! YAML/JSON, and is handed to [`SinkRegistry::build()`](crate::SinkRegistry::build)
//! and [`ReplicationEndpoint::new()`](crate::ReplicationEndpoint::new).
//!
//! # Quick Start
//!
//! ```rust
//! use replication_sink::config::ExportConfig;
//!
//! let mut config = ExportConfig::for_testing();
//! config.sink.table_map = vec!["orders:orders-stream".into()];
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ExportConfig
//! ├── compression_enabled: bool      # zstd the whole payload
//! ├── filters: FilterConfig          # local existence filters
//! └── sink: SinkConfig
//!     ├── kind: String               # "immediate" | "batched" | "partitioned"
//!     ├── table_map: Vec<String>     # "table:destination"
//!     ├── max_record_size_bytes
//!     ├── immediate: ImmediateAckConfig
//!     ├── batched: BatchedQueueConfig
//!     └── partitioned: PartitionedConfig
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! compression_enabled: true
//!
//! filters:
//!   drop_on_deleted_tables: true
//!   drop_on_deleted_column_families: true
//!
//! sink:
//!   kind: batched
//!   table_map:
//!     - "orders:orders-delivery"
//!     - "users:users-delivery"
//!   batched:
//!     flush_interval: "1s"
//!     flush_cooldown: "2s"
//! ```

use crate::error::{ExportError, Result};
use crate::mapping::DestinationMapping;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest batch accepted by a bulk submission.
pub const MAX_BULK_BATCH: usize = 500;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level export configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Compress each encoded payload with zstd before dispatch.
    #[serde(default)]
    pub compression_enabled: bool,

    #[serde(default)]
    pub filters: FilterConfig,

    #[serde(default)]
    pub sink: SinkConfig,
}

impl ExportConfig {
    /// Create a minimal config for testing.
    ///
    /// Batched-queue timings are shortened so background flushes are
    /// observable within a test.
    pub fn for_testing() -> Self {
        Self {
            compression_enabled: false,
            filters: FilterConfig::default(),
            sink: SinkConfig {
                batched: BatchedQueueConfig {
                    flush_interval: "10ms".to_string(),
                    flush_cooldown: "10ms".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
        }
    }

    /// Check the configuration for values that can never work.
    pub fn validate(&self) -> Result<()> {
        self.sink.validate()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FilterConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Local existence filters applied before the sink sees an entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Drop entries whose table no longer exists locally.
    #[serde(default)]
    pub drop_on_deleted_tables: bool,

    /// Drop cells whose column family no longer exists locally.
    #[serde(default)]
    pub drop_on_deleted_column_families: bool,

    /// Let bulk-load marker cells through regardless of family existence.
    #[serde(default)]
    pub bulk_load_replication: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SinkConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Destination strategy selection and its tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Registry name of the strategy to build.
    #[serde(default = "default_kind")]
    pub kind: String,

    /// `"table:destination"` pairs.
    #[serde(default)]
    pub table_map: Vec<String>,

    /// Records larger than this are rejected before any network call.
    #[serde(default = "default_max_record_size_bytes")]
    pub max_record_size_bytes: usize,

    #[serde(default)]
    pub immediate: ImmediateAckConfig,

    #[serde(default)]
    pub batched: BatchedQueueConfig,

    #[serde(default)]
    pub partitioned: PartitionedConfig,
}

fn default_kind() -> String {
    "immediate".to_string()
}

fn default_max_record_size_bytes() -> usize {
    1_024_000 // 1000 KiB
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            table_map: Vec::new(),
            max_record_size_bytes: default_max_record_size_bytes(),
            immediate: ImmediateAckConfig::default(),
            batched: BatchedQueueConfig::default(),
            partitioned: PartitionedConfig::default(),
        }
    }
}

impl SinkConfig {
    /// Parse `table_map` into an immutable mapping.
    pub fn mapping(&self) -> Result<DestinationMapping> {
        DestinationMapping::parse(&self.table_map)
    }

    fn validate(&self) -> Result<()> {
        if self.kind.trim().is_empty() {
            return Err(ExportError::Config("sink kind must not be empty".into()));
        }
        if self.max_record_size_bytes == 0 {
            return Err(ExportError::Config(
                "max_record_size_bytes must be greater than zero".into(),
            ));
        }
        self.mapping()?;
        self.immediate.validate()?;
        self.batched.validate()?;
        self.partitioned.validate()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Strategy-specific settings
// ═══════════════════════════════════════════════════════════════════════════════

/// Immediate-ack (topic) strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImmediateAckConfig {
    /// Provision a missing destination when a send reports it absent.
    #[serde(default)]
    pub create_destination_if_missing: bool,

    #[serde(default = "default_partitions")]
    pub partitions: u32,

    #[serde(default = "default_replication_factor")]
    pub replication_factor: u16,
}

fn default_partitions() -> u32 {
    1
}

fn default_replication_factor() -> u16 {
    2
}

impl Default for ImmediateAckConfig {
    fn default() -> Self {
        Self {
            create_destination_if_missing: false,
            partitions: 1,
            replication_factor: 2,
        }
    }
}

impl ImmediateAckConfig {
    fn validate(&self) -> Result<()> {
        if self.partitions == 0 || self.replication_factor == 0 {
            return Err(ExportError::Config(
                "partitions and replication_factor must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Batched-queue strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchedQueueConfig {
    /// Queue records and deliver them in bulk. When off, each record is
    /// submitted alone and awaited.
    #[serde(default = "default_true")]
    pub batch_puts: bool,

    /// Queue length at which `put_record` flushes inline before appending.
    #[serde(default = "default_max_queued")]
    pub max_queued_before_flush: usize,

    /// Records per bulk request. Capped at [`MAX_BULK_BATCH`].
    #[serde(default = "default_max_batch_records")]
    pub max_batch_records: usize,

    /// Background flusher tick, as a duration string (e.g. "1s").
    #[serde(default = "default_flush_interval")]
    pub flush_interval: String,

    /// Minimum time since a destination's last successful flush before the
    /// background flusher touches it again.
    #[serde(default = "default_flush_cooldown")]
    pub flush_cooldown: String,
}

fn default_max_queued() -> usize {
    500
}

fn default_max_batch_records() -> usize {
    MAX_BULK_BATCH
}

fn default_flush_interval() -> String {
    "1s".to_string()
}

fn default_flush_cooldown() -> String {
    "1s".to_string()
}

impl Default for BatchedQueueConfig {
    fn default() -> Self {
        Self {
            batch_puts: true,
            max_queued_before_flush: 500,
            max_batch_records: MAX_BULK_BATCH,
            flush_interval: "1s".to_string(),
            flush_cooldown: "1s".to_string(),
        }
    }
}

impl BatchedQueueConfig {
    /// Parse the flush interval, falling back to 1 second.
    pub fn flush_interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.flush_interval).unwrap_or(Duration::from_secs(1))
    }

    /// Parse the flush cooldown, falling back to 1 second.
    pub fn flush_cooldown_duration(&self) -> Duration {
        humantime::parse_duration(&self.flush_cooldown).unwrap_or(Duration::from_secs(1))
    }

    /// Effective records per bulk request.
    pub fn batch_limit(&self) -> usize {
        self.max_batch_records.clamp(1, MAX_BULK_BATCH)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_queued_before_flush == 0 || self.max_batch_records == 0 {
            return Err(ExportError::Config(
                "batched queue sizes must be greater than zero".into(),
            ));
        }
        if self.flush_interval_duration().is_zero() {
            return Err(ExportError::Config("flush_interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Hash-partitioned strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionedConfig {
    /// Await every record's result before returning from `put_record`.
    #[serde(default = "default_true")]
    pub synchronous_puts: bool,

    /// Concurrent in-flight submissions in asynchronous mode.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_worker_pool_size() -> usize {
    50
}

impl Default for PartitionedConfig {
    fn default() -> Self {
        Self {
            synchronous_puts: true,
            worker_pool_size: 50,
        }
    }
}

impl PartitionedConfig {
    fn validate(&self) -> Result<()> {
        if self.worker_pool_size == 0 {
            return Err(ExportError::Config(
                "worker_pool_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
