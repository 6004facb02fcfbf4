// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sink contract and strategy registry.
//!
//! A [`Sink`] takes encoded records for mapped tables and delivers them to the
//! table's destination. Three strategies implement it:
//!
//! - [`ImmediateAckSink`]: one send per record, acknowledged before returning.
//!   Optionally provisions a missing destination.
//! - [`BatchedQueueSink`]: per-destination queues drained by bulk requests on
//!   a background flusher. Only delivered records leave the queue.
//! - [`PartitionedSink`]: records routed by a hashed partition key, either
//!   awaited or submitted through a bounded worker pool.
//!
//! Strategies are selected by name through a [`SinkRegistry`].
//!
//! # Transactions
//!
//! The endpoint brackets every batch with `begin`/`commit`, or `abort` on the
//! first failure, when [`Sink::supports_transaction`] is true. None of the
//! shipped strategies do, so those calls are no-ops for them.

pub mod batched;
pub mod immediate;
pub mod partitioned;

use crate::client::DestinationClients;
use crate::config::SinkConfig;
use crate::error::{DispatchClass, ExportError, Result};
use crate::mapping::DestinationMapping;
use crate::model::ChangeEvent;
use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

pub use batched::BatchedQueueSink;
pub use immediate::ImmediateAckSink;
pub use partitioned::PartitionedSink;

/// Boxed future returned by sink operations.
pub type SinkFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A destination strategy.
pub trait Sink: Send + Sync + 'static {
    /// Registry name of the strategy.
    fn name(&self) -> &'static str;

    /// The table to destination mapping the sink was built with.
    fn mapping(&self) -> &DestinationMapping;

    /// Drop entries whose table has no destination.
    fn filter(&self, entries: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
        let mapping = self.mapping();
        entries
            .into_iter()
            .filter(|e| {
                let mapped = mapping.is_mapped(e.table_name());
                if !mapped {
                    debug!(table = %e.table_name(), "Not mapped to a destination");
                }
                mapped
            })
            .collect()
    }

    /// Hand one encoded record for `table` to its destination.
    fn put_record<'a>(&'a self, payload: Bytes, table: &'a str) -> SinkFuture<'a, ()>;

    /// As [`put_record`](Sink::put_record), routed by an explicit partition hint.
    ///
    /// Only partitioned strategies accept a hint.
    fn put_record_with_partition<'a>(
        &'a self,
        _payload: Bytes,
        table: &'a str,
        _hint: &'a [u8],
    ) -> SinkFuture<'a, ()> {
        let name = self.name();
        let destination = self
            .mapping()
            .destination_for(table)
            .unwrap_or(table)
            .to_string();
        Box::pin(async move {
            Err(ExportError::dispatch(
                destination,
                DispatchClass::NonRetryable,
                format!("{} sink does not accept partition hints", name),
            ))
        })
    }

    /// Resolve once every record accepted so far has been submitted.
    fn flush(&self) -> SinkFuture<'_, ()>;

    /// Whether `put_record` returns only after the destination acknowledged.
    fn is_blocking(&self) -> bool;

    fn supports_transaction(&self) -> bool {
        false
    }

    fn begin(&self) -> Result<()> {
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        Ok(())
    }

    fn abort(&self) {}

    /// Flush and stop any background work. Further puts are refused.
    fn shutdown(&self) -> SinkFuture<'_, ()> {
        self.flush()
    }
}

/// Reject records larger than `max` before any network call.
pub fn check_record_size(payload: &[u8], max: usize) -> Result<()> {
    if payload.len() > max {
        return Err(ExportError::Overflow {
            size: payload.len(),
            max,
        });
    }
    Ok(())
}

// =============================================================================
// Registry
// =============================================================================

type Constructor = Box<dyn Fn(&SinkConfig) -> Result<Arc<dyn Sink>> + Send + Sync>;

/// Builds sinks by strategy name.
#[derive(Default)]
pub struct SinkRegistry {
    constructors: HashMap<String, Constructor>,
}

impl SinkRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the three shipped strategies bound to `clients`.
    ///
    /// Must be called inside a tokio runtime: the batched strategy spawns its
    /// flusher when built.
    pub fn with_clients(clients: DestinationClients) -> Self {
        let mut registry = Self::new();

        let topic = clients.topic.clone();
        registry.register(immediate::NAME, move |config| {
            let client = topic
                .clone()
                .ok_or_else(|| missing_client(immediate::NAME, "topic"))?;
            Ok(Arc::new(ImmediateAckSink::new(config, client)?) as Arc<dyn Sink>)
        });

        let bulk = clients.bulk.clone();
        registry.register(batched::NAME, move |config| {
            let client = bulk
                .clone()
                .ok_or_else(|| missing_client(batched::NAME, "bulk"))?;
            Ok(Arc::new(BatchedQueueSink::new(config, client)?) as Arc<dyn Sink>)
        });

        let partitioned = clients.partitioned;
        registry.register(partitioned::NAME, move |config| {
            let client = partitioned
                .clone()
                .ok_or_else(|| missing_client(partitioned::NAME, "partitioned"))?;
            Ok(Arc::new(PartitionedSink::new(config, client)?) as Arc<dyn Sink>)
        });

        registry
    }

    /// Register a constructor, replacing any under the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&SinkConfig) -> Result<Arc<dyn Sink>> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build the sink named by `config.kind`.
    pub fn build(&self, config: &SinkConfig) -> Result<Arc<dyn Sink>> {
        let constructor = self.constructors.get(&config.kind).ok_or_else(|| {
            ExportError::Config(format!(
                "unknown sink kind '{}', expected one of {:?}",
                config.kind,
                self.names()
            ))
        })?;
        constructor(config)
    }
}

fn missing_client(kind: &str, port: &str) -> ExportError {
    ExportError::Config(format!("{} sink requires a {} client", kind, port))
}
