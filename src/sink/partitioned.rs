// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hash-partitioned strategy.
//!
//! Every record is routed by a partition key derived from key material only:
//! `base64(sha256(hint))`. Callers may pass an explicit hint through
//! [`Sink::put_record_with_partition`]; otherwise a random one is generated
//! per record, which spreads records evenly over the destination's shards.
//!
//! Two submission modes, fixed at construction:
//!
//! - **Synchronous** (`synchronous_puts: true`): `put_record` awaits the
//!   client's final result. A failed record returns a dispatch error listing
//!   every attempt the client made.
//! - **Asynchronous**: `put_record` takes a slot in a bounded pool and
//!   returns once the submission is spawned. When the pool is full the call
//!   waits for a slot. Outcomes are counted in
//!   [`async_successes`](PartitionedSink::async_successes) and
//!   [`async_failures`](PartitionedSink::async_failures) but never reach the
//!   caller.
//!
//! `flush` waits for every spawned submission, then for the client's own
//! buffers.

use super::{check_record_size, Sink, SinkFuture};
use crate::client::{PartitionedClient, SharedClient};
use crate::config::SinkConfig;
use crate::error::{DispatchClass, ExportError, Result};
use crate::mapping::DestinationMapping;
use crate::metrics;
use crate::resilience::Bulkhead;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Registry name.
pub const NAME: &str = "partitioned";

/// Wire partition key for `hint`.
///
/// Depends on the hint alone, so the same hint always lands on the same shard.
pub fn partition_key_for(hint: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(hint))
}

/// A fresh random hint: a v4 UUID's bytes, base64-encoded.
pub fn random_hint() -> Vec<u8> {
    STANDARD.encode(Uuid::new_v4().as_bytes()).into_bytes()
}

#[derive(Debug, Default)]
struct AsyncCounters {
    successes: AtomicU64,
    failures: AtomicU64,
}

/// Partition-keyed dispatch, awaited or pooled.
pub struct PartitionedSink {
    client: Arc<SharedClient<dyn PartitionedClient>>,
    mapping: DestinationMapping,
    max_record_size: usize,
    synchronous: bool,
    pool: Arc<Bulkhead>,
    counters: Arc<AsyncCounters>,
    stopped: AtomicBool,
}

impl PartitionedSink {
    pub fn new(
        config: &SinkConfig,
        client: Arc<SharedClient<dyn PartitionedClient>>,
    ) -> Result<Self> {
        Ok(Self {
            client,
            mapping: config.mapping()?,
            max_record_size: config.max_record_size_bytes,
            synchronous: config.partitioned.synchronous_puts,
            pool: Arc::new(Bulkhead::new(config.partitioned.worker_pool_size)),
            counters: Arc::new(AsyncCounters::default()),
            stopped: AtomicBool::new(false),
        })
    }

    /// Asynchronous submissions the client reported delivered.
    pub fn async_successes(&self) -> u64 {
        self.counters.successes.load(Ordering::Relaxed)
    }

    /// Asynchronous submissions that failed.
    pub fn async_failures(&self) -> u64 {
        self.counters.failures.load(Ordering::Relaxed)
    }

    /// Asynchronous submissions still running.
    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    async fn submit(&self, payload: Bytes, table: &str, hint: &[u8]) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ExportError::Shutdown);
        }
        let destination = self.mapping.require(table)?.to_string();
        check_record_size(&payload, self.max_record_size)?;
        let partition_key = partition_key_for(hint);
        let client = self.client.get().await?;

        if self.synchronous {
            return self
                .submit_sync(client.as_ref(), destination, partition_key, payload)
                .await;
        }

        let permit = self.pool.acquire().await.map_err(|_| ExportError::Shutdown)?;
        let counters = Arc::clone(&self.counters);
        tokio::spawn(async move {
            let delivered = match client
                .add_user_record(destination.clone(), partition_key, payload)
                .await
            {
                Ok(result) if result.successful => true,
                Ok(result) => {
                    debug!(
                        destination = %destination,
                        attempts = result.attempts.len(),
                        errors = ?result.attempt_errors(),
                        "Async record failed"
                    );
                    false
                }
                Err(e) => {
                    debug!(destination = %destination, error = %e, "Async submit failed");
                    false
                }
            };
            if delivered {
                counters.successes.fetch_add(1, Ordering::Relaxed);
            } else {
                counters.failures.fetch_add(1, Ordering::Relaxed);
            }
            metrics::record_async_put(&destination, delivered);
            drop(permit);
        });
        Ok(())
    }

    async fn submit_sync(
        &self,
        client: &dyn PartitionedClient,
        destination: String,
        partition_key: String,
        payload: Bytes,
    ) -> Result<()> {
        let started = Instant::now();
        let result = client
            .add_user_record(destination.clone(), partition_key.clone(), payload)
            .await
            .map_err(|e| {
                error!(destination = %destination, error = %e, "Submit failed");
                metrics::record_dispatch_error(&destination, e.kind.as_str());
                e.into_export(&destination)
            })?;

        if result.successful {
            debug!(
                destination = %destination,
                partition_key = %partition_key,
                shard_id = ?result.shard_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Record delivered"
            );
            return Ok(());
        }

        let errors = result.attempt_errors();
        error!(
            destination = %destination,
            attempts = result.attempts.len(),
            "Record failed after all attempts"
        );
        metrics::record_dispatch_error(&destination, "record_failed");
        Err(ExportError::dispatch(
            destination,
            DispatchClass::Retryable,
            format!(
                "record failed after {} attempts: [{}]",
                result.attempts.len(),
                errors.join("; ")
            ),
        ))
    }

    async fn drain(&self) -> Result<()> {
        self.pool
            .wait_idle()
            .await
            .map_err(|_| ExportError::Shutdown)?;
        if !self.client.is_connected() {
            return Ok(());
        }
        let client = self.client.get().await?;
        client
            .flush_all()
            .await
            .map_err(|e| e.into_export("*"))
    }

    async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.drain().await;
        self.pool.close();
        if let Err(e) = &result {
            warn!(error = %e, "Partitioned sink stopped with undelivered records");
        }
        info!(
            successes = self.async_successes(),
            failures = self.async_failures(),
            "Partitioned sink stopped"
        );
        result
    }
}

impl Sink for PartitionedSink {
    fn name(&self) -> &'static str {
        NAME
    }

    fn mapping(&self) -> &DestinationMapping {
        &self.mapping
    }

    fn put_record<'a>(&'a self, payload: Bytes, table: &'a str) -> SinkFuture<'a, ()> {
        Box::pin(async move {
            let hint = random_hint();
            self.submit(payload, table, &hint).await
        })
    }

    fn put_record_with_partition<'a>(
        &'a self,
        payload: Bytes,
        table: &'a str,
        hint: &'a [u8],
    ) -> SinkFuture<'a, ()> {
        Box::pin(self.submit(payload, table, hint))
    }

    fn flush(&self) -> SinkFuture<'_, ()> {
        Box::pin(self.drain())
    }

    fn is_blocking(&self) -> bool {
        self.synchronous
    }

    fn shutdown(&self) -> SinkFuture<'_, ()> {
        Box::pin(self.stop())
    }
}
