// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batched-queue strategy.
//!
//! Records are appended to a per-destination queue and delivered in bulk
//! requests. A background flusher wakes every `flush_interval` and drains any
//! destination whose last successful flush is older than `flush_cooldown`.
//! A destination whose queue has reached `max_queued_before_flush` is flushed
//! inline by `put_record` before the new record is appended.
//!
//! # Flush
//!
//! ```text
//!   queue:   [a b c d e f ...]        peek up to max_batch_records
//!                 │
//!                 ▼
//!   request: [a b c d e]  ──►  outcomes: [ok ok fail ok fail]
//!                                  │
//!                                  ▼
//!   queue:   [c e f ...]            remove a, b, d by id
//! ```
//!
//! Entries are matched to outcomes by the id they were given on append, not
//! by position: producers may append while a request is in flight. Failed
//! records stay at the head of the queue for the next cycle, so per-destination
//! order is kept and delivery is at-least-once.
//!
//! A throttled request is a warning and is retried next cycle. A request the
//! destination refuses as a whole removes nothing.
//!
//! Only one flush per destination runs at a time. Queues are unbounded.
//!
//! # Unbatched mode
//!
//! With `batch_puts` off, `put_record` submits the record alone and waits for
//! its outcome instead of queueing it.

use super::{check_record_size, Sink, SinkFuture};
use crate::client::{BulkClient, DestinationErrorKind, RecordOutcome, SharedClient};
use crate::config::{BatchedQueueConfig, SinkConfig};
use crate::error::{DispatchClass, ExportError, Result};
use crate::mapping::DestinationMapping;
use crate::metrics;
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};

/// Registry name.
pub const NAME: &str = "batched";

/// One queued record.
#[derive(Debug, Clone)]
struct QueueEntry {
    id: u64,
    payload: Bytes,
}

/// Queue and flush state for one destination.
#[derive(Default)]
struct DestinationQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    /// Held for the duration of a flush.
    flush_lock: Mutex<()>,
    last_flush: RwLock<Option<Instant>>,
}

/// Result of one flush cycle for a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    /// Records sent in the request.
    pub submitted: usize,
    /// Records the destination accepted and that left the queue.
    pub delivered: usize,
    /// Records still queued afterwards.
    pub remaining: usize,
}

/// State shared with the background flusher.
struct Inner {
    client: Arc<SharedClient<dyn BulkClient>>,
    queues: RwLock<HashMap<String, Arc<DestinationQueue>>>,
    next_id: AtomicU64,
    config: BatchedQueueConfig,
}

impl Inner {
    async fn queue(&self, destination: &str) -> Option<Arc<DestinationQueue>> {
        self.queues.read().await.get(destination).cloned()
    }

    async fn queue_or_create(&self, destination: &str) -> Arc<DestinationQueue> {
        if let Some(queue) = self.queue(destination).await {
            return queue;
        }
        let mut queues = self.queues.write().await;
        Arc::clone(
            queues
                .entry(destination.to_string())
                .or_insert_with(|| Arc::new(DestinationQueue::default())),
        )
    }

    /// One flush cycle: peek, submit, remove what was delivered.
    async fn flush_destination(&self, destination: &str) -> Result<FlushReport> {
        let Some(queue) = self.queue(destination).await else {
            return Ok(FlushReport::default());
        };
        let _flushing = queue.flush_lock.lock().await;

        let batch: Vec<QueueEntry> = {
            let entries = queue.entries.lock().await;
            entries
                .iter()
                .take(self.config.batch_limit())
                .cloned()
                .collect()
        };
        if batch.is_empty() {
            return Ok(FlushReport::default());
        }

        let client = self.client.get().await?;
        let started = Instant::now();
        let records: Vec<Bytes> = batch.iter().map(|e| e.payload.clone()).collect();

        let outcomes = match client.put_record_batch(destination.to_string(), records).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                metrics::record_dispatch_error(destination, e.kind.as_str());
                metrics::record_batch_flush(destination, batch.len(), 0, started.elapsed());
                if e.kind == DestinationErrorKind::Throttled {
                    warn!(destination = %destination, error = %e, "Throttled, retrying next cycle");
                } else {
                    error!(destination = %destination, error = %e, "Batch rejected by destination");
                }
                return Err(e.into_export(destination));
            }
        };

        if outcomes.len() != batch.len() {
            warn!(
                destination = %destination,
                submitted = batch.len(),
                outcomes = outcomes.len(),
                "Outcome count does not match request, unmatched records stay queued"
            );
        }

        let delivered: HashSet<u64> = batch
            .iter()
            .zip(outcomes.iter())
            .filter(|(_, outcome)| outcome.is_delivered())
            .map(|(entry, _)| entry.id)
            .collect();

        if let Some(RecordOutcome::Failed { code, message }) =
            outcomes.iter().find(|o| !o.is_delivered())
        {
            debug!(destination = %destination, code = %code, message = %message, "First failed record");
        }

        let remaining = {
            let mut entries = queue.entries.lock().await;
            if !delivered.is_empty() {
                entries.retain(|e| !delivered.contains(&e.id));
            }
            entries.len()
        };
        *queue.last_flush.write().await = Some(Instant::now());

        let report = FlushReport {
            submitted: batch.len(),
            delivered: delivered.len(),
            remaining,
        };
        metrics::record_batch_flush(destination, report.submitted, report.delivered, started.elapsed());
        metrics::set_queue_depth(destination, remaining);
        debug!(
            destination = %destination,
            submitted = report.submitted,
            delivered = report.delivered,
            remaining = report.remaining,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Flushed batch"
        );
        Ok(report)
    }

    /// Flush every destination whose cooldown has passed.
    async fn flush_due(&self) {
        let cooldown = self.config.flush_cooldown_duration();
        let due: Vec<String> = {
            let queues = self.queues.read().await;
            let mut due = Vec::new();
            for (destination, queue) in queues.iter() {
                let last = *queue.last_flush.read().await;
                if last.map_or(true, |at| at.elapsed() >= cooldown) {
                    due.push(destination.clone());
                }
            }
            due
        };

        // Destinations flush independently; each holds its own flush lock
        let flushes = due.iter().map(|destination| async move {
            (destination, self.flush_destination(destination).await)
        });
        for (destination, result) in futures::future::join_all(flushes).await {
            if let Err(e) = result {
                debug!(destination = %destination, error = %e, "Background flush failed");
            }
        }
    }

    async fn run_flusher(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let period = self.config.flush_interval_duration();
        let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval = ?period,
            cooldown = ?self.config.flush_cooldown_duration(),
            "Starting batched queue flusher"
        );

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.flush_due().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Batched queue flusher stopping");
                        break;
                    }
                }
            }
        }
    }
}

/// Per-destination queues drained by bulk requests.
pub struct BatchedQueueSink {
    inner: Arc<Inner>,
    mapping: DestinationMapping,
    max_record_size: usize,
    shutdown_tx: watch::Sender<bool>,
    flusher: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl BatchedQueueSink {
    /// Build the sink and spawn its flusher.
    ///
    /// Fails with a config error outside a tokio runtime or when the batched
    /// settings are invalid.
    pub fn new(config: &SinkConfig, client: Arc<SharedClient<dyn BulkClient>>) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ExportError::Config("batched sink must be built inside a tokio runtime".into())
        })?;
        config.batched.validate()?;

        let inner = Arc::new(Inner {
            client,
            queues: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            config: config.batched.clone(),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let flusher = if config.batched.batch_puts {
            let span = tracing::info_span!("batched_flusher");
            let task = Arc::clone(&inner).run_flusher(shutdown_rx);
            Some(runtime.spawn(task.instrument(span)))
        } else {
            None
        };

        Ok(Self {
            inner,
            mapping: config.mapping()?,
            max_record_size: config.max_record_size_bytes,
            shutdown_tx,
            flusher: Mutex::new(flusher),
            stopped: AtomicBool::new(false),
        })
    }

    /// Records waiting for `destination`.
    pub async fn queue_depth(&self, destination: &str) -> usize {
        match self.inner.queue(destination).await {
            Some(queue) => queue.entries.lock().await.len(),
            None => 0,
        }
    }

    /// Destinations that have a queue, sorted.
    pub async fn destinations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.queues.read().await.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Payloads waiting for `destination`, oldest first.
    pub async fn queued(&self, destination: &str) -> Vec<Bytes> {
        match self.inner.queue(destination).await {
            Some(queue) => queue
                .entries
                .lock()
                .await
                .iter()
                .map(|e| e.payload.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Run one flush cycle for `destination` now.
    pub async fn flush_destination(&self, destination: &str) -> Result<FlushReport> {
        self.inner.flush_destination(destination).await
    }

    async fn enqueue(&self, payload: Bytes, table: &str) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ExportError::Shutdown);
        }
        let destination = self.mapping.require(table)?;
        check_record_size(&payload, self.max_record_size)?;

        if !self.inner.config.batch_puts {
            return self.put_single(destination, payload).await;
        }

        let queue = self.inner.queue_or_create(destination).await;
        let depth = queue.entries.lock().await.len();
        if depth >= self.inner.config.max_queued_before_flush {
            debug!(destination = %destination, depth, "Queue at threshold, flushing inline");
            match self.inner.flush_destination(destination).await {
                Ok(_) => {}
                Err(e) if e.is_retryable() => {
                    warn!(destination = %destination, error = %e, "Inline flush failed, queueing anyway");
                }
                Err(e) => return Err(e),
            }
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let depth = {
            let mut entries = queue.entries.lock().await;
            entries.push_back(QueueEntry { id, payload });
            entries.len()
        };
        metrics::set_queue_depth(destination, depth);
        Ok(())
    }

    async fn put_single(&self, destination: &str, payload: Bytes) -> Result<()> {
        let client = self.inner.client.get().await?;
        let started = Instant::now();
        let outcomes = client
            .put_record_batch(destination.to_string(), vec![payload])
            .await
            .map_err(|e| {
                metrics::record_dispatch_error(destination, e.kind.as_str());
                e.into_export(destination)
            })?;

        match outcomes.into_iter().next() {
            Some(RecordOutcome::Delivered) => {
                debug!(
                    destination = %destination,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Record delivered"
                );
                Ok(())
            }
            Some(RecordOutcome::Failed { code, message }) => {
                metrics::record_dispatch_error(destination, "record_failed");
                Err(ExportError::dispatch(
                    destination,
                    DispatchClass::Retryable,
                    format!("{}: {}", code, message),
                ))
            }
            None => Err(ExportError::dispatch(
                destination,
                DispatchClass::Retryable,
                "no outcome returned for record",
            )),
        }
    }

    /// Drain every queue, repeating while cycles make progress.
    async fn drain(&self) -> Result<()> {
        for destination in self.destinations().await {
            loop {
                let report = self.inner.flush_destination(&destination).await?;
                if report.remaining == 0 {
                    break;
                }
                if report.delivered == 0 {
                    return Err(ExportError::dispatch(
                        destination.as_str(),
                        DispatchClass::Retryable,
                        format!("{} records still queued after flush", report.remaining),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.flusher.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Batched queue flusher panicked");
            }
        }
        let result = self.drain().await;
        let destinations = self.destinations().await.len();
        info!(
            destinations,
            clean = result.is_ok(),
            "Batched queue sink stopped"
        );
        result
    }
}

impl Sink for BatchedQueueSink {
    fn name(&self) -> &'static str {
        NAME
    }

    fn mapping(&self) -> &DestinationMapping {
        &self.mapping
    }

    fn put_record<'a>(&'a self, payload: Bytes, table: &'a str) -> SinkFuture<'a, ()> {
        Box::pin(self.enqueue(payload, table))
    }

    fn flush(&self) -> SinkFuture<'_, ()> {
        Box::pin(self.drain())
    }

    fn is_blocking(&self) -> bool {
        !self.inner.config.batch_puts
    }

    fn shutdown(&self) -> SinkFuture<'_, ()> {
        Box::pin(self.stop())
    }
}

impl Drop for BatchedQueueSink {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
