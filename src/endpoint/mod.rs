// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication endpoint.
//!
//! Ties the pipeline together for one source shard:
//!
//! 1. Local existence filters ([`FilterChain`])
//! 2. The sink's mapping filter
//! 3. Host-supplied [`EntryFilter`]s
//! 4. `begin`, then encode and `put_record` each surviving entry in order
//! 5. `commit` when every entry shipped, `abort` on the first failure
//!
//! The endpoint never retries. A failed call leaves the transaction
//! `Aborted` and the error goes back to the caller, who owns batch-level
//! retry. Sinks that buffer may already hold part of a failed batch, so a
//! retried batch can be delivered twice.

mod types;

pub use types::{EndpointState, ReplicateSummary, ReplicationBatch, TransactionState};

use crate::codec;
use crate::config::ExportConfig;
use crate::error::{ExportError, Result};
use crate::filter::{EntryFilter, ExistenceOracle, FilterChain};
use crate::metrics;
use crate::model::ChangeEvent;
use crate::sink::Sink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// How long `stop` waits for the sink to flush and shut down.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Exports replicated WAL batches through one sink.
///
/// One `replicate` call runs at a time per endpoint. Endpoints for different
/// shards may share sinks and clients.
pub struct ReplicationEndpoint {
    config: ExportConfig,
    sink: Arc<dyn Sink>,
    filters: FilterChain,
    entry_filters: Vec<Arc<dyn EntryFilter>>,
    state_tx: watch::Sender<EndpointState>,
    state_rx: watch::Receiver<EndpointState>,
    last_transaction: TransactionState,
}

impl ReplicationEndpoint {
    /// Create an endpoint in `Created` state.
    pub fn new(config: ExportConfig, sink: Arc<dyn Sink>, oracle: Arc<dyn ExistenceOracle>) -> Self {
        let filters = FilterChain::new(&config.filters, oracle);
        let (state_tx, state_rx) = watch::channel(EndpointState::Created);
        Self {
            config,
            sink,
            filters,
            entry_filters: Vec::new(),
            state_tx,
            state_rx,
            last_transaction: TransactionState::NotStarted,
        }
    }

    /// Append a host filter, run after the sink's mapping filter.
    pub fn with_entry_filter(mut self, filter: impl EntryFilter + 'static) -> Self {
        self.entry_filters.push(Arc::new(filter));
        self
    }

    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    pub fn state(&self) -> EndpointState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EndpointState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), EndpointState::Running)
    }

    /// Transaction state left by the most recent `replicate` call.
    pub fn last_transaction_state(&self) -> TransactionState {
        self.last_transaction
    }

    /// Validate configuration and start accepting batches.
    pub fn start(&mut self) -> Result<()> {
        match self.state() {
            EndpointState::Running => return Ok(()),
            EndpointState::Stopped => return Err(ExportError::Shutdown),
            EndpointState::Created => {}
        }
        self.config.validate()?;

        info!(
            sink = self.sink.name(),
            destinations = self.sink.mapping().len(),
            blocking = self.sink.is_blocking(),
            existence_filters = self.filters.is_enabled(),
            compression = self.config.compression_enabled,
            "Starting replication endpoint"
        );
        let _ = self.state_tx.send(EndpointState::Running);
        Ok(())
    }

    /// Flush the sink and stop its background work.
    ///
    /// The endpoint ends `Stopped` even if the flush fails.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state() == EndpointState::Stopped {
            return Ok(());
        }
        info!(sink = self.sink.name(), "Stopping replication endpoint");

        let result = match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.sink.shutdown()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(error = %e, "Sink shutdown left records undelivered");
                Err(e)
            }
            Err(_) => {
                warn!(timeout = ?SHUTDOWN_TIMEOUT, "Sink shutdown timed out (records may be lost)");
                Err(ExportError::Internal(format!(
                    "sink shutdown timed out after {:?}",
                    SHUTDOWN_TIMEOUT
                )))
            }
        };

        let _ = self.state_tx.send(EndpointState::Stopped);
        info!("Replication endpoint stopped");
        result
    }

    /// Filter, encode and dispatch one batch.
    ///
    /// Fails on the first entry that cannot be encoded or dispatched; the
    /// rest of the batch is not attempted.
    #[instrument(
        skip_all,
        fields(wal_group = %batch.wal_group_id, entries = batch.entries.len(), sink = self.sink.name())
    )]
    pub async fn replicate(&mut self, batch: ReplicationBatch) -> Result<ReplicateSummary> {
        if !self.is_running() {
            return Err(ExportError::Shutdown);
        }
        self.last_transaction = TransactionState::NotStarted;

        let ReplicationBatch {
            wal_group_id,
            entries,
        } = batch;
        let received = entries.len();

        let entries = self.filter(entries).await;
        let filtered = received - entries.len();
        metrics::record_edits_filtered(filtered);
        if filtered > 0 {
            debug!(filtered, remaining = entries.len(), "Filtered entries");
        }

        let transactional = self.sink.supports_transaction();
        if transactional {
            self.sink.begin()?;
        }
        self.last_transaction = TransactionState::Active;

        for (index, entry) in entries.iter().enumerate() {
            if let Err(e) = self.ship(entry).await {
                if transactional {
                    self.sink.abort();
                }
                self.last_transaction = TransactionState::Aborted;
                let destination = self
                    .sink
                    .mapping()
                    .destination_for(entry.table_name())
                    .unwrap_or(entry.table_name());
                metrics::record_dispatch_error(destination, e.kind());
                error!(
                    table = %entry.table_name(),
                    index,
                    remaining = entries.len() - index - 1,
                    error = %e,
                    "Aborting batch"
                );
                return Err(e);
            }
        }

        if transactional {
            if let Err(e) = self.sink.commit() {
                self.last_transaction = TransactionState::Aborted;
                error!(error = %e, "Commit failed");
                return Err(e);
            }
        }
        self.last_transaction = TransactionState::Committed;

        for entry in &entries {
            metrics::record_completed(entry.table_name());
            metrics::set_age_of_last_shipped_op(
                &wal_group_id,
                entry.table_name(),
                entry.key.write_time,
            );
        }

        debug!(shipped = entries.len(), "Batch committed");
        Ok(ReplicateSummary {
            received,
            filtered,
            shipped: entries.len(),
            state: self.last_transaction,
        })
    }

    async fn filter(&self, entries: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
        let entries = self.filters.apply(entries).await;
        let entries = self.sink.filter(entries);
        if self.entry_filters.is_empty() {
            return entries;
        }
        entries
            .into_iter()
            .filter_map(|entry| {
                self.entry_filters
                    .iter()
                    .try_fold(entry, |entry, filter| filter.filter(entry))
            })
            .collect()
    }

    async fn ship(&self, entry: &ChangeEvent) -> Result<()> {
        let payload = codec::encode(entry, self.config.compression_enabled)?;
        self.sink.put_record(payload, entry.table_name()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::NoOpOracle;
    use crate::mapping::DestinationMapping;
    use crate::model::{Cell, Edit, RowKey};
    use crate::sink::SinkFuture;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Sink that records payloads and fails the n-th put when asked.
    struct Recorder {
        mapping: DestinationMapping,
        payloads: Mutex<Vec<(String, Bytes)>>,
        fail_at: Option<usize>,
        puts: AtomicUsize,
        transactional: bool,
        calls: Mutex<Vec<&'static str>>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                mapping: DestinationMapping::from_pairs([("orders", "orders-out")]),
                payloads: Mutex::new(Vec::new()),
                fail_at: None,
                puts: AtomicUsize::new(0),
                transactional: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Sink for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }
        fn mapping(&self) -> &DestinationMapping {
            &self.mapping
        }
        fn put_record<'a>(&'a self, payload: Bytes, table: &'a str) -> SinkFuture<'a, ()> {
            Box::pin(async move {
                let n = self.puts.fetch_add(1, Ordering::SeqCst);
                if Some(n) == self.fail_at {
                    return Err(ExportError::dispatch(
                        "orders-out",
                        crate::error::DispatchClass::Retryable,
                        "scripted",
                    ));
                }
                self.payloads.lock().unwrap().push((table.to_string(), payload));
                Ok(())
            })
        }
        fn flush(&self) -> SinkFuture<'_, ()> {
            Box::pin(async {
                self.calls.lock().unwrap().push("flush");
                Ok(())
            })
        }
        fn is_blocking(&self) -> bool {
            true
        }
        fn supports_transaction(&self) -> bool {
            self.transactional
        }
        fn begin(&self) -> Result<()> {
            self.calls.lock().unwrap().push("begin");
            Ok(())
        }
        fn commit(&self) -> Result<()> {
            self.calls.lock().unwrap().push("commit");
            Ok(())
        }
        fn abort(&self) {
            self.calls.lock().unwrap().push("abort");
        }
    }

    fn entry(table: &str, row: &str) -> ChangeEvent {
        ChangeEvent::new(
            RowKey::new(table, b"region".to_vec()),
            Edit::from_cells(vec![Cell::put(row, "cf", "q", "v", 1)]),
        )
    }

    fn endpoint(sink: Arc<Recorder>) -> ReplicationEndpoint {
        let mut config = ExportConfig::for_testing();
        config.sink.table_map = vec!["orders:orders-out".into()];
        let mut endpoint = ReplicationEndpoint::new(config, sink, Arc::new(NoOpOracle));
        endpoint.start().unwrap();
        endpoint
    }

    #[tokio::test]
    async fn test_replicate_not_running() {
        let sink = Arc::new(Recorder::new());
        let mut endpoint =
            ReplicationEndpoint::new(ExportConfig::for_testing(), sink, Arc::new(NoOpOracle));
        assert_eq!(endpoint.state(), EndpointState::Created);

        let err = endpoint
            .replicate(ReplicationBatch::new("wal", vec![entry("orders", "r")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Shutdown));
        assert_eq!(endpoint.last_transaction_state(), TransactionState::NotStarted);
    }

    #[tokio::test]
    async fn test_replicate_ships_mapped_entries() {
        let sink = Arc::new(Recorder::new());
        let mut endpoint = endpoint(Arc::clone(&sink));

        let summary = endpoint
            .replicate(ReplicationBatch::new(
                "wal",
                vec![entry("orders", "r1"), entry("users", "r2"), entry("orders", "r3")],
            ))
            .await
            .unwrap();

        assert_eq!(
            summary,
            ReplicateSummary {
                received: 3,
                filtered: 1,
                shipped: 2,
                state: TransactionState::Committed,
            }
        );
        let payloads = sink.payloads.lock().unwrap();
        let rows: Vec<Vec<u8>> = payloads
            .iter()
            .map(|(_, p)| codec::decode(p).unwrap().edit.cells[0].row.clone())
            .collect();
        assert_eq!(rows, vec![b"r1".to_vec(), b"r3".to_vec()]);
    }

    #[tokio::test]
    async fn test_failure_aborts_and_stops() {
        let sink = Arc::new(Recorder {
            fail_at: Some(1),
            transactional: true,
            ..Recorder::new()
        });
        let mut endpoint = endpoint(Arc::clone(&sink));

        let err = endpoint
            .replicate(ReplicationBatch::new(
                "wal",
                vec![entry("orders", "r1"), entry("orders", "r2"), entry("orders", "r3")],
            ))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(endpoint.last_transaction_state(), TransactionState::Aborted);
        assert_eq!(sink.calls(), vec!["begin", "abort"]);
        // Third entry never attempted
        assert_eq!(sink.puts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transactional_sink_commits() {
        let sink = Arc::new(Recorder {
            transactional: true,
            ..Recorder::new()
        });
        let mut endpoint = endpoint(Arc::clone(&sink));
        endpoint
            .replicate(ReplicationBatch::new("wal", vec![entry("orders", "r1")]))
            .await
            .unwrap();
        assert_eq!(sink.calls(), vec!["begin", "commit"]);
        assert_eq!(endpoint.last_transaction_state(), TransactionState::Committed);
    }

    #[tokio::test]
    async fn test_non_transactional_sink_skips_bracketing() {
        let sink = Arc::new(Recorder::new());
        let mut endpoint = endpoint(Arc::clone(&sink));
        endpoint
            .replicate(ReplicationBatch::new("wal", vec![entry("orders", "r1")]))
            .await
            .unwrap();
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_entry_filters_run_after_mapping() {
        let sink = Arc::new(Recorder::new());
        let mut endpoint = endpoint(Arc::clone(&sink)).with_entry_filter(|e: ChangeEvent| {
            (e.edit.cells[0].row != b"skip".to_vec()).then_some(e)
        });

        let summary = endpoint
            .replicate(ReplicationBatch::new(
                "wal",
                vec![entry("orders", "skip"), entry("orders", "keep")],
            ))
            .await
            .unwrap();
        assert_eq!(summary.shipped, 1);
        assert_eq!(summary.filtered, 1);
    }

    #[derive(Default)]
    struct Tally(std::sync::atomic::AtomicU64);

    impl ::metrics::CounterFn for Tally {
        fn increment(&self, value: u64) {
            self.0.fetch_add(value, Ordering::SeqCst);
        }
        fn absolute(&self, value: u64) {
            self.0.store(value, Ordering::SeqCst);
        }
    }

    /// Recorder that only tracks the filtered-entries counter.
    struct FilteredRecorder(Arc<Tally>);

    impl ::metrics::Recorder for FilteredRecorder {
        fn describe_counter(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}
        fn describe_gauge(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}
        fn describe_histogram(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}

        fn register_counter(&self, key: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Counter {
            if key.name() == "replication_sink_edits_filtered_total" {
                ::metrics::Counter::from_arc(Arc::clone(&self.0))
            } else {
                ::metrics::Counter::noop()
            }
        }
        fn register_gauge(&self, _: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Gauge {
            ::metrics::Gauge::noop()
        }
        fn register_histogram(&self, _: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Histogram {
            ::metrics::Histogram::noop()
        }
    }

    #[test]
    fn test_filtered_metric_counts_every_stage() {
        let tally = Arc::new(Tally::default());
        let recorder = FilteredRecorder(Arc::clone(&tally));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let summary = ::metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let sink = Arc::new(Recorder::new());
                let mut endpoint = endpoint(sink).with_entry_filter(|e: ChangeEvent| {
                    (e.edit.cells[0].row != b"skip".to_vec()).then_some(e)
                });
                endpoint
                    .replicate(ReplicationBatch::new(
                        "wal",
                        vec![entry("orders", "skip"), entry("users", "r"), entry("orders", "keep")],
                    ))
                    .await
                    .unwrap()
            })
        });

        assert_eq!(summary.filtered, 2);
        assert_eq!(tally.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_commits() {
        let sink = Arc::new(Recorder::new());
        let mut endpoint = endpoint(sink);
        let summary = endpoint
            .replicate(ReplicationBatch::new("wal", Vec::new()))
            .await
            .unwrap();
        assert_eq!(summary.shipped, 0);
        assert_eq!(summary.state, TransactionState::Committed);
    }

    #[tokio::test]
    async fn test_stop_flushes_and_refuses() {
        let sink = Arc::new(Recorder::new());
        let mut endpoint = endpoint(Arc::clone(&sink));

        endpoint.stop().await.unwrap();
        assert_eq!(endpoint.state(), EndpointState::Stopped);
        assert_eq!(sink.calls(), vec!["flush"]);

        assert!(matches!(endpoint.start(), Err(ExportError::Shutdown)));
        let err = endpoint
            .replicate(ReplicationBatch::new("wal", vec![entry("orders", "r")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Shutdown));
    }

    #[test]
    fn test_start_rejects_bad_config() {
        let mut config = ExportConfig::for_testing();
        config.sink.table_map = vec!["broken".into()];
        let mut endpoint =
            ReplicationEndpoint::new(config, Arc::new(Recorder::new()), Arc::new(NoOpOracle));
        assert!(matches!(endpoint.start(), Err(ExportError::Config(_))));
        assert_eq!(endpoint.state(), EndpointState::Created);
    }
}
