// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Recording destination clients.
//!
//! Each mock records what it was given and can be told to fail, so tests can
//! assert what reached the destination without any network.

use bytes::Bytes;
use replication_sink::client::{
    Attempt, BulkClient, ClientFuture, DestinationError, DestinationErrorKind, PartitionedClient,
    RecordOutcome, TopicClient, UserRecordResult,
};
use replication_sink::filter::{ExistenceOracle, OracleError, OracleFuture};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

// =============================================================================
// Topic
// =============================================================================

/// Immediate-ack client that records every acknowledged send.
#[derive(Default)]
pub struct RecordingTopic {
    pub sent: RwLock<Vec<(String, String, Bytes)>>,
    /// Fail this many sends, then succeed.
    pub fail_next: AtomicUsize,
    pub fail_kind: RwLock<Option<DestinationErrorKind>>,
    pub attempts: AtomicUsize,
}

impl RecordingTopic {
    pub fn failing(times: usize, kind: DestinationErrorKind) -> Self {
        Self {
            fail_next: AtomicUsize::new(times),
            fail_kind: RwLock::new(Some(kind)),
            ..Default::default()
        }
    }

    pub async fn payloads(&self) -> Vec<Bytes> {
        self.sent.read().await.iter().map(|(_, _, p)| p.clone()).collect()
    }
}

impl TopicClient for RecordingTopic {
    fn send(&self, destination: String, key: String, payload: Bytes) -> ClientFuture<'_, ()> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let should_fail = self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_fail {
                let kind = self.fail_kind.read().await.unwrap_or(DestinationErrorKind::Unavailable);
                return Err(DestinationError::new(kind, "injected failure"));
            }
            self.sent.write().await.push((destination, key, payload));
            Ok(())
        })
    }

    fn destination_exists(&self, _destination: String) -> ClientFuture<'_, bool> {
        Box::pin(async { Ok(true) })
    }

    fn create_destination(
        &self,
        _destination: String,
        _partitions: u32,
        _replication_factor: u16,
    ) -> ClientFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

// =============================================================================
// Bulk
// =============================================================================

/// Bulk client whose per-record outcome is decided by a predicate.
pub struct RecordingBulk {
    pub requests: RwLock<Vec<(String, Vec<Bytes>)>>,
    pub delivered: RwLock<Vec<Bytes>>,
    accept: Box<dyn Fn(usize, &Bytes) -> bool + Send + Sync>,
    /// Refuse this many whole requests as throttled, then behave.
    pub throttle_next: AtomicUsize,
}

impl Default for RecordingBulk {
    fn default() -> Self {
        Self::accepting(|_, _| true)
    }
}

impl RecordingBulk {
    /// `accept(index_in_request, payload)` decides each record's outcome.
    pub fn accepting<F>(accept: F) -> Self
    where
        F: Fn(usize, &Bytes) -> bool + Send + Sync + 'static,
    {
        Self {
            requests: RwLock::new(Vec::new()),
            delivered: RwLock::new(Vec::new()),
            accept: Box::new(accept),
            throttle_next: AtomicUsize::new(0),
        }
    }

    pub async fn request_count(&self) -> usize {
        self.requests.read().await.len()
    }
}

impl BulkClient for RecordingBulk {
    fn put_record_batch(
        &self,
        destination: String,
        records: Vec<Bytes>,
    ) -> ClientFuture<'_, Vec<RecordOutcome>> {
        Box::pin(async move {
            let throttled = self
                .throttle_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if throttled {
                return Err(DestinationError::throttled("ServiceUnavailable"));
            }

            let mut outcomes = Vec::with_capacity(records.len());
            let mut delivered = self.delivered.write().await;
            for (i, record) in records.iter().enumerate() {
                if (self.accept)(i, record) {
                    delivered.push(record.clone());
                    outcomes.push(RecordOutcome::Delivered);
                } else {
                    outcomes.push(RecordOutcome::Failed {
                        code: "ServiceUnavailableException".into(),
                        message: "slow down".into(),
                    });
                }
            }
            drop(delivered);
            self.requests.write().await.push((destination, records));
            Ok(outcomes)
        })
    }
}

// =============================================================================
// Partitioned
// =============================================================================

/// Partitioned client that records partition keys.
#[derive(Default)]
pub struct RecordingPartitioned {
    pub records: RwLock<Vec<(String, String, Bytes)>>,
    /// Report this many records as failed after two attempts.
    pub fail_next: AtomicUsize,
    pub flushes: AtomicUsize,
}

impl PartitionedClient for RecordingPartitioned {
    fn add_user_record(
        &self,
        destination: String,
        partition_key: String,
        payload: Bytes,
    ) -> ClientFuture<'_, UserRecordResult> {
        Box::pin(async move {
            let failed = self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Ok(UserRecordResult {
                    successful: false,
                    shard_id: None,
                    attempts: vec![
                        Attempt::failed("ProvisionedThroughputExceededException", "rate exceeded"),
                        Attempt::failed("ProvisionedThroughputExceededException", "rate exceeded"),
                    ],
                });
            }
            self.records.write().await.push((destination, partition_key, payload));
            Ok(UserRecordResult {
                successful: true,
                shard_id: Some("shardId-000000000000".into()),
                attempts: vec![Attempt::ok()],
            })
        })
    }

    fn flush_all(&self) -> ClientFuture<'_, ()> {
        Box::pin(async move {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Fixed local catalog. Lookups for tables named `unreachable` fail.
#[derive(Default)]
pub struct FixedCatalog {
    tables: HashMap<String, HashSet<Vec<u8>>>,
}

impl FixedCatalog {
    pub fn with_table(mut self, table: &str, families: &[&str]) -> Self {
        self.tables.insert(
            table.to_string(),
            families.iter().map(|f| f.as_bytes().to_vec()).collect(),
        );
        self
    }
}

impl ExistenceOracle for FixedCatalog {
    fn table_exists(&self, table: &str) -> OracleFuture<'_, bool> {
        let result = if table == "unreachable" {
            Err(OracleError("catalog unavailable".into()))
        } else {
            Ok(self.tables.contains_key(table))
        };
        Box::pin(async move { result })
    }

    fn column_families(&self, table: &str) -> OracleFuture<'_, HashSet<Vec<u8>>> {
        let result = match self.tables.get(table) {
            Some(families) => Ok(families.clone()),
            None => Err(OracleError(format!("no such table: {}", table))),
        };
        Box::pin(async move { result })
    }
}
