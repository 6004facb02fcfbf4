// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Immediate-ack strategy.
//!
//! Every `put_record` is exactly one send, awaited until the destination
//! acknowledges it. Nothing is buffered, so `flush` has nothing to do.
//!
//! Records are keyed by a counter seeded from the wall clock at construction,
//! so keys increase monotonically for the life of the sink.
//!
//! # Missing destinations
//!
//! A send that fails with not-found or timeout triggers a lookup. If the
//! destination is really absent and provisioning is enabled, it is created
//! with the configured partitions and replication factor. Either way the
//! record is **not** resent: the call fails with
//! [`ExportError::DestinationMissing`] and the caller's next attempt lands on
//! the new destination.

use super::{check_record_size, Sink, SinkFuture};
use crate::client::{DestinationError, DestinationErrorKind, SharedClient, TopicClient};
use crate::config::{ImmediateAckConfig, SinkConfig};
use crate::error::{ExportError, Result};
use crate::mapping::DestinationMapping;
use crate::metrics;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Registry name.
pub const NAME: &str = "immediate";

/// Synchronous per-record dispatch to a topic destination.
pub struct ImmediateAckSink {
    client: Arc<SharedClient<dyn TopicClient>>,
    mapping: DestinationMapping,
    config: ImmediateAckConfig,
    max_record_size: usize,
    key_base: u64,
    sent: AtomicU64,
}

impl ImmediateAckSink {
    pub fn new(config: &SinkConfig, client: Arc<SharedClient<dyn TopicClient>>) -> Result<Self> {
        let key_base = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Ok(Self {
            client,
            mapping: config.mapping()?,
            config: config.immediate.clone(),
            max_record_size: config.max_record_size_bytes,
            key_base,
            sent: AtomicU64::new(0),
        })
    }

    /// Records handed to the destination so far, acknowledged or not.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    fn next_key(&self) -> u64 {
        self.key_base
            .wrapping_add(self.sent.fetch_add(1, Ordering::Relaxed))
    }

    async fn send(&self, payload: Bytes, table: &str) -> Result<()> {
        let destination = self.mapping.require(table)?.to_string();
        check_record_size(&payload, self.max_record_size)?;

        let client = self.client.get().await?;
        let key = self.next_key().to_string();
        let started = Instant::now();

        match client.send(destination.clone(), key.clone(), payload).await {
            Ok(()) => {
                debug!(
                    destination = %destination,
                    key = %key,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Record acknowledged"
                );
                Ok(())
            }
            Err(e) => {
                error!(destination = %destination, key = %key, error = %e, "Send failed");
                metrics::record_dispatch_error(&destination, e.kind.as_str());
                match e.kind {
                    DestinationErrorKind::NotFound | DestinationErrorKind::Timeout => {
                        Err(self.resolve_missing(client.as_ref(), &destination, e).await)
                    }
                    _ => Err(e.into_export(&destination)),
                }
            }
        }
    }

    /// Decide what a not-found or timeout send means, provisioning if allowed.
    async fn resolve_missing(
        &self,
        client: &dyn TopicClient,
        destination: &str,
        send_error: DestinationError,
    ) -> ExportError {
        let exists = match client.destination_exists(destination.to_string()).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(destination = %destination, error = %e, "Destination lookup failed");
                return send_error.into_export(destination);
            }
        };

        if exists {
            // A real timeout against a live destination
            return send_error.into_export(destination);
        }

        if !self.config.create_destination_if_missing {
            warn!(destination = %destination, "Destination does not exist and provisioning is disabled");
            return ExportError::DestinationMissing {
                destination: destination.to_string(),
                provisioned: false,
            };
        }

        let provisioned = match client
            .create_destination(
                destination.to_string(),
                self.config.partitions,
                self.config.replication_factor,
            )
            .await
        {
            Ok(()) => {
                info!(
                    destination = %destination,
                    partitions = self.config.partitions,
                    replication_factor = self.config.replication_factor,
                    "Provisioned missing destination"
                );
                metrics::record_destination_provisioned(destination);
                true
            }
            Err(e) => {
                error!(destination = %destination, error = %e, "Failed to provision destination");
                false
            }
        };

        ExportError::DestinationMissing {
            destination: destination.to_string(),
            provisioned,
        }
    }
}

impl Sink for ImmediateAckSink {
    fn name(&self) -> &'static str {
        NAME
    }

    fn mapping(&self) -> &DestinationMapping {
        &self.mapping
    }

    fn put_record<'a>(&'a self, payload: Bytes, table: &'a str) -> SinkFuture<'a, ()> {
        Box::pin(self.send(payload, table))
    }

    fn flush(&self) -> SinkFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn is_blocking(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientFuture;
    use tokio::sync::RwLock;

    /// Topic client with a scripted failure for the next sends.
    #[derive(Default)]
    struct ScriptedTopic {
        sent: RwLock<Vec<(String, String, Bytes)>>,
        fail_with: RwLock<Option<DestinationErrorKind>>,
        existing: RwLock<Vec<String>>,
        created: RwLock<Vec<(String, u32, u16)>>,
    }

    impl TopicClient for ScriptedTopic {
        fn send(&self, destination: String, key: String, payload: Bytes) -> ClientFuture<'_, ()> {
            Box::pin(async move {
                if let Some(kind) = *self.fail_with.read().await {
                    return Err(DestinationError::new(kind, "scripted"));
                }
                self.sent.write().await.push((destination, key, payload));
                Ok(())
            })
        }

        fn destination_exists(&self, destination: String) -> ClientFuture<'_, bool> {
            Box::pin(async move { Ok(self.existing.read().await.contains(&destination)) })
        }

        fn create_destination(&self, destination: String, partitions: u32, rf: u16) -> ClientFuture<'_, ()> {
            Box::pin(async move {
                self.created.write().await.push((destination.clone(), partitions, rf));
                self.existing.write().await.push(destination);
                Ok(())
            })
        }
    }

    fn sink_with(client: Arc<ScriptedTopic>, create: bool) -> ImmediateAckSink {
        let mut config = SinkConfig {
            table_map: vec!["orders:orders-topic".into()],
            max_record_size_bytes: 64,
            ..Default::default()
        };
        config.immediate.create_destination_if_missing = create;
        config.immediate.partitions = 3;
        let shared = Arc::new(SharedClient::ready(client as Arc<dyn TopicClient>));
        ImmediateAckSink::new(&config, shared).unwrap()
    }

    #[tokio::test]
    async fn test_send_one_record() {
        let client = Arc::new(ScriptedTopic::default());
        let sink = sink_with(client.clone(), false);

        sink.put_record(Bytes::from_static(b"payload"), "orders").await.unwrap();

        let sent = client.sent.read().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "orders-topic");
        assert_eq!(&sent[0].2[..], b"payload");
        assert_eq!(sink.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_keys_increase() {
        let client = Arc::new(ScriptedTopic::default());
        let sink = sink_with(client.clone(), false);

        for _ in 0..5 {
            sink.put_record(Bytes::from_static(b"p"), "orders").await.unwrap();
        }
        let keys: Vec<u64> = client
            .sent
            .read()
            .await
            .iter()
            .map(|(_, k, _)| k.parse().unwrap())
            .collect();
        assert!(keys.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[tokio::test]
    async fn test_overflow_before_network() {
        let client = Arc::new(ScriptedTopic::default());
        let sink = sink_with(client.clone(), false);

        let err = sink
            .put_record(Bytes::from(vec![0u8; 65]), "orders")
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Overflow { size: 65, max: 64 }));
        assert!(client.sent.read().await.is_empty());
        assert_eq!(sink.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_unmapped_table() {
        let sink = sink_with(Arc::new(ScriptedTopic::default()), false);
        let err = sink.put_record(Bytes::from_static(b"p"), "users").await.unwrap_err();
        assert!(matches!(err, ExportError::NotMapped { .. }));
    }

    #[tokio::test]
    async fn test_missing_destination_provisioned_not_retried() {
        let client = Arc::new(ScriptedTopic::default());
        *client.fail_with.write().await = Some(DestinationErrorKind::Timeout);
        let sink = sink_with(client.clone(), true);

        let err = sink.put_record(Bytes::from_static(b"p"), "orders").await.unwrap_err();
        assert!(matches!(
            err,
            ExportError::DestinationMissing { provisioned: true, .. }
        ));
        assert_eq!(
            *client.created.read().await,
            vec![("orders-topic".to_string(), 3, 2)]
        );
        // Provisioning does not resend
        assert!(client.sent.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_destination_provisioning_disabled() {
        let client = Arc::new(ScriptedTopic::default());
        *client.fail_with.write().await = Some(DestinationErrorKind::NotFound);
        let sink = sink_with(client.clone(), false);

        let err = sink.put_record(Bytes::from_static(b"p"), "orders").await.unwrap_err();
        assert!(matches!(
            err,
            ExportError::DestinationMissing { provisioned: false, .. }
        ));
        assert!(client.created.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_on_existing_destination_is_retryable() {
        let client = Arc::new(ScriptedTopic::default());
        client.existing.write().await.push("orders-topic".into());
        *client.fail_with.write().await = Some(DestinationErrorKind::Timeout);
        let sink = sink_with(client.clone(), true);

        let err = sink.put_record(Bytes::from_static(b"p"), "orders").await.unwrap_err();
        assert!(matches!(err, ExportError::Dispatch { .. }));
        assert!(err.is_retryable());
        assert!(client.created.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_is_non_retryable() {
        let client = Arc::new(ScriptedTopic::default());
        *client.fail_with.write().await = Some(DestinationErrorKind::Rejected);
        let sink = sink_with(client, true);

        let err = sink.put_record(Bytes::from_static(b"p"), "orders").await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_contract_flags() {
        let sink = sink_with(Arc::new(ScriptedTopic::default()), false);
        assert_eq!(sink.name(), "immediate");
        assert!(sink.is_blocking());
        assert!(!sink.supports_transaction());
        assert!(sink.flush().await.is_ok());
        assert!(sink
            .put_record_with_partition(Bytes::from_static(b"p"), "orders", b"k")
            .await
            .is_err());
    }
}
