// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis Streams as a topic destination.
//!
//! Each destination is a stream key. Records are appended with `XADD` under
//! the fields `key` and `payload`. A destination exists once the stream key
//! exists; provisioning creates it empty through `XGROUP CREATE ... MKSTREAM`
//! with a consumer group named after [`CONSUMER_GROUP`].
//!
//! Streams have no partitions or replicas, so those provisioning parameters
//! are only logged.

use super::{ClientFuture, DestinationError, DestinationErrorKind, SharedClient, TopicClient};
use crate::error::{ExportError, Result};
use ::redis::aio::ConnectionManager;
use ::redis::{Client, ErrorKind, RedisError};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Consumer group created alongside a provisioned stream.
pub const CONSUMER_GROUP: &str = "replication-sink";

/// Deadline for establishing the connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A [`TopicClient`] backed by Redis Streams.
#[derive(Clone)]
pub struct RedisStreamClient {
    conn: ConnectionManager,
}

impl RedisStreamClient {
    /// Connect to `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| ExportError::Config(format!("Invalid Redis URL: {}", e)))?;

        let conn = timeout(CONNECT_TIMEOUT, client.get_connection_manager())
            .await
            .map_err(|_| ExportError::Redis {
                operation: "connect".to_string(),
                message: format!("timed out after {:?}", CONNECT_TIMEOUT),
                source: None,
            })?
            .map_err(|e| ExportError::redis("connect", e))?;

        info!(url = %url, "Connected to Redis stream destination");
        Ok(Self { conn })
    }

    /// A shared handle that connects to `url` on first use.
    pub fn shared(url: impl Into<String>) -> SharedClient<dyn TopicClient> {
        let url = url.into();
        SharedClient::lazy(move || {
            let url = url.clone();
            Box::pin(async move {
                let client = RedisStreamClient::connect(&url).await?;
                Ok(Arc::new(client) as Arc<dyn TopicClient>)
            })
        })
    }
}

fn classify(e: RedisError) -> DestinationError {
    let kind = if e.is_timeout() {
        DestinationErrorKind::Timeout
    } else if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        DestinationErrorKind::Unavailable
    } else if matches!(e.kind(), ErrorKind::BusyLoadingError | ErrorKind::TryAgain) {
        DestinationErrorKind::Throttled
    } else {
        DestinationErrorKind::Rejected
    };
    DestinationError::new(kind, e.to_string())
}

impl TopicClient for RedisStreamClient {
    fn send(&self, destination: String, key: String, payload: Bytes) -> ClientFuture<'_, ()> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let id: String = ::redis::cmd("XADD")
                .arg(&destination)
                .arg("*")
                .arg("key")
                .arg(&key)
                .arg("payload")
                .arg(payload.as_ref())
                .query_async(&mut conn)
                .await
                .map_err(classify)?;
            debug!(destination = %destination, key = %key, id = %id, "Appended record");
            Ok(())
        })
    }

    fn destination_exists(&self, destination: String) -> ClientFuture<'_, bool> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let exists: bool = ::redis::cmd("EXISTS")
                .arg(&destination)
                .query_async(&mut conn)
                .await
                .map_err(classify)?;
            Ok(exists)
        })
    }

    fn create_destination(
        &self,
        destination: String,
        partitions: u32,
        replication_factor: u16,
    ) -> ClientFuture<'_, ()> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let result: std::result::Result<String, RedisError> = ::redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(&destination)
                .arg(CONSUMER_GROUP)
                .arg("$")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;
            match result {
                Ok(_) => {
                    info!(
                        destination = %destination,
                        partitions,
                        replication_factor,
                        "Created stream destination"
                    );
                    Ok(())
                }
                // Group already there means the stream is too
                Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
                Err(e) => Err(classify(e)),
            }
        })
    }
}
