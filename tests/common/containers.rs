// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for Redis.
//!
//! Provides helpers to spin up Redis containers for integration tests.

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

/// Create a vanilla Redis container (streams-compatible).
///
/// Uses official redis:7 image. Waits for "Ready to accept connections".
pub fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

/// Get the Redis URL for a container.
pub fn redis_url(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(6379);
    format!("redis://127.0.0.1:{}", port)
}

/// A Redis destination kept alive for the duration of a test.
pub struct TestDestination<'a> {
    #[allow(dead_code)] // Kept alive for container lifetime
    container: Container<'a, GenericImage>,
    pub redis_url: String,
}

impl<'a> TestDestination<'a> {
    pub fn new(docker: &'a Cli) -> Self {
        let container = redis_container(docker);
        let redis_url = redis_url(&container);
        Self {
            container,
            redis_url,
        }
    }

    async fn conn(&self) -> redis::RedisResult<redis::aio::MultiplexedConnection> {
        let client = redis::Client::open(self.redis_url.as_str())?;
        client.get_multiplexed_async_connection().await
    }

    /// Number of records in a destination stream.
    pub async fn stream_len(&self, stream: &str) -> redis::RedisResult<usize> {
        let mut conn = self.conn().await?;
        redis::cmd("XLEN").arg(stream).query_async(&mut conn).await
    }

    /// `(key, payload)` of every record in a stream, oldest first.
    pub async fn read_stream(&self, stream: &str) -> redis::RedisResult<Vec<(String, Vec<u8>)>> {
        let mut conn = self.conn().await?;
        let reply: redis::streams::StreamRangeReply = redis::cmd("XRANGE")
            .arg(stream)
            .arg("-")
            .arg("+")
            .query_async(&mut conn)
            .await?;

        let mut records = Vec::with_capacity(reply.ids.len());
        for id in reply.ids {
            let key: String = id.get("key").unwrap_or_default();
            let payload: Vec<u8> = id.get("payload").unwrap_or_default();
            records.push((key, payload));
        }
        Ok(records)
    }

    /// Consumer groups on a stream.
    pub async fn group_names(&self, stream: &str) -> redis::RedisResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let reply: redis::streams::StreamInfoGroupsReply = redis::cmd("XINFO")
            .arg("GROUPS")
            .arg(stream)
            .query_async(&mut conn)
            .await?;
        Ok(reply.groups.into_iter().map(|g| g.name).collect())
    }
}
