//! Shared test utilities for pipeline, chaos and integration tests.
//!
//! This module provides:
//! - Redis testcontainer setup
//! - Recording destination clients for each strategy
//! - A fixed local catalog for the existence filters
//! - Change event helpers

#![allow(dead_code)]

pub mod containers;
pub mod mock_clients;

pub use containers::*;
pub use mock_clients::*;

use replication_sink::{Cell, ChangeEvent, Edit, RowKey};

/// Install a test subscriber once. Honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// One Put cell on `table`.
pub fn put_event(table: &str, row: &str, family: &str, qualifier: &str, value: &str) -> ChangeEvent {
    let mut key = RowKey::new(table, b"region-0001".to_vec());
    key.sequence_id = 1;
    key.write_time = 1_700_000_000_000;
    ChangeEvent::new(
        key,
        Edit::from_cells(vec![Cell::put(row, family, qualifier, value, 1_700_000_000_000)]),
    )
}

/// `n` single-cell events on `table` with rows `row-0 .. row-{n-1}`.
pub fn events(table: &str, n: usize) -> Vec<ChangeEvent> {
    (0..n)
        .map(|i| put_event(table, &format!("row-{}", i), "cf", "q", &format!("v{}", i)))
        .collect()
}
