// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entry filter chain.
//!
//! Runs before any entry is encoded:
//!
//! 1. [`TableExistenceFilter`] drops entries whose table is gone locally.
//! 2. [`ColumnFamilyFilter`] drops cells whose family is gone locally, and the
//!    entry too if no cells remain.
//! 3. The active sink drops entries whose table has no destination
//!    (see [`Sink::filter`](crate::sink::Sink::filter)).
//!
//! Lookups go through an [`ExistenceOracle`]. Results are cached per
//! `apply` call only. A failed lookup keeps the entry: an entry is never
//! dropped on the strength of a lookup that did not answer.
//!
//! Every filter is monotone, so filtering an already-filtered batch is a
//! no-op.

use crate::config::FilterConfig;
use crate::model::ChangeEvent;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Boxed future returned by oracle lookups.
pub type OracleFuture<'a, T> =
    Pin<Box<dyn Future<Output = std::result::Result<T, OracleError>> + Send + 'a>>;

/// An existence lookup that could not be answered.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct OracleError(pub String);

/// Local catalog lookups used by the existence filters.
///
/// The host provides an implementation backed by its own metadata.
pub trait ExistenceOracle: Send + Sync + 'static {
    /// Whether the table exists locally.
    fn table_exists(&self, table: &str) -> OracleFuture<'_, bool>;

    /// The column families the table currently has.
    fn column_families(&self, table: &str) -> OracleFuture<'_, HashSet<Vec<u8>>>;
}

/// Oracle for hosts with no catalog.
///
/// Every table exists. Family lookups fail, so the column-family filter
/// keeps everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpOracle;

impl ExistenceOracle for NoOpOracle {
    fn table_exists(&self, _table: &str) -> OracleFuture<'_, bool> {
        Box::pin(async { Ok(true) })
    }

    fn column_families(&self, _table: &str) -> OracleFuture<'_, HashSet<Vec<u8>>> {
        Box::pin(async { Err(OracleError("no catalog available".into())) })
    }
}

/// A host-supplied filter run after the sink's mapping filter.
///
/// Return `None` to drop the entry.
pub trait EntryFilter: Send + Sync {
    fn filter(&self, entry: ChangeEvent) -> Option<ChangeEvent>;
}

impl<F> EntryFilter for F
where
    F: Fn(ChangeEvent) -> Option<ChangeEvent> + Send + Sync,
{
    fn filter(&self, entry: ChangeEvent) -> Option<ChangeEvent> {
        self(entry)
    }
}

// =============================================================================
// Table existence
// =============================================================================

/// Drops entries whose table no longer exists locally.
pub struct TableExistenceFilter {
    oracle: Arc<dyn ExistenceOracle>,
}

impl TableExistenceFilter {
    pub fn new(oracle: Arc<dyn ExistenceOracle>) -> Self {
        Self { oracle }
    }

    pub async fn apply(&self, entries: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
        let mut exists: HashMap<String, bool> = HashMap::new();
        let before = entries.len();
        let mut kept = Vec::with_capacity(before);

        for entry in entries {
            let table = entry.table_name();
            let present = match exists.get(table) {
                Some(present) => *present,
                None => {
                    let present = match self.oracle.table_exists(table).await {
                        Ok(present) => present,
                        Err(e) => {
                            warn!(table = %table, error = %e, "Table lookup failed, keeping entries");
                            true
                        }
                    };
                    exists.insert(table.to_string(), present);
                    present
                }
            };
            if present {
                kept.push(entry);
            }
        }

        let dropped = before - kept.len();
        if dropped > 0 {
            let missing: Vec<&str> = exists
                .iter()
                .filter(|(_, present)| !**present)
                .map(|(t, _)| t.as_str())
                .collect();
            warn!(dropped, tables = ?missing, "Dropped entries for tables missing locally");
        }
        kept
    }
}

// =============================================================================
// Column family existence
// =============================================================================

/// Drops cells whose column family no longer exists locally.
pub struct ColumnFamilyFilter {
    oracle: Arc<dyn ExistenceOracle>,
    bulk_load_replication: bool,
}

impl ColumnFamilyFilter {
    pub fn new(oracle: Arc<dyn ExistenceOracle>, bulk_load_replication: bool) -> Self {
        Self {
            oracle,
            bulk_load_replication,
        }
    }

    pub async fn apply(&self, entries: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
        // None records a failed lookup; those tables pass untouched.
        let mut families: HashMap<String, Option<HashSet<Vec<u8>>>> = HashMap::new();
        let before = entries.len();
        let mut kept = Vec::with_capacity(before);

        for entry in entries {
            let table = entry.table_name().to_string();
            if !families.contains_key(&table) {
                let lookup = match self.oracle.column_families(&table).await {
                    Ok(set) => Some(set),
                    Err(e) => {
                        warn!(table = %table, error = %e, "Column family lookup failed, keeping entries");
                        None
                    }
                };
                families.insert(table.clone(), lookup);
            }
            let Some(Some(existing)) = families.get(&table) else {
                kept.push(entry);
                continue;
            };

            let bulk_load = self.bulk_load_replication;
            let rebuilt = entry.edit.retain_cells(|cell| {
                (bulk_load && cell.is_bulk_load_marker()) || existing.contains(&cell.family)
            });

            match rebuilt {
                None if entry.edit.is_empty() => {
                    debug!(table = %table, "Entry has no cells, dropping");
                }
                None => kept.push(entry),
                Some(edit) if edit.is_empty() => {
                    debug!(table = %table, "All cells filtered, dropping entry");
                }
                Some(edit) => {
                    debug!(
                        table = %table,
                        kept = edit.len(),
                        original = entry.edit.len(),
                        "Filtered cells of missing column families"
                    );
                    kept.push(ChangeEvent::new(entry.key, edit));
                }
            }
        }

        let dropped = before - kept.len();
        if dropped > 0 {
            warn!(dropped, "Dropped entries with no remaining column families");
        }
        kept
    }
}

// =============================================================================
// Chain
// =============================================================================

/// The local existence filters, in order, as enabled by configuration.
pub struct FilterChain {
    table: Option<TableExistenceFilter>,
    column_family: Option<ColumnFamilyFilter>,
}

impl FilterChain {
    pub fn new(config: &FilterConfig, oracle: Arc<dyn ExistenceOracle>) -> Self {
        let table = config
            .drop_on_deleted_tables
            .then(|| TableExistenceFilter::new(Arc::clone(&oracle)));
        let column_family = config
            .drop_on_deleted_column_families
            .then(|| ColumnFamilyFilter::new(oracle, config.bulk_load_replication));
        Self {
            table,
            column_family,
        }
    }

    /// A chain with both filters disabled.
    pub fn disabled() -> Self {
        Self {
            table: None,
            column_family: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.table.is_some() || self.column_family.is_some()
    }

    pub async fn apply(&self, mut entries: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
        let before = entries.len();
        if let Some(filter) = &self.table {
            entries = filter.apply(entries).await;
        }
        if let Some(filter) = &self.column_family {
            entries = filter.apply(entries).await;
        }
        let dropped = before - entries.len();
        if dropped > 0 {
            debug!(dropped, "Existence filters dropped entries");
        }
        entries
    }
}
