// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Table to destination mapping.
//!
//! Built once from `"table:destination"` strings and never mutated, so it can
//! be shared between endpoints behind an `Arc` without locking.

use crate::error::{ExportError, Result};
use std::collections::HashMap;

/// Immutable `table -> destination` lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationMapping {
    routes: HashMap<String, String>,
}

impl DestinationMapping {
    /// Parse `"table:destination"` entries, splitting on the first `:`.
    ///
    /// Destinations may themselves contain `:`. A later entry for the same
    /// table replaces an earlier one.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let mut routes = HashMap::with_capacity(entries.len());
        for entry in entries {
            let entry = entry.as_ref();
            let (table, destination) = entry.split_once(':').ok_or_else(|| {
                ExportError::Config(format!("table map entry missing ':' delimiter: {}", entry))
            })?;
            let table = table.trim();
            let destination = destination.trim();
            if table.is_empty() || destination.is_empty() {
                return Err(ExportError::Config(format!(
                    "table map entry has an empty side: {}",
                    entry
                )));
            }
            routes.insert(table.to_string(), destination.to_string());
        }
        Ok(Self { routes })
    }

    /// Build directly from pairs.
    pub fn from_pairs<I, T, D>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (T, D)>,
        T: Into<String>,
        D: Into<String>,
    {
        Self {
            routes: pairs
                .into_iter()
                .map(|(t, d)| (t.into(), d.into()))
                .collect(),
        }
    }

    pub fn destination_for(&self, table: &str) -> Option<&str> {
        self.routes.get(table).map(String::as_str)
    }

    pub fn is_mapped(&self, table: &str) -> bool {
        self.routes.contains_key(table)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve a table or fail with [`ExportError::NotMapped`].
    pub fn require(&self, table: &str) -> Result<&str> {
        self.destination_for(table).ok_or_else(|| ExportError::NotMapped {
            table: table.to_string(),
        })
    }
}
