// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change event model.
//!
//! A [`ChangeEvent`] is one write-ahead-log entry: the [`RowKey`] that says
//! where and when it was written, and the [`Edit`] holding its cells.
//! Events are built once per replicated entry and never mutated; filters that
//! need to drop cells build a new [`Edit`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Reserved family carried by bulk-load marker cells.
pub const META_FAMILY: &[u8] = b"METAFAMILY";

/// Qualifier marking a cell that came from a bulk import.
pub const BULK_LOAD_MARKER: &[u8] = b"HBASE::BULK_LOAD";

/// Mutation kind of a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellType {
    Put,
    Delete,
    DeleteFamily,
    DeleteColumn,
    DeleteFamilyVersion,
}

impl CellType {
    /// All cell types, in wire-code order.
    pub const ALL: [CellType; 5] = [
        CellType::Put,
        CellType::Delete,
        CellType::DeleteFamily,
        CellType::DeleteColumn,
        CellType::DeleteFamilyVersion,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CellType::Put => "put",
            CellType::Delete => "delete",
            CellType::DeleteFamily => "delete_family",
            CellType::DeleteColumn => "delete_column",
            CellType::DeleteFamilyVersion => "delete_family_version",
        }
    }

    pub fn is_delete(&self) -> bool {
        !matches!(self, CellType::Put)
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CellType {
    type Err = String;

    /// Accepts the wire name in any case, with or without underscores, so
    /// both `delete_family` and `DeleteFamily` parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "put" => Ok(CellType::Put),
            "delete" => Ok(CellType::Delete),
            "deletefamily" => Ok(CellType::DeleteFamily),
            "deletecolumn" => Ok(CellType::DeleteColumn),
            "deletefamilyversion" => Ok(CellType::DeleteFamilyVersion),
            _ => Err(format!("unknown cell type: {}", s)),
        }
    }
}

/// One cell of a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub row: Vec<u8>,
    pub family: Vec<u8>,
    pub qualifier: Vec<u8>,
    pub value: Vec<u8>,
    pub timestamp: i64,
    pub cell_type: CellType,
}

impl Cell {
    /// Convenience constructor for a put cell.
    pub fn put(
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        timestamp: i64,
    ) -> Self {
        Self {
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            value: value.into(),
            timestamp,
            cell_type: CellType::Put,
        }
    }

    /// True for a bulk-load marker cell.
    pub fn is_bulk_load_marker(&self) -> bool {
        self.qualifier == BULK_LOAD_MARKER
    }
}

/// Provenance and ordering of an entry within its source shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowKey {
    pub table_name: String,
    pub encoded_region_name: Vec<u8>,
    pub sequence_id: i64,
    /// Milliseconds since the Unix epoch.
    pub write_time: i64,
    pub nonce: i64,
    pub nonce_group: i64,
    pub orig_log_seq_num: i64,
    /// MVCC write number, when the entry carries one.
    pub mvcc_write_number: Option<i64>,
}

impl RowKey {
    pub fn new(table_name: impl Into<String>, encoded_region_name: impl Into<Vec<u8>>) -> Self {
        Self {
            table_name: table_name.into(),
            encoded_region_name: encoded_region_name.into(),
            sequence_id: 0,
            write_time: 0,
            nonce: 0,
            nonce_group: 0,
            orig_log_seq_num: 0,
            mvcc_write_number: None,
        }
    }
}

/// The cells of one log entry.
///
/// Every cell's family is a member of `families`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Edit {
    pub cells: Vec<Cell>,
    pub families: BTreeSet<Vec<u8>>,
    pub meta_family: Option<Vec<u8>>,
    pub replay: bool,
}

impl Edit {
    /// Build an edit whose family set is derived from its cells.
    pub fn from_cells(cells: Vec<Cell>) -> Self {
        let families = cells.iter().map(|c| c.family.clone()).collect();
        Self {
            cells,
            families,
            meta_family: None,
            replay: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Keep only the cells matching `keep`.
    ///
    /// Returns `None` when nothing was dropped so the caller can reuse the
    /// original edit. The family set is rebuilt from the surviving cells;
    /// `meta_family` and `replay` carry over.
    pub fn retain_cells<F>(&self, mut keep: F) -> Option<Edit>
    where
        F: FnMut(&Cell) -> bool,
    {
        let kept: Vec<Cell> = self.cells.iter().filter(|c| keep(c)).cloned().collect();
        if kept.len() == self.cells.len() {
            return None;
        }
        let families = kept.iter().map(|c| c.family.clone()).collect();
        Some(Edit {
            cells: kept,
            families,
            meta_family: self.meta_family.clone(),
            replay: self.replay,
        })
    }
}

/// One replicated log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub key: RowKey,
    pub edit: Edit,
}

impl ChangeEvent {
    pub fn new(key: RowKey, edit: Edit) -> Self {
        Self { key, edit }
    }

    pub fn table_name(&self) -> &str {
        &self.key.table_name
    }
}
