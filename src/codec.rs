// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wire codec for change events.
//!
//! Each event becomes one JSON document. Byte fields travel as standard
//! base64 strings so zero-length and non-UTF-8 values survive unchanged:
//!
//! ```text
//! {
//!   "key":  { "tablename", "sequenceId", "writeTime", "nonce", "nonceGroup",
//!             "origLogSeqNum", "encodedRegionName", "writeEntry": {"writeNumber"} | null },
//!   "edit": { "cells": [ {"row","family","qualifier","value","type","timeStamp"} ],
//!             "families": [..], "metafamily": .. | null, "replay": bool }
//! }
//! ```
//!
//! # Compression
//!
//! When enabled, the whole document is zstd-compressed. [`decode`] detects the
//! zstd frame magic and decompresses first, so compressed and plain payloads
//! can share a destination.
//!
//! Each entity has its own decode function so malformed input is reported
//! against the entity that carried it.

use crate::error::{ExportError, Result};
use crate::model::{Cell, CellType, ChangeEvent, Edit, RowKey};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Read;

/// zstd magic bytes for decompression detection
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// zstd compression level for payloads.
const ZSTD_LEVEL: i32 = 3;

// =============================================================================
// Wire structs
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct WireEntry {
    key: WireKey,
    edit: WireEdit,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireKey {
    #[serde(rename = "tablename")]
    table_name: String,
    sequence_id: i64,
    write_time: i64,
    nonce: i64,
    nonce_group: i64,
    orig_log_seq_num: i64,
    encoded_region_name: String,
    #[serde(default)]
    write_entry: Option<WireWriteEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireWriteEntry {
    write_number: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireEdit {
    cells: Vec<WireCell>,
    #[serde(default)]
    families: Vec<String>,
    #[serde(default)]
    metafamily: Option<String>,
    #[serde(default)]
    replay: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireCell {
    row: String,
    family: String,
    qualifier: String,
    value: String,
    #[serde(rename = "type")]
    cell_type: String,
    #[serde(rename = "timeStamp")]
    timestamp: i64,
}

// =============================================================================
// Encode
// =============================================================================

/// Encode one event, optionally zstd-compressing the whole document.
pub fn encode(event: &ChangeEvent, compress: bool) -> Result<Bytes> {
    let wire = to_wire(event);
    let json = serde_json::to_vec(&wire)
        .map_err(|e| ExportError::Encoding(format!("json: {}", e)))?;

    if !compress {
        return Ok(Bytes::from(json));
    }

    let compressed = zstd::encode_all(&json[..], ZSTD_LEVEL)
        .map_err(|e| ExportError::Encoding(format!("zstd: {}", e)))?;
    Ok(Bytes::from(compressed))
}

fn to_wire(event: &ChangeEvent) -> WireEntry {
    let key = &event.key;
    let edit = &event.edit;
    WireEntry {
        key: WireKey {
            table_name: key.table_name.clone(),
            sequence_id: key.sequence_id,
            write_time: key.write_time,
            nonce: key.nonce,
            nonce_group: key.nonce_group,
            orig_log_seq_num: key.orig_log_seq_num,
            encoded_region_name: STANDARD.encode(&key.encoded_region_name),
            write_entry: key
                .mvcc_write_number
                .map(|write_number| WireWriteEntry { write_number }),
        },
        edit: WireEdit {
            cells: edit.cells.iter().map(cell_to_wire).collect(),
            families: edit.families.iter().map(|f| STANDARD.encode(f)).collect(),
            metafamily: edit.meta_family.as_ref().map(|m| STANDARD.encode(m)),
            replay: edit.replay,
        },
    }
}

fn cell_to_wire(cell: &Cell) -> WireCell {
    WireCell {
        row: STANDARD.encode(&cell.row),
        family: STANDARD.encode(&cell.family),
        qualifier: STANDARD.encode(&cell.qualifier),
        value: STANDARD.encode(&cell.value),
        cell_type: cell.cell_type.as_str().to_string(),
        timestamp: cell.timestamp,
    }
}

// =============================================================================
// Decode
// =============================================================================

/// Decode one payload, compressed or not.
pub fn decode(payload: &[u8]) -> Result<ChangeEvent> {
    let data = maybe_decompress(payload)?;
    let wire: WireEntry = serde_json::from_slice(&data)
        .map_err(|e| ExportError::Decoding(format!("json: {}", e)))?;
    decode_entry(wire)
}

fn decode_entry(wire: WireEntry) -> Result<ChangeEvent> {
    Ok(ChangeEvent {
        key: decode_key(wire.key)?,
        edit: decode_edit(wire.edit)?,
    })
}

fn decode_key(wire: WireKey) -> Result<RowKey> {
    Ok(RowKey {
        table_name: wire.table_name,
        encoded_region_name: decode_bytes("encodedRegionName", &wire.encoded_region_name)?,
        sequence_id: wire.sequence_id,
        write_time: wire.write_time,
        nonce: wire.nonce,
        nonce_group: wire.nonce_group,
        orig_log_seq_num: wire.orig_log_seq_num,
        mvcc_write_number: wire.write_entry.map(|w| w.write_number),
    })
}

fn decode_edit(wire: WireEdit) -> Result<Edit> {
    let cells = wire
        .cells
        .into_iter()
        .map(decode_cell)
        .collect::<Result<Vec<_>>>()?;
    let families = wire
        .families
        .iter()
        .map(|f| decode_bytes("families", f))
        .collect::<Result<BTreeSet<_>>>()?;
    let meta_family = wire
        .metafamily
        .as_deref()
        .map(|m| decode_bytes("metafamily", m))
        .transpose()?;

    Ok(Edit {
        cells,
        families,
        meta_family,
        replay: wire.replay,
    })
}

fn decode_cell(wire: WireCell) -> Result<Cell> {
    let cell_type: CellType = wire.cell_type.parse().map_err(ExportError::Decoding)?;
    Ok(Cell {
        row: decode_bytes("row", &wire.row)?,
        family: decode_bytes("family", &wire.family)?,
        qualifier: decode_bytes("qualifier", &wire.qualifier)?,
        value: decode_bytes("value", &wire.value)?,
        timestamp: wire.timestamp,
        cell_type,
    })
}

fn decode_bytes(field: &str, encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| ExportError::Decoding(format!("{}: invalid base64: {}", field, e)))
}

/// Decompress zstd data if it has the magic header, otherwise return as-is.
pub fn maybe_decompress(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() >= 4 && data[..4] == ZSTD_MAGIC {
        let mut decoder = zstd::Decoder::new(data)
            .map_err(|e| ExportError::Decoding(format!("zstd init: {}", e)))?;
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| ExportError::Decoding(format!("zstd decode: {}", e)))?;
        Ok(decompressed)
    } else {
        Ok(data.to_vec())
    }
}
