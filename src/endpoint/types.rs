// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Endpoint state types.
//!
//! # Lifecycle
//!
//! ```text
//!            start()              stop()
//! Created ───────────→ Running ───────────→ Stopped
//!    │                                         ↑
//!    └─────────────────────────────────────────┘
//!                       stop()
//! ```
//!
//! # Per-call transaction
//!
//! ```text
//! NotStarted ──begin──→ Active ──all shipped──→ Committed
//!                          │
//!                          └──first failure───→ Aborted
//! ```
//!
//! Every `replicate` call starts over at `NotStarted`. `Committed` and
//! `Aborted` are final for that call.

use crate::model::ChangeEvent;

/// Lifecycle of a [`ReplicationEndpoint`](super::ReplicationEndpoint).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Built but not accepting batches.
    Created,

    /// Accepting batches.
    Running,

    /// Sink flushed and shut down. Cannot be restarted.
    Stopped,
}

impl std::fmt::Display for EndpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointState::Created => write!(f, "Created"),
            EndpointState::Running => write!(f, "Running"),
            EndpointState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// State of the pseudo-transaction around one replicated batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    NotStarted,
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    /// Whether the call has finished one way or the other.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::Aborted)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::NotStarted => write!(f, "NotStarted"),
            TransactionState::Active => write!(f, "Active"),
            TransactionState::Committed => write!(f, "Committed"),
            TransactionState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// A batch of WAL entries handed to the endpoint.
#[derive(Debug, Clone, Default)]
pub struct ReplicationBatch {
    /// Identifies the WAL group the entries were read from.
    pub wal_group_id: String,

    pub entries: Vec<ChangeEvent>,
}

impl ReplicationBatch {
    pub fn new(wal_group_id: impl Into<String>, entries: Vec<ChangeEvent>) -> Self {
        Self {
            wal_group_id: wal_group_id.into(),
            entries,
        }
    }
}

/// Outcome of a successful `replicate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicateSummary {
    /// Entries in the batch.
    pub received: usize,

    /// Entries dropped by any filter.
    pub filtered: usize,

    /// Entries accepted by the sink.
    pub shipped: usize,

    pub state: TransactionState,
}
