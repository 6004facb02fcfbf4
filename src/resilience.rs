// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bulkhead: bounds concurrent in-flight submissions.
//!
//! The partitioned sink's asynchronous mode runs each record on its own
//! task. A [`Bulkhead`] caps how many run at once; a caller that finds it
//! full waits for a slot instead of queueing without limit.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), replication_sink::resilience::BulkheadFull> {
//! use replication_sink::resilience::Bulkhead;
//!
//! let bulkhead = Bulkhead::new(50);
//! let permit = bulkhead.acquire().await?;
//! tokio::spawn(async move {
//!     // submit...
//!     drop(permit); // slot released
//! });
//!
//! bulkhead.wait_idle().await?; // every slot free again
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Error when the bulkhead has been closed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("bulkhead closed: max {max_concurrent} concurrent operations")]
pub struct BulkheadFull {
    /// Maximum concurrent operations allowed.
    pub max_concurrent: usize,
}

/// Limits concurrent operations with a semaphore.
#[derive(Debug)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl Bulkhead {
    /// Create a new bulkhead with the given concurrency limit.
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Acquire a permit, waiting if necessary.
    ///
    /// Returns a permit that releases the slot when dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, BulkheadFull> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| self.closed())
    }

    /// Try to acquire a permit without waiting.
    ///
    /// Returns `None` if the bulkhead is full.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }

    /// Wait until every permit handed out so far has been released.
    ///
    /// New acquisitions made while waiting are also waited for.
    pub async fn wait_idle(&self) -> Result<(), BulkheadFull> {
        let all = u32::try_from(self.max_concurrent).unwrap_or(u32::MAX);
        let _permits = self
            .semaphore
            .acquire_many(all)
            .await
            .map_err(|_| self.closed())?;
        Ok(())
    }

    /// Get the number of available permits.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of operations currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent.saturating_sub(self.available())
    }

    /// Get the maximum concurrent operations allowed.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Check if the bulkhead is full (no permits available).
    pub fn is_full(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    /// Refuse all further acquisitions. Waiters wake with an error.
    pub fn close(&self) {
        self.semaphore.close();
    }

    fn closed(&self) -> BulkheadFull {
        BulkheadFull {
            max_concurrent: self.max_concurrent,
        }
    }
}
