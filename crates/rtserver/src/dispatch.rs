//! # Result Correlation
//!
//! Synchronous callers register their `(job id, session id)` key before the
//! job is enqueued. The worker that finishes the job hands the result
//! straight to that caller through a one-slot channel; results nobody waits
//! for go to the output queue instead.
//!
//! ```text
//!   submit_and_wait ──register──> [WaiterTable] <──deliver── worker
//!         │                             │
//!         └──────recv (deadline)────────┘ one-slot channel
//! ```
//!
//! Timeout and delivery race on the table lock: whichever removes the entry
//! first decides whether the result goes to the caller or to the queue.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use rtserver_core::{JobId, JobResult, Pooled, SessionId};
use std::collections::HashMap;
use std::time::Duration;

type Key = (JobId, SessionId);

/// Why a synchronous wait ended without a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitError {
    /// The deadline passed and the entry was withdrawn.
    Timeout,
    /// The table was cleared by shutdown.
    Closed,
}

/// Registered synchronous waiters.
#[derive(Default)]
pub struct WaiterTable {
    waiters: Mutex<HashMap<Key, Sender<Pooled<JobResult>>>>,
}

impl std::fmt::Debug for WaiterTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaiterTable")
            .field("waiting", &self.len())
            .finish()
    }
}

/// A registered wait. Dropping it without waiting leaves the result to the
/// output queue once the entry is cancelled.
#[derive(Debug)]
pub struct Waiter {
    key: Key,
    receiver: Receiver<Pooled<JobResult>>,
}

impl WaiterTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter. Returns `None` if `key` already has one.
    #[must_use]
    pub fn register(&self, key: Key) -> Option<Waiter> {
        let mut waiters = self.waiters.lock();
        if waiters.contains_key(&key) {
            return None;
        }
        let (sender, receiver) = crossbeam_channel::bounded(1);
        waiters.insert(key, sender);
        Some(Waiter { key, receiver })
    }

    /// Hands `result` to its waiter. Gives the result back if nobody waits.
    ///
    /// # Errors
    ///
    /// Returns the result when there is no waiter for its key.
    pub fn deliver(&self, result: Pooled<JobResult>) -> Result<(), Pooled<JobResult>> {
        let Some(key) = result.key() else {
            return Err(result);
        };
        let Some(sender) = self.waiters.lock().remove(&key) else {
            return Err(result);
        };
        sender.send(result).map_err(|e| e.into_inner())
    }

    /// Withdraws a waiter. Returns `false` if a worker already claimed it.
    pub fn cancel(&self, key: Key) -> bool {
        self.waiters.lock().remove(&key).is_some()
    }

    /// Drops every waiter; their waits end with [`WaitError::Closed`].
    pub fn clear(&self) {
        let dropped: Vec<_> = self.waiters.lock().drain().collect();
        drop(dropped);
    }

    /// Number of registered waiters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Returns true if nobody is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks for the result of `waiter`, up to `timeout` when given.
    ///
    /// # Errors
    ///
    /// - [`WaitError::Timeout`] if the deadline passed before a worker
    ///   claimed the entry
    /// - [`WaitError::Closed`] if the table was cleared
    pub fn wait(
        &self,
        waiter: Waiter,
        timeout: Option<Duration>,
    ) -> Result<Pooled<JobResult>, WaitError> {
        let Some(timeout) = timeout else {
            return waiter.receiver.recv().map_err(|_| WaitError::Closed);
        };

        match waiter.receiver.recv_timeout(timeout) {
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Disconnected) => Err(WaitError::Closed),
            Err(RecvTimeoutError::Timeout) => {
                if self.cancel(waiter.key) {
                    Err(WaitError::Timeout)
                } else {
                    // A worker took the entry and is sending now.
                    waiter.receiver.recv().map_err(|_| WaitError::Closed)
                }
            }
        }
    }
}
