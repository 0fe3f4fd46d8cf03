//! # Queue Set
//!
//! N priority levels, each an (input, output) pair of FIFO queues with its
//! own lock. Index 0 is the highest priority.
//!
//! ## Signalling
//!
//! - Input: a counting gate. Every enqueue adds one to the pending count and
//!   wakes exactly one idle worker. A worker that takes a count is guaranteed
//!   a job when it scans.
//! - Output: a generation counter with broadcast wakeup, for consumers
//!   waiting on results for a session.

use parking_lot::{Condvar, Mutex};
use rtserver_core::{Job, JobResult, Pooled, SessionId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Priority-ordered job and result queues.
pub struct QueueSet {
    inputs: Vec<Mutex<VecDeque<Pooled<Job>>>>,
    outputs: Vec<Mutex<VecDeque<Pooled<JobResult>>>>,
    /// Jobs enqueued but not yet claimed by a worker.
    pending: Mutex<usize>,
    input_ready: Condvar,
    /// Bumped on every output enqueue and on shutdown.
    output_generation: Mutex<u64>,
    output_ready: Condvar,
}

impl std::fmt::Debug for QueueSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueSet")
            .field("queues", &self.len())
            .field("pending", &*self.pending.lock())
            .finish_non_exhaustive()
    }
}

impl QueueSet {
    /// Creates `count` priority levels.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            inputs: (0..count).map(|_| Mutex::new(VecDeque::new())).collect(),
            outputs: (0..count).map(|_| Mutex::new(VecDeque::new())).collect(),
            pending: Mutex::new(0),
            input_ready: Condvar::new(),
            output_generation: Mutex::new(0),
            output_ready: Condvar::new(),
        }
    }

    /// Number of priority levels.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// Returns true if there are no priority levels.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Appends a job and wakes one idle worker.
    ///
    /// # Errors
    ///
    /// Hands the job back if `index` is out of range.
    pub fn enqueue_input(&self, job: Pooled<Job>, index: usize) -> Result<(), Pooled<Job>> {
        let Some(queue) = self.inputs.get(index) else {
            return Err(job);
        };
        queue.lock().push_back(job);

        let mut pending = self.pending.lock();
        *pending += 1;
        self.input_ready.notify_one();
        Ok(())
    }

    /// Appends a result and wakes every consumer waiting on results.
    ///
    /// # Errors
    ///
    /// Hands the result back if `index` is out of range.
    pub fn enqueue_output(
        &self,
        result: Pooled<JobResult>,
        index: usize,
    ) -> Result<(), Pooled<JobResult>> {
        let Some(queue) = self.outputs.get(index) else {
            return Err(result);
        };
        queue.lock().push_back(result);
        self.bump_output_generation();
        Ok(())
    }

    fn bump_output_generation(&self) {
        let mut generation = self.output_generation.lock();
        *generation += 1;
        self.output_ready.notify_all();
    }

    /// Blocks until a job can be claimed or `stop` is raised.
    ///
    /// Returns `true` with one pending job claimed, `false` when stopped.
    /// `stop` is checked before every claim, so a backlog never delays it.
    pub fn wait_for_input(&self, stop: &AtomicBool) -> bool {
        let mut pending = self.pending.lock();
        loop {
            if stop.load(Ordering::Acquire) {
                return false;
            }
            if *pending > 0 {
                *pending -= 1;
                return true;
            }
            self.input_ready.wait(&mut pending);
        }
    }

    /// Wakes every idle worker so it can observe its stop flag.
    pub fn wake_all_workers(&self) {
        let _pending = self.pending.lock();
        self.input_ready.notify_all();
    }

    /// Pops the front job of the highest-priority non-empty input queue.
    #[must_use]
    pub fn pop_next_input(&self) -> Option<(usize, Pooled<Job>)> {
        self.inputs
            .iter()
            .enumerate()
            .find_map(|(index, queue)| queue.lock().pop_front().map(|job| (index, job)))
    }

    /// Removes the first result in output queue `index` that satisfies
    /// `predicate`, leaving the others in order.
    pub fn dequeue_matching<F>(&self, index: usize, mut predicate: F) -> Option<Pooled<JobResult>>
    where
        F: FnMut(&JobResult) -> bool,
    {
        let mut queue = self.outputs.get(index)?.lock();
        let pos = queue.iter().position(|result| predicate(&**result))?;
        queue.remove(pos)
    }

    /// Removes the first result for `session`, scanning queues in priority order.
    pub fn take_result_for(&self, session: SessionId) -> Option<Pooled<JobResult>> {
        (0..self.len()).find_map(|index| {
            self.dequeue_matching(index, |result| result.session_id() == Some(session))
        })
    }

    /// Current output generation.
    #[must_use]
    pub fn output_generation(&self) -> u64 {
        *self.output_generation.lock()
    }

    /// Blocks until the output generation moves past `seen` or the deadline
    /// passes. Returns the new generation, or `None` on timeout.
    pub fn wait_for_output(&self, seen: u64, deadline: Option<Instant>) -> Option<u64> {
        let mut generation = self.output_generation.lock();
        while *generation == seen {
            match deadline {
                Some(deadline) => {
                    if self
                        .output_ready
                        .wait_until(&mut generation, deadline)
                        .timed_out()
                        && *generation == seen
                    {
                        return None;
                    }
                }
                None => self.output_ready.wait(&mut generation),
            }
        }
        Some(*generation)
    }

    /// Wakes every consumer waiting on results without publishing one.
    pub fn wake_output_waiters(&self) {
        self.bump_output_generation();
    }

    /// Number of jobs waiting in input queue `index`.
    #[must_use]
    pub fn input_len(&self, index: usize) -> usize {
        self.inputs.get(index).map_or(0, |q| q.lock().len())
    }

    /// Number of results waiting in output queue `index`.
    #[must_use]
    pub fn output_len(&self, index: usize) -> usize {
        self.outputs.get(index).map_or(0, |q| q.lock().len())
    }

    /// Empties every input queue and resets the pending count.
    #[must_use]
    pub fn drain_inputs(&self) -> Vec<Pooled<Job>> {
        let mut pending = self.pending.lock();
        let drained: Vec<_> = self
            .inputs
            .iter()
            .flat_map(|q| q.lock().drain(..).collect::<Vec<_>>())
            .collect();
        *pending = 0;
        drained
    }

    /// Empties every output queue.
    #[must_use]
    pub fn drain_outputs(&self) -> Vec<Pooled<JobResult>> {
        self.outputs
            .iter()
            .flat_map(|q| q.lock().drain(..).collect::<Vec<_>>())
            .collect()
    }
}
