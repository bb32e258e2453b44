//! Transaction queue arbitrating device access.
//!
//! Every device transaction goes through one [`TransactionQueue`] consumed by
//! exactly one worker, so at most one connection to the device is open at any
//! time. Producers (command ingestion and the poll schedules) only call
//! [`TransactionQueue::enqueue`], which never blocks and never touches the
//! device.
//!
//! Ordering is FIFO across reads and writes with two adjustments:
//!
//! - A write for a point replaces every queued, not yet started write for the
//!   same point ([`TransactionQueue::replace_write`]). Only the latest intent
//!   is kept.
//! - Queued reads per point are capped; when the cap is hit the oldest queued
//!   read for that point is dropped. Together with the write rule this bounds
//!   the queue depth while the device is unreachable.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::Notify;

use crate::point::ControlPoint;
use crate::task::Task;

/// Lowest accepted read cap; two reads of one point must be able to queue.
pub const MIN_PENDING_READS_PER_POINT: usize = 2;

/// Error returned by enqueue operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("transaction queue is closed")]
    Closed,
}

/// What an enqueue did to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Appended without touching other entries.
    Appended,
    /// Appended after evicting this many pending writes for the same point.
    Replaced(usize),
    /// Appended after dropping the oldest queued read for the same point.
    DroppedOldestRead,
}

/// Queue counters since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Tasks accepted by enqueue.
    pub enqueued: u64,
    /// Tasks that ran to completion.
    pub executed: u64,
    /// Tasks abandoned after a failed transaction.
    pub failed: u64,
    /// Pending writes superseded by a newer write.
    pub replaced_writes: u64,
    /// Queued reads dropped by the per-point cap.
    pub dropped_reads: u64,
    /// Tasks discarded by close, or cancelled while in flight.
    pub abandoned: u64,
}

#[derive(Debug, Default)]
struct State {
    tasks: VecDeque<Task>,
    in_flight: bool,
    closed: bool,
    stats: QueueStats,
}

impl State {
    fn is_idle(&self) -> bool {
        self.tasks.is_empty() && !self.in_flight
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    /// Wakes the worker when work arrives or the queue closes.
    ready: Notify,
    /// Wakes drainers when the queue becomes idle.
    idle: Notify,
    max_pending_reads: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// FIFO of device transactions, shared between producers and the worker.
#[derive(Debug, Clone)]
pub struct TransactionQueue {
    shared: Arc<Shared>,
}

impl TransactionQueue {
    /// Create a queue keeping at most `max_pending_reads_per_point` queued
    /// reads per point. Values below [`MIN_PENDING_READS_PER_POINT`] are raised.
    pub fn new(max_pending_reads_per_point: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                ready: Notify::new(),
                idle: Notify::new(),
                max_pending_reads: max_pending_reads_per_point.max(MIN_PENDING_READS_PER_POINT),
            }),
        }
    }

    /// Add a task, applying the write replacement rule and the read cap.
    pub fn enqueue(&self, task: Task) -> Result<Enqueued, QueueError> {
        match task {
            Task::Write { point, value } => self.replace_write(point, value),
            Task::Read(_) => self.push_read(task),
        }
    }

    /// Drop every pending write for `point` and append `Write(point, value)`.
    ///
    /// The eviction and the append happen under one lock, so the worker never
    /// observes the queue between the two. A write that is already in flight
    /// is not affected.
    pub fn replace_write(&self, point: ControlPoint, value: u16) -> Result<Enqueued, QueueError> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }

        let before = state.tasks.len();
        state.tasks.retain(|t| !t.is_write_for(point));
        let evicted = before - state.tasks.len();

        state.tasks.push_back(Task::write(point, value));
        state.stats.enqueued += 1;
        state.stats.replaced_writes += evicted as u64;
        drop(state);

        self.shared.ready.notify_one();

        Ok(if evicted > 0 {
            Enqueued::Replaced(evicted)
        } else {
            Enqueued::Appended
        })
    }

    fn push_read(&self, task: Task) -> Result<Enqueued, QueueError> {
        let point = task.point();
        let mut state = self.shared.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }

        let queued = state.tasks.iter().filter(|t| t.is_read_for(point)).count();
        let mut outcome = Enqueued::Appended;
        if queued >= self.shared.max_pending_reads {
            if let Some(oldest) = state.tasks.iter().position(|t| t.is_read_for(point)) {
                state.tasks.remove(oldest);
                state.stats.dropped_reads += 1;
                outcome = Enqueued::DroppedOldestRead;
            }
        }

        state.tasks.push_back(task);
        state.stats.enqueued += 1;
        drop(state);

        self.shared.ready.notify_one();

        Ok(outcome)
    }

    /// Take the next task for execution.
    ///
    /// Waits while the queue is empty and returns `None` once it is closed.
    /// Only one caller (the worker) may consume the queue; the returned guard
    /// marks the task as in flight until it is dropped.
    pub async fn next(&self) -> Option<InFlight> {
        loop {
            {
                let mut state = self.shared.lock();
                if let Some(task) = state.tasks.pop_front() {
                    state.in_flight = true;
                    return Some(InFlight {
                        task,
                        shared: self.shared.clone(),
                        settled: false,
                    });
                }
                if state.closed {
                    return None;
                }
            }
            self.shared.ready.notified().await;
        }
    }

    /// Wait until the queue is empty and nothing is in flight.
    pub async fn drain(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.lock().is_idle() {
                return;
            }

            notified.await;
        }
    }

    /// Stop accepting tasks and discard everything not yet started.
    ///
    /// The in-flight task, if any, still finishes; the worker then sees the
    /// queue as closed. Returns the number of discarded tasks.
    pub fn close(&self) -> usize {
        let mut state = self.shared.lock();
        state.closed = true;
        let discarded = state.tasks.len();
        state.tasks.clear();
        state.stats.abandoned += discarded as u64;
        let idle = state.is_idle();
        drop(state);

        self.shared.ready.notify_one();
        if idle {
            self.shared.idle.notify_waiters();
        }

        discarded
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Number of queued tasks, excluding the one in flight.
    pub fn len(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the queued tasks in execution order.
    pub fn snapshot(&self) -> Vec<Task> {
        self.shared.lock().tasks.iter().cloned().collect()
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.lock().stats
    }
}

/// A task taken off the queue by the worker.
///
/// While this guard lives the queue counts the task as in flight. Report the
/// result with [`succeeded`](Self::succeeded) or [`failed`](Self::failed);
/// a guard dropped without either (e.g. a cancelled worker) counts as
/// abandoned.
#[derive(Debug)]
pub struct InFlight {
    task: Task,
    shared: Arc<Shared>,
    settled: bool,
}

impl InFlight {
    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn succeeded(mut self) {
        self.settled = true;
        self.shared.lock().stats.executed += 1;
    }

    pub fn failed(mut self) {
        self.settled = true;
        self.shared.lock().stats.failed += 1;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        if !self.settled {
            state.stats.abandoned += 1;
        }
        state.in_flight = false;
        let idle = state.is_idle();
        drop(state);

        if idle {
            self.shared.idle.notify_waiters();
        }
    }
}
