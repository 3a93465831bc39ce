// SPDX-License-Identifier: MIT OR Apache-2.0
//! A bounded FIFO queue of job ids, one instance per [`sf_core::JobKind`].
//!
//! Unlike a priority run queue, the Job Scheduler routes strictly by kind:
//! every job in a kind's queue is dequeued in submission order.

use std::collections::VecDeque;
use uuid::Uuid;

/// Errors returned by [`JobQueue::enqueue`].
#[derive(Debug, PartialEq, Eq)]
pub enum QueueError {
    /// The queue already holds `max` entries.
    Full { max: usize },
    /// `id` is already queued.
    Duplicate(Uuid),
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full { max } => write!(f, "queue full (max {max})"),
            Self::Duplicate(id) => write!(f, "job {id} already queued"),
        }
    }
}

impl std::error::Error for QueueError {}

/// Snapshot of queue occupancy, exposed for status/introspection endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub len: usize,
    pub max: usize,
}

/// A bounded, FIFO queue of pending job ids.
#[derive(Debug)]
pub struct JobQueue {
    entries: VecDeque<Uuid>,
    max_size: usize,
}

impl JobQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_size,
        }
    }

    /// Enqueue `id`. Fails if the queue is at capacity or `id` is already
    /// present.
    pub fn enqueue(&mut self, id: Uuid) -> Result<(), QueueError> {
        if self.entries.contains(&id) {
            return Err(QueueError::Duplicate(id));
        }
        if self.entries.len() >= self.max_size {
            return Err(QueueError::Full { max: self.max_size });
        }
        self.entries.push_back(id);
        Ok(())
    }

    /// Pop the oldest queued id, if any.
    pub fn dequeue(&mut self) -> Option<Uuid> {
        self.entries.pop_front()
    }

    /// Remove `id` from the queue without dequeuing it, used to honour a
    /// cancellation that arrives while the job is still waiting.
    pub fn remove(&mut self, id: Uuid) -> bool {
        if let Some(pos) = self.entries.iter().position(|e| *e == id) {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            len: self.entries.len(),
            max: self.max_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let mut q = JobQueue::new(4);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        q.enqueue(a).unwrap();
        q.enqueue(b).unwrap();
        assert_eq!(q.dequeue(), Some(a));
        assert_eq!(q.dequeue(), Some(b));
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn rejects_duplicate_id() {
        let mut q = JobQueue::new(4);
        let a = Uuid::new_v4();
        q.enqueue(a).unwrap();
        assert_eq!(q.enqueue(a), Err(QueueError::Duplicate(a)));
    }

    #[test]
    fn rejects_when_full() {
        let mut q = JobQueue::new(1);
        q.enqueue(Uuid::new_v4()).unwrap();
        let err = q.enqueue(Uuid::new_v4()).unwrap_err();
        assert_eq!(err, QueueError::Full { max: 1 });
    }

    #[test]
    fn remove_drops_a_waiting_entry() {
        let mut q = JobQueue::new(4);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        q.enqueue(a).unwrap();
        q.enqueue(b).unwrap();
        assert!(q.remove(a));
        assert_eq!(q.dequeue(), Some(b));
    }
}
