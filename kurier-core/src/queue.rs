//! Batch queue
//!
//! Ordered in-memory buffer between admission and delivery. Reaching the
//! configured batch size asks the caller to flush immediately; otherwise a
//! single deadline armed by the *first* queued record bounds how long
//! records can wait. Later pushes never reset an armed deadline.

use crate::types::TelemetryRecord;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// FIFO buffer of admitted records plus the flush deadline state.
///
/// Invariant: a deadline is armed only while the queue is non-empty.
/// `take_all` clears both together.
pub struct BatchQueue {
    records: VecDeque<TelemetryRecord>,
    batch_size: usize,
    batch_timeout: Duration,
    deadline: Option<Instant>,
}

impl BatchQueue {
    pub fn new(batch_size: usize, batch_timeout: Duration) -> Self {
        Self {
            records: VecDeque::new(),
            batch_size,
            batch_timeout,
            deadline: None,
        }
    }

    /// Enqueue a record. Returns true when the size threshold is reached
    /// and the caller must flush now.
    pub fn push(&mut self, record: TelemetryRecord) -> bool {
        self.records.push_back(record);
        if self.records.len() >= self.batch_size {
            return true;
        }
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.batch_timeout);
        }
        false
    }

    /// Snapshot and clear: every queued record in admission order, with
    /// the armed deadline cancelled.
    pub fn take_all(&mut self) -> Vec<TelemetryRecord> {
        self.deadline = None;
        self.records.drain(..).collect()
    }

    /// Re-merge a failed batch's records ahead of newer ones, preserving
    /// their original relative order.
    pub fn requeue_front(&mut self, records: Vec<TelemetryRecord>) {
        for record in records.into_iter().rev() {
            self.records.push_front(record);
        }
    }

    /// Arm (or override) the flush deadline `delay` from now. Used for the
    /// normal timeout after an in-flight attempt completes and for retry
    /// backoff deadlines.
    pub fn schedule_in(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    /// Arm the normal batch-timeout deadline.
    pub fn schedule_timeout(&mut self) {
        self.schedule_in(self.batch_timeout);
    }

    /// Cancel the armed deadline without touching the records.
    pub fn clear_deadline(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
