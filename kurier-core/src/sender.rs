//! Telemetry sender
//!
//! Composition root of the engine. A record admitted by the host flows
//! through the sampling gate, then error deduplication, then the batch
//! queue; flushes hand the queued records to the delivery manager and
//! route its outcome back into the queue or the offline store.
//!
//! Nothing in here returns an error to the host. Every failure is
//! absorbed, logged on the debug channel, and folded into the
//! retry/offline machinery.

use crate::config::Config;
use crate::dedup::{DedupDecision, ErrorDedup};
use crate::delivery::{AttemptOutcome, DeliveryManager};
use crate::offline::OfflineStore;
use crate::queue::BatchQueue;
use crate::sampling::SamplingGate;
use crate::types::{FlushTrigger, LifecycleSignal, TelemetryRecord};

use std::time::Duration;

/// Counters for what the engine has done since construction.
#[derive(Debug, Default, Clone)]
pub struct SenderStats {
    pub admitted: u64,
    pub sampled_out: u64,
    pub deduplicated: u64,
    pub dropped_unconfigured: u64,
    pub delivered_batches: u64,
    pub delivered_records: u64,
    pub retried_batches: u64,
    pub offlined_records: u64,
    pub restored_records: u64,
    pub evicted_offline: u64,
}

pub struct TelemetrySender {
    gate: SamplingGate,
    dedup: ErrorDedup,
    queue: BatchQueue,
    delivery: DeliveryManager,
    offline: OfflineStore,
    online: bool,
    ready: bool,
    warned_unconfigured: bool,
    stats: SenderStats,
}

impl TelemetrySender {
    pub fn new(config: &Config, delivery: DeliveryManager, offline: OfflineStore) -> Self {
        Self {
            gate: SamplingGate::new(config.sampling.clone()),
            dedup: ErrorDedup::new(&config.errors),
            queue: BatchQueue::new(
                config.delivery.batch_size,
                Duration::from_millis(config.delivery.batch_timeout_ms),
            ),
            delivery,
            offline,
            online: true,
            ready: config.agent.is_ready(),
            warned_unconfigured: false,
            stats: SenderStats::default(),
        }
    }

    /// Re-inject the previous session's stored records through the normal
    /// queue path. Returns how many records were restored.
    pub async fn restore_on_startup(&mut self) -> usize {
        let restored = self.offline.restore_on_startup();
        let count = restored.len();
        if count == 0 {
            return 0;
        }

        tracing::info!(records = count, "Restoring offline records");
        self.stats.restored_records += count as u64;

        let mut flush_due = false;
        for record in restored {
            flush_due |= self.queue.push(record);
        }
        if flush_due {
            self.flush(FlushTrigger::Size).await;
        }
        count
    }

    /// Accept one record from the host.
    ///
    /// Drops silently (with counters) when the agent is unconfigured, the
    /// sampling gate rejects, or deduplication suppresses a repeat error.
    pub async fn admit(&mut self, record: TelemetryRecord) {
        if !self.ready {
            if !self.warned_unconfigured {
                self.warned_unconfigured = true;
                tracing::warn!("Telemetry disabled: app_id or endpoint not configured");
            }
            self.stats.dropped_unconfigured += 1;
            return;
        }

        if !self.gate.admits(record.kind) {
            self.stats.sampled_out += 1;
            return;
        }

        let record = if record.is_error() {
            match self.dedup.observe(&record) {
                DedupDecision::Emit(info) => info.decorate(record),
                DedupDecision::Suppress => {
                    self.stats.deduplicated += 1;
                    return;
                }
            }
        } else {
            record
        };

        self.stats.admitted += 1;
        if self.queue.push(record) {
            self.flush(FlushTrigger::Size).await;
        }
    }

    /// Flush the queue as one batch through the delivery manager.
    ///
    /// A no-op while an attempt is in flight or the queue is empty; the
    /// deadline is maintained so the worker never wakes for nothing.
    pub async fn flush(&mut self, trigger: FlushTrigger) {
        if self.queue.is_empty() {
            self.queue.clear_deadline();
            return;
        }

        if self.delivery.is_sending() {
            tracing::debug!(trigger = %trigger, "Flush skipped, attempt in flight");
            self.queue.schedule_timeout();
            return;
        }

        let records = self.queue.take_all();
        tracing::debug!(trigger = %trigger, records = records.len(), "Flushing batch");

        let teardown = trigger == FlushTrigger::Teardown;
        let outcome = self.delivery.attempt(records, self.online, teardown).await;
        self.route_outcome(outcome);
    }

    /// React to a host lifecycle signal.
    pub async fn handle_signal(&mut self, signal: LifecycleSignal) {
        tracing::debug!(signal = %signal, "Lifecycle signal");
        match signal {
            LifecycleSignal::VisibilityHidden => {
                self.flush(FlushTrigger::VisibilityHidden).await;
            }
            LifecycleSignal::VisibilityRestored => {
                self.drain_if_possible().await;
            }
            LifecycleSignal::ConnectivityLost => {
                self.online = false;
            }
            LifecycleSignal::ConnectivityRestored => {
                self.online = true;
                self.drain_if_possible().await;
            }
            LifecycleSignal::Teardown => {
                self.flush(FlushTrigger::Teardown).await;
            }
        }
    }

    /// Timer wakeup from the worker loop.
    pub async fn on_timer(&mut self) {
        self.flush(FlushTrigger::Timer).await;
    }

    /// Send stored offline records directly, bypassing the live queue.
    async fn drain_if_possible(&mut self) {
        if !self.online || self.offline.is_empty() || self.delivery.is_sending() {
            return;
        }

        let records = self.offline.take_all();
        tracing::debug!(records = records.len(), "Draining offline store");
        let outcome = self.delivery.attempt(records, true, false).await;
        self.route_outcome(outcome);
    }

    fn route_outcome(&mut self, outcome: AttemptOutcome) {
        match outcome {
            AttemptOutcome::Delivered { records, .. } => {
                self.stats.delivered_batches += 1;
                self.stats.delivered_records += records as u64;
            }
            AttemptOutcome::Retry { records, delay } => {
                self.stats.retried_batches += 1;
                self.queue.requeue_front(records);
                self.queue.schedule_in(delay);
            }
            AttemptOutcome::Offlined { records } => {
                // Parks the records only. The online flag belongs to the
                // connectivity signals; the next batch gets a fresh attempt.
                self.stats.offlined_records += records.len() as u64;
                let evicted = self.offline.push(records);
                self.stats.evicted_offline += evicted as u64;
            }
        }
    }

    /// Deadline of the next timer flush, if one is armed.
    pub fn next_flush_due(&self) -> Option<tokio::time::Instant> {
        self.queue.deadline()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn offline_pending(&self) -> usize {
        self.offline.len()
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }
}
