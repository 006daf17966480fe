//! Delivery attempt manager
//!
//! Runs one delivery attempt per flush: the fire-and-forget beacon path
//! first, the request/response HTTP path as fallback. A failed attempt
//! comes back as a scheduling decision (retry after backoff, or give the
//! records to the offline store); routing the records is the sender's
//! job, not the manager's.

use std::time::Duration;

use crate::config::DeliveryConfig;
use crate::transport::{encode_envelope, BeaconTransport, RequestTransport, TransportKind};
use crate::types::{Batch, TelemetryRecord};

/// Backoff ceiling for a single retry delay.
const MAX_BACKOFF_MS: u64 = 60_000;

/// What the sender should do with the records after an attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// A transport accepted the batch.
    Delivered { via: TransportKind, records: usize },
    /// The attempt failed with retry budget left; requeue and try again
    /// after `delay`.
    Retry {
        records: Vec<TelemetryRecord>,
        delay: Duration,
    },
    /// Retry budget exhausted, host known offline, or teardown with no
    /// usable transport; records belong in the offline store.
    Offlined { records: Vec<TelemetryRecord> },
}

pub struct DeliveryManager {
    beacon: Option<Box<dyn BeaconTransport>>,
    http: Option<Box<dyn RequestTransport>>,
    app_id: String,
    compress: bool,
    beacon_enabled: bool,
    max_retries: u32,
    base_retry_delay_ms: u64,
    /// True only while a transport call is in flight, never during the
    /// backoff wait between attempts.
    sending: bool,
    retry_count: u32,
}

impl DeliveryManager {
    pub fn new(
        config: &DeliveryConfig,
        app_id: impl Into<String>,
        beacon: Option<Box<dyn BeaconTransport>>,
        http: Option<Box<dyn RequestTransport>>,
    ) -> Self {
        Self {
            beacon,
            http,
            app_id: app_id.into(),
            compress: config.compress,
            beacon_enabled: config.beacon_enabled,
            max_retries: config.max_retries,
            base_retry_delay_ms: config.base_retry_delay_ms,
            sending: false,
            retry_count: 0,
        }
    }

    /// True while a transport call for the current attempt is in flight.
    pub fn is_sending(&self) -> bool {
        self.sending
    }

    /// Consecutive failed attempts for the batch currently being retried.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Run one delivery attempt for `records`.
    ///
    /// A known-offline host skips the transports entirely; the records go
    /// straight to the store and the retry counter is left alone. During
    /// teardown only the beacon path runs, the host process is exiting
    /// and cannot wait on a request.
    pub async fn attempt(
        &mut self,
        records: Vec<TelemetryRecord>,
        online: bool,
        teardown: bool,
    ) -> AttemptOutcome {
        if !online {
            tracing::debug!(records = records.len(), "Host offline, storing batch");
            return AttemptOutcome::Offlined { records };
        }

        let batch = Batch::new(records);
        let payload = match encode_envelope(&self.app_id, &batch, self.compress) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to encode batch");
                return self.on_failure(batch.into_records());
            }
        };

        if teardown {
            self.sending = true;
            let accepted = self.try_beacon(&payload);
            self.sending = false;

            return if accepted {
                AttemptOutcome::Delivered {
                    via: TransportKind::Beacon,
                    records: batch.len(),
                }
            } else {
                tracing::debug!(
                    batch_id = %batch.id,
                    "Teardown send failed, storing batch"
                );
                AttemptOutcome::Offlined {
                    records: batch.into_records(),
                }
            };
        }

        self.sending = true;
        let via = if self.try_beacon(&payload) {
            Some(TransportKind::Beacon)
        } else {
            match &self.http {
                Some(http) => match http.send(&payload).await {
                    Ok(()) => Some(TransportKind::Http),
                    Err(e) => {
                        tracing::debug!(batch_id = %batch.id, error = %e, "HTTP send failed");
                        None
                    }
                },
                None => None,
            }
        };
        self.sending = false;

        match via {
            Some(via) => {
                self.retry_count = 0;
                tracing::debug!(
                    batch_id = %batch.id,
                    records = batch.len(),
                    via = %via,
                    "Batch delivered"
                );
                AttemptOutcome::Delivered {
                    via,
                    records: batch.len(),
                }
            }
            None => self.on_failure(batch.into_records()),
        }
    }

    fn try_beacon(&self, payload: &crate::transport::WirePayload) -> bool {
        if !self.beacon_enabled {
            return false;
        }
        match &self.beacon {
            Some(beacon) => beacon.send(payload),
            None => false,
        }
    }

    fn on_failure(&mut self, records: Vec<TelemetryRecord>) -> AttemptOutcome {
        self.retry_count += 1;

        if self.retry_count <= self.max_retries {
            let delay = self.backoff_delay();
            tracing::debug!(
                retry = self.retry_count,
                delay_ms = delay.as_millis() as u64,
                "Delivery failed, retrying"
            );
            AttemptOutcome::Retry { records, delay }
        } else {
            tracing::debug!(
                retries = self.retry_count - 1,
                records = records.len(),
                "Retries exhausted, storing batch"
            );
            self.retry_count = 0;
            AttemptOutcome::Offlined { records }
        }
    }

    fn backoff_delay(&self) -> Duration {
        let delay_ms = self
            .base_retry_delay_ms
            .saturating_mul(2u64.pow(self.retry_count.min(10)));
        Duration::from_millis(delay_ms.min(MAX_BACKOFF_MS))
    }
}
