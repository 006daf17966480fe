//! Sampling gate
//!
//! Stateless admission predicate applied to every record before it can
//! reach the queue. Rates come from [`SamplingConfig`]; the random source
//! is injected so decisions are reproducible in tests.

use crate::config::SamplingConfig;
use crate::types::RecordKind;
use rand::Rng;

/// Source of uniform draws in `[0.0, 1.0)`.
///
/// Substitutable so sampling decisions are deterministic under test.
pub trait RandomSource: Send {
    fn next_f64(&mut self) -> f64;
}

/// Production source backed by the thread-local RNG.
#[derive(Debug, Default)]
pub struct ThreadRngSource;

impl RandomSource for ThreadRngSource {
    fn next_f64(&mut self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Replays a fixed sequence of draws, cycling when exhausted.
///
/// The deterministic counterpart to [`ThreadRngSource`] for tests.
#[derive(Debug)]
pub struct SequenceSource {
    draws: Vec<f64>,
    next: usize,
}

impl SequenceSource {
    pub fn new(draws: Vec<f64>) -> Self {
        Self { draws, next: 0 }
    }
}

impl RandomSource for SequenceSource {
    fn next_f64(&mut self) -> f64 {
        if self.draws.is_empty() {
            return 0.0;
        }
        let draw = self.draws[self.next % self.draws.len()];
        self.next += 1;
        draw
    }
}

/// Decides whether records are admitted given the configured per-kind rates.
pub struct SamplingGate {
    rates: SamplingConfig,
    rng: Box<dyn RandomSource>,
}

impl SamplingGate {
    pub fn new(rates: SamplingConfig) -> Self {
        Self::with_source(rates, Box::new(ThreadRngSource))
    }

    pub fn with_source(rates: SamplingConfig, rng: Box<dyn RandomSource>) -> Self {
        Self { rates, rng }
    }

    /// Admission decision for one record kind.
    pub fn admits(&mut self, kind: RecordKind) -> bool {
        let rate = self.rates.rate_for(kind);
        self.should_admit(rate)
    }

    /// Core predicate: `rate <= 0` always rejects, `rate >= 1` always
    /// admits, anything between admits with probability `rate`.
    ///
    /// The fast paths never consume a draw, so senders running at the
    /// default full-sampling rates stay deterministic.
    pub fn should_admit(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.rng.next_f64() < rate
    }
}
