//! Error dedup / rate-limit cache
//!
//! Error-class records are fingerprinted over their content and repeated
//! occurrences are collapsed: the first occurrence emits, every tenth
//! repeat re-emits an aggregated record, everything else is suppressed.
//! The cache also tracks the emitted-error rate over a 60-second window
//! for alert decoration and enforces a per-session emission ceiling.

use crate::config::ErrorConfig;
use crate::types::TelemetryRecord;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Stack lines that participate in the fingerprint.
const STACK_PREFIX_LINES: usize = 3;

/// A repeat re-emits once its running count reaches a multiple of this.
const REEMIT_EVERY: u64 = 10;

/// Width of the alert rate window, in seconds.
const ALERT_WINDOW_SECS: i64 = 60;

/// Compute the content fingerprint for an error.
///
/// Only the leading stack lines participate, so the cost is bounded by
/// the prefix, not the stack depth. Collisions merge errors; that is an
/// accepted trade-off, not a correctness problem.
pub fn fingerprint(error_type: &str, message: &str, stack: &str) -> String {
    let stack_prefix: Vec<&str> = stack.lines().take(STACK_PREFIX_LINES).collect();
    let hash_input = format!("{}:{}:{}", error_type, message, stack_prefix.join("\n"));

    let mut hasher = Sha256::new();
    hasher.update(hash_input.as_bytes());
    let result = hasher.finalize();

    // Take first 16 bytes (32 hex chars)
    hex::encode(&result[..16])
}

/// Aggregation state for one fingerprint.
#[derive(Debug, Clone)]
pub struct DedupEntry {
    /// Occurrences seen so far, monotonically non-decreasing
    pub count: u64,
    /// First occurrence timestamp
    pub first_seen: DateTime<Utc>,
    /// Most recent occurrence timestamp
    pub last_seen: DateTime<Utc>,
}

/// What the cache decided for one observed error record.
#[derive(Debug, Clone)]
pub enum DedupDecision {
    /// Queue the record, decorated with the aggregate fields.
    Emit(EmitInfo),
    /// Drop the record.
    Suppress,
}

impl DedupDecision {
    pub fn is_emit(&self) -> bool {
        matches!(self, DedupDecision::Emit(_))
    }
}

/// Aggregate fields attached to an emitted error record.
#[derive(Debug, Clone)]
pub struct EmitInfo {
    pub fingerprint: String,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Raised when the extrapolated per-minute emission rate exceeds the
    /// configured alert threshold.
    pub alert: bool,
}

impl EmitInfo {
    /// Decorate the record's payload with the aggregate fields.
    ///
    /// Runs before admission; records are immutable afterwards. Non-object
    /// payloads are passed through untouched.
    pub fn decorate(&self, mut record: TelemetryRecord) -> TelemetryRecord {
        if let Some(obj) = record.payload.as_object_mut() {
            obj.insert("fingerprint".to_string(), self.fingerprint.clone().into());
            obj.insert("repeat_count".to_string(), self.count.into());
            obj.insert(
                "first_seen".to_string(),
                self.first_seen.to_rfc3339().into(),
            );
            obj.insert("last_seen".to_string(), self.last_seen.to_rfc3339().into());
            if self.alert {
                obj.insert("alert".to_string(), true.into());
            }
        }
        record
    }
}

/// Dedup / rate-limit cache for error-class records.
pub struct ErrorDedup {
    entries: HashMap<String, DedupEntry>,
    capacity: usize,
    alert_threshold_per_minute: u32,
    max_emitted_per_session: u32,
    emitted_total: u32,
    window_started_at: Option<DateTime<Utc>>,
    window_emitted: u32,
}

impl ErrorDedup {
    pub fn new(config: &ErrorConfig) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: config.cache_capacity,
            alert_threshold_per_minute: config.alert_threshold_per_minute,
            max_emitted_per_session: config.max_emitted_per_session,
            emitted_total: 0,
            window_started_at: None,
            window_emitted: 0,
        }
    }

    /// Observe an error record and decide whether it is emitted.
    pub fn observe(&mut self, record: &TelemetryRecord) -> DedupDecision {
        self.observe_at(record, Utc::now())
    }

    /// Clock-injected variant of [`observe`](Self::observe).
    pub fn observe_at(&mut self, record: &TelemetryRecord, now: DateTime<Utc>) -> DedupDecision {
        let error_type = record.payload_str("error_type").unwrap_or("unknown");
        let message = record.payload_str("message").unwrap_or("");
        let stack = record.payload_str("stack").unwrap_or("");
        let fp = fingerprint(error_type, message, stack);

        let count = match self.entries.get_mut(&fp) {
            Some(entry) => {
                entry.count += 1;
                entry.last_seen = now;
                entry.count
            }
            None => {
                if self.entries.len() >= self.capacity {
                    self.evict_stalest();
                }
                self.entries.insert(
                    fp.clone(),
                    DedupEntry {
                        count: 1,
                        first_seen: now,
                        last_seen: now,
                    },
                );
                1
            }
        };

        let reemit = count == 1 || count % REEMIT_EVERY == 0;
        if !reemit {
            return DedupDecision::Suppress;
        }

        // Session ceiling caps emissions only; counts above keep updating
        // so repeat totals stay accurate.
        if self.emitted_total >= self.max_emitted_per_session {
            tracing::debug!(
                fingerprint = %fp,
                ceiling = self.max_emitted_per_session,
                "Error emission ceiling reached, suppressing"
            );
            return DedupDecision::Suppress;
        }
        self.emitted_total += 1;

        let alert = self.note_emission(now);
        let (first_seen, last_seen) = match self.entries.get(&fp) {
            Some(entry) => (entry.first_seen, entry.last_seen),
            None => (now, now),
        };

        DedupDecision::Emit(EmitInfo {
            fingerprint: fp,
            count,
            first_seen,
            last_seen,
            alert,
        })
    }

    /// Distinct fingerprints currently tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Emissions so far in this session.
    pub fn emitted_total(&self) -> u32 {
        self.emitted_total
    }

    /// Drop the least-recently-updated entry to make room.
    fn evict_stalest(&mut self) {
        let stalest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_seen)
            .map(|(fp, _)| fp.clone());
        if let Some(fp) = stalest {
            self.entries.remove(&fp);
            tracing::debug!(fingerprint = %fp, "Dedup cache full, evicted stalest entry");
        }
    }

    /// Count this emission in the rate window and report whether the
    /// extrapolated per-minute rate crosses the alert threshold.
    fn note_emission(&mut self, now: DateTime<Utc>) -> bool {
        let window = chrono::Duration::seconds(ALERT_WINDOW_SECS);
        let start = match self.window_started_at {
            Some(start) if now.signed_duration_since(start) < window => {
                self.window_emitted += 1;
                start
            }
            _ => {
                self.window_started_at = Some(now);
                self.window_emitted = 1;
                now
            }
        };

        // Extrapolate over the elapsed slice of the window; slices under a
        // second count as a full second so a lone early error cannot spike
        // the projection.
        let elapsed_ms = now.signed_duration_since(start).num_milliseconds().max(1_000);
        let per_minute = i64::from(self.window_emitted) * 60_000 / elapsed_ms;
        per_minute > i64::from(self.alert_threshold_per_minute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> ErrorConfig {
        ErrorConfig::default()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn type_error() -> TelemetryRecord {
        TelemetryRecord::error(
            "js_error",
            "TypeError",
            "x is not a function",
            "at foo (app.js:1)\nat bar (app.js:9)\nat baz (app.js:20)\nat deep (vendor.js:4)",
        )
    }

    #[test]
    fn test_fingerprint_uses_stack_prefix_only() {
        let base = "at a (x.js:1)\nat b (x.js:2)\nat c (x.js:3)";
        let fp_short = fingerprint("TypeError", "boom", base);
        let fp_deep = fingerprint(
            "TypeError",
            "boom",
            &format!("{}\nat d (y.js:9)\nat e (y.js:10)", base),
        );
        assert_eq!(fp_short, fp_deep);

        let fp_other = fingerprint("TypeError", "boom", "at z (z.js:1)");
        assert_ne!(fp_short, fp_other);
        assert_eq!(fp_short.len(), 32);
    }

    #[test]
    fn test_first_occurrence_emits_count_one() {
        let mut cache = ErrorDedup::new(&config());
        match cache.observe_at(&type_error(), at(0)) {
            DedupDecision::Emit(info) => {
                assert_eq!(info.count, 1);
                assert_eq!(info.first_seen, at(0));
                assert_eq!(info.last_seen, at(0));
                assert!(!info.alert);
            }
            DedupDecision::Suppress => panic!("first occurrence must emit"),
        }
    }

    #[test]
    fn test_repeats_two_through_nine_suppressed_tenth_emits() {
        let mut cache = ErrorDedup::new(&config());
        let record = type_error();

        assert!(cache.observe_at(&record, at(0)).is_emit());
        for i in 2..=9 {
            assert!(
                !cache.observe_at(&record, at(i)).is_emit(),
                "occurrence {} should be suppressed",
                i
            );
        }
        match cache.observe_at(&record, at(10)) {
            DedupDecision::Emit(info) => {
                assert_eq!(info.count, 10);
                assert_eq!(info.first_seen, at(0));
                assert_eq!(info.last_seen, at(10));
            }
            DedupDecision::Suppress => panic!("tenth occurrence must emit"),
        }
    }

    #[test]
    fn test_twenty_five_repeats_emit_three_times() {
        let mut cache = ErrorDedup::new(&config());
        let record = type_error();

        let mut emitted_counts = Vec::new();
        for i in 0..25 {
            if let DedupDecision::Emit(info) = cache.observe_at(&record, at(i)) {
                emitted_counts.push(info.count);
            }
        }
        assert_eq!(emitted_counts, vec![1, 10, 20]);
    }

    #[test]
    fn test_distinct_fingerprints_tracked_independently() {
        let mut cache = ErrorDedup::new(&config());
        let a = TelemetryRecord::error("js_error", "TypeError", "boom", "at a");
        let b = TelemetryRecord::error("js_error", "RangeError", "boom", "at a");

        assert!(cache.observe_at(&a, at(0)).is_emit());
        assert!(cache.observe_at(&b, at(1)).is_emit());
        assert!(!cache.observe_at(&a, at(2)).is_emit());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_capacity_evicts_least_recently_updated() {
        let mut cache = ErrorDedup::new(&ErrorConfig {
            cache_capacity: 2,
            ..config()
        });
        let a = TelemetryRecord::error("e", "A", "a", "s");
        let b = TelemetryRecord::error("e", "B", "b", "s");
        let c = TelemetryRecord::error("e", "C", "c", "s");

        cache.observe_at(&a, at(0));
        cache.observe_at(&b, at(1));
        // Touch A so B becomes the stalest entry.
        cache.observe_at(&a, at(2));
        cache.observe_at(&c, at(3));
        assert_eq!(cache.len(), 2);

        // B was evicted; seeing it again starts over at count 1.
        match cache.observe_at(&b, at(4)) {
            DedupDecision::Emit(info) => assert_eq!(info.count, 1),
            DedupDecision::Suppress => panic!("evicted fingerprint must re-emit"),
        }
    }

    #[test]
    fn test_session_ceiling_stops_emissions() {
        let mut cache = ErrorDedup::new(&ErrorConfig {
            max_emitted_per_session: 2,
            ..config()
        });
        let records: Vec<TelemetryRecord> = (0..4)
            .map(|i| TelemetryRecord::error("e", format!("E{}", i), "m", "s"))
            .collect();

        assert!(cache.observe_at(&records[0], at(0)).is_emit());
        assert!(cache.observe_at(&records[1], at(1)).is_emit());
        assert!(!cache.observe_at(&records[2], at(2)).is_emit());
        assert!(!cache.observe_at(&records[3], at(3)).is_emit());
        assert_eq!(cache.emitted_total(), 2);
    }

    #[test]
    fn test_alert_flag_on_rate_spike() {
        let mut cache = ErrorDedup::new(&ErrorConfig {
            alert_threshold_per_minute: 100,
            ..config()
        });
        let a = TelemetryRecord::error("e", "A", "m", "s");
        let b = TelemetryRecord::error("e", "B", "m", "s");

        // One emission in the clamped 1s slice projects to 60/min: no alert.
        match cache.observe_at(&a, at(0)) {
            DedupDecision::Emit(info) => assert!(!info.alert),
            DedupDecision::Suppress => panic!("must emit"),
        }
        // Two emissions project to 120/min: alert.
        match cache.observe_at(&b, at(0)) {
            DedupDecision::Emit(info) => assert!(info.alert),
            DedupDecision::Suppress => panic!("must emit"),
        }
    }

    #[test]
    fn test_alert_window_resets_after_sixty_seconds() {
        let mut cache = ErrorDedup::new(&ErrorConfig {
            alert_threshold_per_minute: 100,
            ..config()
        });
        let a = TelemetryRecord::error("e", "A", "m", "s");
        let b = TelemetryRecord::error("e", "B", "m", "s");
        let c = TelemetryRecord::error("e", "C", "m", "s");

        cache.observe_at(&a, at(0));
        match cache.observe_at(&b, at(0)) {
            DedupDecision::Emit(info) => assert!(info.alert),
            DedupDecision::Suppress => panic!("must emit"),
        }

        // Past the window the counter starts over: one emission, no alert.
        match cache.observe_at(&c, at(61)) {
            DedupDecision::Emit(info) => assert!(!info.alert),
            DedupDecision::Suppress => panic!("must emit"),
        }
    }

    #[test]
    fn test_decorate_adds_aggregate_fields() {
        let info = EmitInfo {
            fingerprint: "abcd".to_string(),
            count: 10,
            first_seen: at(0),
            last_seen: at(10),
            alert: true,
        };
        let decorated = info.decorate(type_error());

        assert_eq!(decorated.payload["fingerprint"], "abcd");
        assert_eq!(decorated.payload["repeat_count"], 10);
        assert_eq!(decorated.payload["alert"], true);
        assert!(decorated.payload["first_seen"].is_string());
        // Original fields survive decoration.
        assert_eq!(decorated.payload["error_type"], "TypeError");
    }

    #[test]
    fn test_decorate_leaves_non_object_payload_alone() {
        let info = EmitInfo {
            fingerprint: "abcd".to_string(),
            count: 1,
            first_seen: at(0),
            last_seen: at(0),
            alert: false,
        };
        let record = TelemetryRecord::new(
            crate::types::RecordKind::Error,
            "weird",
            serde_json::json!("bare string payload"),
        );
        let decorated = info.decorate(record);
        assert_eq!(decorated.payload, serde_json::json!("bare string payload"));
    }
}
