//! Core domain types for kurier
//!
//! These types form the data model shared by every engine component:
//! records as admitted by collaborators, batches as shipped to the
//! collection endpoint, and the lifecycle/trigger vocabulary the host
//! uses to drive the engine.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Record** | A single unit of telemetry (event/performance/error/custom) |
//! | **Batch** | An ordered group of records sent in one delivery attempt |
//! | **Envelope** | The wire shape a batch is serialized into |
//! | **Signal** | A host lifecycle notification (visibility, connectivity, teardown) |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Records
// ============================================

/// Classification of a telemetry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Behavioral events (clicks, navigation, custom interactions)
    Event,
    /// Timing and resource metrics
    Performance,
    /// Captured errors and rejections
    Error,
    /// Host-defined records outside the other kinds
    Custom,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Event => "event",
            RecordKind::Performance => "performance",
            RecordKind::Error => "error",
            RecordKind::Custom => "custom",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single unit of telemetry.
///
/// Records are created by capture collaborators, admitted through the
/// sampling gate and (for errors) the dedup cache, then batched for
/// delivery. A record is immutable once admitted; the dedup cache
/// decorates the payload *before* admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Record classification
    pub kind: RecordKind,
    /// Free-form collaborator label ("click", "web_vitals", "js_error", ...)
    pub category: String,
    /// When the record was captured
    pub timestamp: DateTime<Utc>,
    /// Structured record body
    pub payload: serde_json::Value,
}

impl TelemetryRecord {
    /// Create a record with the current capture timestamp.
    pub fn new(kind: RecordKind, category: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind,
            category: category.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Create a behavioral event record.
    pub fn event(category: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(RecordKind::Event, category, payload)
    }

    /// Create a performance metric record.
    pub fn performance(category: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(RecordKind::Performance, category, payload)
    }

    /// Create a host-defined custom record.
    pub fn custom(category: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(RecordKind::Custom, category, payload)
    }

    /// Create an error record with the payload shape the dedup cache
    /// fingerprints (`error_type`, `message`, `stack`).
    pub fn error(
        category: impl Into<String>,
        error_type: impl Into<String>,
        message: impl Into<String>,
        stack: impl Into<String>,
    ) -> Self {
        Self::new(
            RecordKind::Error,
            category,
            serde_json::json!({
                "error_type": error_type.into(),
                "message": message.into(),
                "stack": stack.into(),
            }),
        )
    }

    /// Whether this record passes through the dedup cache.
    pub fn is_error(&self) -> bool {
        self.kind == RecordKind::Error
    }

    /// Fetch a string field from the payload, if present.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}

// ============================================
// Batches
// ============================================

/// An ordered group of records sent together in one delivery attempt.
///
/// Created when the queue flushes; consumed on successful delivery or
/// when handed to the offline store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Generated batch identifier (UUID v4)
    pub id: String,
    /// When the batch was assembled
    pub created_at: DateTime<Utc>,
    /// Records in admission order
    pub records: Vec<TelemetryRecord>,
}

impl Batch {
    pub fn new(records: Vec<TelemetryRecord>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Take the records back out, e.g. for requeueing or offlining.
    pub fn into_records(self) -> Vec<TelemetryRecord> {
        self.records
    }
}

/// Wire envelope for one batch.
///
/// Field names are fixed by the collection endpoint contract, hence the
/// camelCase rename.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEnvelope<'a> {
    /// Application identifier from configuration
    pub app_id: &'a str,
    /// Batch assembly time
    pub timestamp: DateTime<Utc>,
    /// Records in admission order
    pub records: &'a [TelemetryRecord],
}

impl<'a> BatchEnvelope<'a> {
    pub fn new(app_id: &'a str, batch: &'a Batch) -> Self {
        Self {
            app_id,
            timestamp: batch.created_at,
            records: &batch.records,
        }
    }
}

// ============================================
// Lifecycle & Triggers
// ============================================

/// Host lifecycle notifications the engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The host surface went to the background; flush what we have.
    VisibilityHidden,
    /// The host surface is visible again; drain the offline store.
    VisibilityRestored,
    /// The device lost connectivity; attempts go straight to the store.
    ConnectivityLost,
    /// Connectivity is back; drain the offline store.
    ConnectivityRestored,
    /// The host process is terminating; final primary-transport flush.
    Teardown,
}

impl LifecycleSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleSignal::VisibilityHidden => "visibility_hidden",
            LifecycleSignal::VisibilityRestored => "visibility_restored",
            LifecycleSignal::ConnectivityLost => "connectivity_lost",
            LifecycleSignal::ConnectivityRestored => "connectivity_restored",
            LifecycleSignal::Teardown => "teardown",
        }
    }
}

impl std::fmt::Display for LifecycleSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What caused a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Queue reached the configured batch size
    Size,
    /// The armed batch timeout (or a retry backoff deadline) expired
    Timer,
    /// Visibility-hidden lifecycle signal
    VisibilityHidden,
    /// Process teardown; primary transport only
    Teardown,
    /// Host asked for a flush explicitly
    Manual,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Timer => "timer",
            FlushTrigger::VisibilityHidden => "visibility_hidden",
            FlushTrigger::Teardown => "teardown",
            FlushTrigger::Manual => "manual",
        }
    }
}

impl std::fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
