//! Integration tests for the telemetry delivery pipeline
//!
//! These tests drive the public API end to end with scripted transports:
//! admission through sampling and dedup, batching, retry backoff, offline
//! spillover, and restore across sessions backed by a real SQLite file.

use kurier_core::config::{AgentConfig, Config};
use kurier_core::delivery::DeliveryManager;
use kurier_core::error::{Error, Result};
use kurier_core::offline::OfflineStore;
use kurier_core::sender::TelemetrySender;
use kurier_core::storage::{MemoryStore, SqliteStore};
use kurier_core::transport::{BeaconTransport, RequestTransport, WirePayload};
use kurier_core::types::{LifecycleSignal, TelemetryRecord};
use kurier_core::worker;

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// HTTP transport that replays scripted results and records every call.
struct ScriptedHttp {
    script: Mutex<VecDeque<std::result::Result<(), String>>>,
    bodies: Arc<Mutex<Vec<Vec<u8>>>>,
    call_times: Arc<Mutex<Vec<tokio::time::Instant>>>,
}

impl ScriptedHttp {
    fn boxed(
        script: Vec<std::result::Result<(), String>>,
        bodies: Arc<Mutex<Vec<Vec<u8>>>>,
        call_times: Arc<Mutex<Vec<tokio::time::Instant>>>,
    ) -> Box<Self> {
        Box::new(Self {
            script: Mutex::new(script.into()),
            bodies,
            call_times,
        })
    }
}

#[async_trait]
impl RequestTransport for ScriptedHttp {
    async fn send(&self, payload: &WirePayload) -> Result<()> {
        self.call_times.lock().unwrap().push(tokio::time::Instant::now());
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(())) | None => {
                self.bodies.lock().unwrap().push(payload.body.clone());
                Ok(())
            }
            Some(Err(message)) => Err(Error::Transport(message)),
        }
    }
}

struct AcceptingBeacon {
    calls: Arc<AtomicUsize>,
}

impl BeaconTransport for AcceptingBeacon {
    fn send(&self, _payload: &WirePayload) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        true
    }
}

struct Pipeline {
    bodies: Arc<Mutex<Vec<Vec<u8>>>>,
    call_times: Arc<Mutex<Vec<tokio::time::Instant>>>,
    beacon_calls: Arc<AtomicUsize>,
}

impl Pipeline {
    fn new() -> Self {
        Self {
            bodies: Arc::new(Mutex::new(Vec::new())),
            call_times: Arc::new(Mutex::new(Vec::new())),
            beacon_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn config(&self) -> Config {
        let mut config = Config::default();
        config.agent = AgentConfig {
            app_id: Some("integration-app".to_string()),
            endpoint_url: Some("https://collect.example.com".to_string()),
        };
        config.delivery.compress = false;
        config
    }

    fn sender(
        &self,
        config: &Config,
        script: Vec<std::result::Result<(), String>>,
        with_beacon: bool,
    ) -> TelemetrySender {
        let beacon: Option<Box<dyn BeaconTransport>> = if with_beacon {
            Some(Box::new(AcceptingBeacon {
                calls: self.beacon_calls.clone(),
            }))
        } else {
            None
        };
        let http = ScriptedHttp::boxed(script, self.bodies.clone(), self.call_times.clone());
        let delivery =
            DeliveryManager::new(&config.delivery, "integration-app", beacon, Some(http));
        let offline = OfflineStore::new(Box::new(MemoryStore::new()), config.offline.max_records);
        TelemetrySender::new(config, delivery, offline)
    }

    /// Record counts per delivered envelope, in delivery order.
    fn delivered(&self) -> Vec<usize> {
        self.bodies
            .lock()
            .unwrap()
            .iter()
            .map(|body| decode(body)["records"].as_array().unwrap().len())
            .collect()
    }
}

fn decode(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).expect("envelope should be valid JSON")
}

fn event(i: usize) -> TelemetryRecord {
    TelemetryRecord::event("click", serde_json::json!({ "i": i }))
}

fn type_error() -> TelemetryRecord {
    TelemetryRecord::error(
        "js",
        "TypeError",
        "x is not a function",
        "at render (app.js:10)\nat update (app.js:42)\nat tick (app.js:88)",
    )
}

// ============================================
// Happy Path Tests
// ============================================

#[tokio::test]
async fn test_full_batch_delivers_one_envelope() {
    let pipeline = Pipeline::new();
    let mut config = pipeline.config();
    config.delivery.batch_size = 3;
    let mut sender = pipeline.sender(&config, vec![], false);

    for i in 0..3 {
        sender.admit(event(i)).await;
    }

    assert_eq!(pipeline.delivered(), vec![3]);
    assert_eq!(sender.queued(), 0);

    let bodies = pipeline.bodies.lock().unwrap();
    let wire = decode(&bodies[0]);
    assert_eq!(wire["appId"], "integration-app");
    assert!(wire["timestamp"].is_string(), "envelope should be stamped");

    let records = wire["records"].as_array().unwrap();
    assert_eq!(records[0]["kind"], "event");
    assert_eq!(records[0]["category"], "click");
    assert!(records[0]["timestamp"].is_string());
}

#[tokio::test]
async fn test_partial_batch_waits_for_trigger() {
    let pipeline = Pipeline::new();
    let mut config = pipeline.config();
    config.delivery.batch_size = 10;
    let mut sender = pipeline.sender(&config, vec![], false);

    sender.admit(event(0)).await;
    sender.admit(event(1)).await;

    assert!(pipeline.delivered().is_empty());
    assert_eq!(sender.queued(), 2);
    assert!(sender.next_flush_due().is_some(), "timer should be armed");

    sender.handle_signal(LifecycleSignal::VisibilityHidden).await;
    assert_eq!(pipeline.delivered(), vec![2]);
}

// ============================================
// Retry Backoff Tests
// ============================================

#[tokio::test(start_paused = true)]
async fn test_backoff_schedule_through_worker() {
    let pipeline = Pipeline::new();
    let mut config = pipeline.config();
    config.delivery.batch_size = 1;
    config.delivery.max_retries = 2;
    config.delivery.base_retry_delay_ms = 5000;
    let sender = pipeline.sender(
        &config,
        vec![Err("503".to_string()), Err("503".to_string()), Ok(())],
        false,
    );

    let (handle, worker) = worker::channel(sender);
    let join = tokio::spawn(worker.run());

    handle.record(event(0)).await;
    tokio::time::sleep(Duration::from_millis(31_000)).await;

    // first retry after 10s, second after a further 20s
    let times = pipeline.call_times.lock().unwrap().clone();
    assert_eq!(times.len(), 3, "two failures then one success");
    assert_eq!(times[1] - times[0], Duration::from_millis(10_000));
    assert_eq!(times[2] - times[1], Duration::from_millis(20_000));
    assert_eq!(pipeline.delivered(), vec![1]);

    handle.shutdown().await;
    join.await.unwrap();
}

#[tokio::test]
async fn test_exhausted_retries_spill_to_offline_store() {
    let pipeline = Pipeline::new();
    let mut config = pipeline.config();
    config.delivery.batch_size = 2;
    config.delivery.max_retries = 0;
    let mut sender = pipeline.sender(&config, vec![Err("down".to_string())], false);

    sender.admit(event(0)).await;
    sender.admit(event(1)).await;

    assert!(pipeline.delivered().is_empty());
    assert_eq!(sender.offline_pending(), 2);
    assert!(sender.is_online(), "exhaustion parks the batch, not the sender");

    // delivery resumes for the next batch without any signal
    sender.admit(event(2)).await;
    sender.admit(event(3)).await;
    assert_eq!(pipeline.delivered(), vec![2]);
    assert_eq!(sender.offline_pending(), 2);
}

// ============================================
// Offline and Restore Tests
// ============================================

#[tokio::test]
async fn test_connectivity_cycle_drains_stored_records() {
    let pipeline = Pipeline::new();
    let mut config = pipeline.config();
    config.delivery.batch_size = 2;
    let mut sender = pipeline.sender(&config, vec![], false);

    sender.handle_signal(LifecycleSignal::ConnectivityLost).await;
    sender.admit(event(0)).await;
    sender.admit(event(1)).await;

    // known offline: no transport call, straight to the store
    assert!(pipeline.delivered().is_empty());
    assert_eq!(pipeline.call_times.lock().unwrap().len(), 0);
    assert_eq!(sender.offline_pending(), 2);

    sender
        .handle_signal(LifecycleSignal::ConnectivityRestored)
        .await;

    assert_eq!(sender.offline_pending(), 0);
    assert_eq!(pipeline.delivered(), vec![2]);
}

#[tokio::test]
async fn test_offline_records_survive_restart_via_sqlite() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("offline.db");

    let pipeline = Pipeline::new();
    let mut config = pipeline.config();
    config.delivery.batch_size = 3;
    config.delivery.max_retries = 0;

    // first session: delivery is down, the batch lands in SQLite
    {
        let store = SqliteStore::open(&db_path).unwrap();
        store.migrate().unwrap();
        let http = ScriptedHttp::boxed(
            vec![Err("down".to_string())],
            pipeline.bodies.clone(),
            pipeline.call_times.clone(),
        );
        let delivery = DeliveryManager::new(&config.delivery, "integration-app", None, Some(http));
        let offline = OfflineStore::new(Box::new(store), config.offline.max_records);
        let mut sender = TelemetrySender::new(&config, delivery, offline);

        for i in 0..3 {
            sender.admit(event(i)).await;
        }
        assert_eq!(sender.offline_pending(), 3);
    }

    // second session: restore re-injects and the size trigger delivers
    {
        let store = SqliteStore::open(&db_path).unwrap();
        store.migrate().unwrap();
        let http = ScriptedHttp::boxed(vec![], pipeline.bodies.clone(), pipeline.call_times.clone());
        let delivery = DeliveryManager::new(&config.delivery, "integration-app", None, Some(http));
        let offline = OfflineStore::new(Box::new(store), config.offline.max_records);
        let mut sender = TelemetrySender::new(&config, delivery, offline);

        let restored = sender.restore_on_startup().await;
        assert_eq!(restored, 3);
        assert_eq!(pipeline.delivered(), vec![3]);
    }

    // third session: the snapshot was cleared, nothing comes back
    {
        let store = SqliteStore::open(&db_path).unwrap();
        store.migrate().unwrap();
        let http = ScriptedHttp::boxed(vec![], pipeline.bodies.clone(), pipeline.call_times.clone());
        let delivery = DeliveryManager::new(&config.delivery, "integration-app", None, Some(http));
        let offline = OfflineStore::new(Box::new(store), config.offline.max_records);
        let mut sender = TelemetrySender::new(&config, delivery, offline);

        assert_eq!(sender.restore_on_startup().await, 0);
    }
}

#[tokio::test]
async fn test_offline_cap_evicts_oldest_first() {
    let pipeline = Pipeline::new();
    let mut config = pipeline.config();
    config.delivery.batch_size = 1;
    config.offline.max_records = 5;
    let mut sender = pipeline.sender(&config, vec![], false);

    sender.handle_signal(LifecycleSignal::ConnectivityLost).await;
    for i in 0..7 {
        sender.admit(event(i)).await;
    }
    assert_eq!(sender.offline_pending(), 5);

    sender
        .handle_signal(LifecycleSignal::ConnectivityRestored)
        .await;

    let bodies = pipeline.bodies.lock().unwrap();
    let wire = decode(&bodies[0]);
    let kept: Vec<i64> = wire["records"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["payload"]["i"].as_i64().unwrap())
        .collect();
    assert_eq!(kept, vec![2, 3, 4, 5, 6], "oldest records evicted first");
}

// ============================================
// Error Deduplication Tests
// ============================================

#[tokio::test]
async fn test_repeat_errors_emit_at_milestones() {
    let pipeline = Pipeline::new();
    let mut config = pipeline.config();
    config.delivery.batch_size = 1;
    let mut sender = pipeline.sender(&config, vec![], false);

    for _ in 0..25 {
        sender.admit(type_error()).await;
    }

    let bodies = pipeline.bodies.lock().unwrap();
    let repeat_counts: Vec<u64> = bodies
        .iter()
        .map(|body| {
            decode(body)["records"][0]["payload"]["repeat_count"]
                .as_u64()
                .unwrap()
        })
        .collect();
    assert_eq!(repeat_counts, vec![1, 10, 20]);

    drop(bodies);
    assert_eq!(sender.stats().deduplicated, 22);
}

#[tokio::test]
async fn test_distinct_errors_pass_independently() {
    let pipeline = Pipeline::new();
    let mut config = pipeline.config();
    config.delivery.batch_size = 1;
    let mut sender = pipeline.sender(&config, vec![], false);

    sender.admit(type_error()).await;
    sender
        .admit(TelemetryRecord::error(
            "js",
            "RangeError",
            "index out of bounds",
            "at get (list.js:3)",
        ))
        .await;

    assert_eq!(pipeline.delivered(), vec![1, 1]);
}

// ============================================
// Lifecycle Tests
// ============================================

#[tokio::test]
async fn test_teardown_sends_by_beacon_only() {
    let pipeline = Pipeline::new();
    let mut config = pipeline.config();
    config.delivery.batch_size = 10;
    let mut sender = pipeline.sender(&config, vec![], true);

    sender.admit(event(0)).await;
    sender.admit(event(1)).await;
    sender.handle_signal(LifecycleSignal::Teardown).await;

    assert_eq!(pipeline.beacon_calls.load(Ordering::SeqCst), 1);
    assert!(pipeline.delivered().is_empty(), "no HTTP during teardown");
    assert_eq!(sender.queued(), 0);
}

#[tokio::test]
async fn test_beacon_preferred_for_normal_flush() {
    let pipeline = Pipeline::new();
    let mut config = pipeline.config();
    config.delivery.batch_size = 2;
    let mut sender = pipeline.sender(&config, vec![], true);

    sender.admit(event(0)).await;
    sender.admit(event(1)).await;

    assert_eq!(pipeline.beacon_calls.load(Ordering::SeqCst), 1);
    assert!(pipeline.delivered().is_empty(), "beacon accepted the batch");
}
