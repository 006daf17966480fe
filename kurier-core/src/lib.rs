//! # kurier-core
//!
//! Core library for kurier - a client-side telemetry delivery engine.
//!
//! This library provides:
//! - Sampling and error deduplication ahead of the queue
//! - Batching with size and time based flush triggers
//! - Retrying delivery with beacon/HTTP transports and offline spillover
//! - SQLite-backed offline storage restored on the next startup
//!
//! ## Architecture
//!
//! A record admitted by the host passes through three stages:
//! - **Admission:** sampling gate, then error deduplication
//! - **Batching:** a queue flushed by size, timer, or lifecycle signal
//! - **Delivery:** one attempt per flush with retry backoff; exhausted
//!   batches spill to the offline store and return next session
//!
//! The engine never surfaces an error to the host. Failures are logged
//! on the debug channel and absorbed by the retry/offline machinery.
//!
//! ## Example
//!
//! ```rust,no_run
//! use kurier_core::{
//!     Config, DeliveryManager, OfflineStore, TelemetrySender, TelemetryRecord,
//! };
//! use kurier_core::storage::MemoryStore;
//!
//! # async fn demo() {
//! let config = Config::load().expect("failed to load config");
//!
//! let delivery = DeliveryManager::new(&config.delivery, "my-app", None, None);
//! let offline = OfflineStore::new(Box::new(MemoryStore::new()), 500);
//! let mut sender = TelemetrySender::new(&config, delivery, offline);
//!
//! sender.restore_on_startup().await;
//! sender
//!     .admit(TelemetryRecord::event("click", serde_json::json!({"target": "#buy"})))
//!     .await;
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use delivery::{AttemptOutcome, DeliveryManager};
pub use error::{Error, Result};
pub use offline::OfflineStore;
pub use sender::{SenderStats, TelemetrySender};
pub use transport::{BeaconTransport, HttpPostTransport, RequestTransport};
pub use types::*;
pub use worker::{channel, SenderHandle, SenderWorker};

// Public modules
pub mod config;
pub mod dedup;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod offline;
pub mod queue;
pub mod sampling;
pub mod sender;
pub mod storage;
pub mod transport;
pub mod types;
pub mod worker;
