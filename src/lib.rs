//! # Offline Engine
//!
//! Offline-first persistence, sync queue and bulk operation engine for a
//! client that must keep working without a network connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     OfflineEngine facade                    │
//! │  • Created → Starting → Ready → ShuttingDown → Stopped     │
//! │  • Every call checks readiness, then delegates             │
//! └─────────────────────────────────────────────────────────────┘
//!        │                 │                    │
//!        ▼                 ▼                    ▼
//! ┌──────────────┐  ┌──────────────────┐  ┌─────────────────────┐
//! │ Cache Engine │  │   Sync Queue     │  │ Bulk Orchestrator   │
//! │ • TTL per    │  │ • priority order │  │ • approve / reject  │
//! │   category   │  │ • retry cooldown │  │ • export csv / json │
//! │ • priority   │  │ • drain through  │  │ • progress events   │
//! │   eviction   │  │   circuit breaker│  │ • single-slot undo  │
//! └──────────────┘  └──────────────────┘  └─────────────────────┘
//!        │                 │   │ conflicts          │
//!        │                 │   ▼                    │
//!        │                 │ ┌──────────────┐       │
//!        │                 │ │Conflict Store│       │
//!        │                 │ └──────────────┘       │
//!        ▼                 ▼        │               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Persistent Store (partitioned)              │
//! │  • MemoryStore (DashMap) or SqlStore (SQLite via sqlx)     │
//! │  • Corrupted entries are dropped on read                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use offline_engine::{OfflineEngine, OfflineEngineConfig, SyncOperation};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = OfflineEngineConfig {
//!         database_url: Some("sqlite:offline.db?mode=rwc".into()),
//!         ..Default::default()
//!     };
//!
//!     let engine = OfflineEngine::open(config).await.expect("Failed to open store");
//!     engine.start().await.expect("Failed to start");
//!
//!     // Queue a mutation; delivery happens whenever a backend is reachable
//!     engine
//!         .enqueue("od-42", "od_request", SyncOperation::Update, json!({"reason": "Symposium"}), 10)
//!         .await
//!         .expect("Failed to enqueue");
//!
//!     let ids = vec!["od-42".to_string()];
//!     let result = engine.perform_bulk_approval(&ids, "Verified").await.expect("Bulk run failed");
//!     println!("{}", result.summary());
//!
//!     engine.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`OfflineEngine`] facade and its lifecycle
//! - [`storage`]: Partitioned store contract, typed tables, memory and SQLite backends
//! - [`cache`]: TTL cache with capacity enforcement
//! - [`eviction`]: Priority scoring for cache eviction
//! - [`queue`]: Sync queue and drain loop
//! - [`conflict`]: Conflict store and resolution helpers
//! - [`bulk`]: Bulk approval, rejection, export and undo
//! - [`record`]: The OD request entity bulk runs act on
//! - [`resilience`]: Retry policies and the remote circuit breaker

pub mod bulk;
pub mod cache;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod coordinator;
pub mod error;
pub mod eviction;
pub mod metrics;
pub mod queue;
pub mod record;
pub mod resilience;
pub mod storage;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use bulk::{
    BulkOperationProgress, BulkOperationResult, BulkOperationStatus, BulkOperationType, BulkState,
    ExportDocument, ExportFormat,
};
pub use cache::{CacheCategory, CacheStats};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::OfflineEngineConfig;
pub use conflict::{Conflict, ResolutionStrategy, Side};
pub use coordinator::{EngineHealth, EngineState, OfflineEngine};
pub use error::{EngineError, OperationError, Severity, ValidationError};
pub use metrics::LatencyTimer;
pub use queue::{
    DrainReport, PushOutcome, QueueStats, RemoteError, RemoteSyncBackend, SyncOperation,
    SyncQueueItem, SyncStatus,
};
pub use record::{OdRequest, OdStatus, RecordStats, StudentRequestCount};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError, CircuitStats};
pub use resilience::retry::RetryConfig;
pub use storage::memory::MemoryStore;
pub use storage::sql::SqlStore;
pub use storage::traits::{Partition, PersistentStore, StorageError};
