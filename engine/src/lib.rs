//! # ShopSync Engine
//!
//! Offline multi-device synchronization for a shop backend.
//!
//! Point-of-sale terminals and clerk tablets record sales, expenses, product
//! edits and stock adjustments while disconnected, then upload them as a
//! [`SyncBatch`]. The engine merges each batch into one consistent server
//! state per business.
//!
//! ## Guarantees
//!
//! - **Idempotent**: an `op_id` is applied at most once per business; a
//!   retransmitted operation replays its first result as `duplicate`
//! - **Non-negative stock**: a product's quantity never drops below zero
//!   unless the adjustment explicitly allowed it, even under concurrent
//!   uploads
//! - **Monotonic versions**: every accepted entity mutation bumps `version`
//! - **Monotonic cursors**: a device's last-sync time never goes backwards
//!
//! ## Components
//!
//! - [`SyncCoordinator`] orchestrates a batch
//! - [`ConflictResolver`] arbitrates updates and voids on sales, expenses
//!   and products under a [`ConflictPolicy`]
//! - [`InventoryLedger`] applies stock deltas to an append-only movement log
//! - [`IdempotencyStore`] records the result of every operation
//! - [`SyncStatusTracker`] keeps per-device cursors and pending counts
//!
//! All persistence goes through the [`SyncStore`] trait. [`MemoryStore`] is
//! a complete in-process implementation.
//!
//! ## Quick Start
//!
//! ```rust
//! use shopsync_engine::{
//!     Action, BatchContext, EntityType, MemoryStore, Outcome, SyncBatch, SyncCoordinator,
//!     SyncOperation,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio_test_runtime(async {
//! let store = Arc::new(MemoryStore::new());
//! store.register_business("shop-1");
//! let coordinator = SyncCoordinator::new(store);
//!
//! let batch = SyncBatch::new(
//!     "shop-1",
//!     "till-1",
//!     vec![SyncOperation::new(
//!         "op-1",
//!         EntityType::Sale,
//!         Action::Create,
//!         json!({"id": "sale-1", "total": 12.5, "payment_method": "cash"}),
//!         1_706_745_600_000,
//!         "till-1",
//!     )],
//! );
//!
//! let ctx = BatchContext::new("shop-1", "till-1", "clerk-7");
//! let response = coordinator.process_batch(&ctx, batch).await.unwrap();
//! assert_eq!(response.results[0].outcome, Outcome::Applied);
//! # });
//! # fn tokio_test_runtime<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread()
//! #         .enable_all()
//! #         .build()
//! #         .unwrap()
//! #         .block_on(f)
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod entity;
pub mod error;
pub mod idempotency;
pub mod ledger;
pub mod locks;
pub mod operation;
pub mod resolver;
pub mod result;
pub mod schema;
pub mod storage;
pub mod tracker;

// Re-export main types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, RetryConfig};
pub use coordinator::SyncCoordinator;
pub use entity::{EntityKind, EntityRecord, EntityWrite};
pub use error::{Error, StoreError, StoreResult, SyncError};
pub use idempotency::IdempotencyStore;
pub use ledger::{
    fold_quantity, AdjustmentReason, InventoryLedger, StockAdjustment, StockCheckpoint,
    StockLevel, StockMovement, StockState,
};
pub use locks::{EntityGuard, EntityLocks};
pub use operation::{
    Action, BatchContext, Command, EntityCommand, EntityType, LaneKey, OperationMeta, SyncBatch,
    SyncOperation,
};
pub use resolver::{ConflictPolicy, ConflictResolver, Resolution};
pub use result::{ErrorKind, OperationResult, Outcome, ServerState, SyncResponse};
pub use schema::{FieldDef, FieldType, PayloadSchema, Schema};
pub use storage::{MemoryStore, SyncStore};
pub use tracker::{DeviceSyncStatus, SyncCursor, SyncStatus, SyncStatusTracker};

/// Type aliases for clarity
pub type BusinessId = String;
pub type DeviceId = String;
pub type OpId = String;
pub type EntityId = String;
pub type Version = u64;
pub type Timestamp = u64;
