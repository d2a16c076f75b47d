//! Append-only stock ledger.
//!
//! A product's quantity is never stored as a mutable number. It is derived
//! from the latest [`StockCheckpoint`] plus the fold of every
//! [`StockMovement`] appended after it. Appends are guarded by the movement
//! sequence, so two writers racing on the same product cannot both succeed
//! with the same view of the quantity.

use crate::{
    result::{ErrorKind, OperationResult, ServerState},
    storage::SyncStore,
    DeviceId, EntityId, EntityKind, OpId, OperationMeta, StoreError, StoreResult, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Why stock changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    Sale,
    Restock,
    Return,
    Damage,
    Correction,
    Initial,
}

impl AdjustmentReason {
    pub const ALL: [AdjustmentReason; 6] = [
        AdjustmentReason::Sale,
        AdjustmentReason::Restock,
        AdjustmentReason::Return,
        AdjustmentReason::Damage,
        AdjustmentReason::Correction,
        AdjustmentReason::Initial,
    ];

    /// Wire names of [`Self::ALL`], in the same order.
    pub const NAMES: [&'static str; 6] = [
        Self::ALL[0].as_str(),
        Self::ALL[1].as_str(),
        Self::ALL[2].as_str(),
        Self::ALL[3].as_str(),
        Self::ALL[4].as_str(),
        Self::ALL[5].as_str(),
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            AdjustmentReason::Sale => "sale",
            AdjustmentReason::Restock => "restock",
            AdjustmentReason::Return => "return",
            AdjustmentReason::Damage => "damage",
            AdjustmentReason::Correction => "correction",
            AdjustmentReason::Initial => "initial",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == s)
    }
}

impl fmt::Display for AdjustmentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated stock change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockAdjustment {
    pub product_id: EntityId,
    pub delta: i64,
    pub reason: AdjustmentReason,
    /// Permit the quantity to go below zero
    pub allow_negative: bool,
    pub note: Option<String>,
}

/// One appended ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub product_id: EntityId,
    /// Position in the product's ledger, starting at 1
    pub sequence: u64,
    pub delta: i64,
    pub reason: AdjustmentReason,
    pub resulting_quantity: i64,
    pub op_id: OpId,
    pub device_id: DeviceId,
    pub applied_at: Timestamp,
}

/// Cached quantity at a ledger position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCheckpoint {
    pub product_id: EntityId,
    pub quantity: i64,
    /// Last movement folded into `quantity`
    pub sequence: u64,
    pub taken_at: Timestamp,
}

/// Everything needed to derive a product's current quantity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockState {
    pub checkpoint: Option<StockCheckpoint>,
    /// Movements after the checkpoint, in sequence order
    pub movements: Vec<StockMovement>,
}

impl StockState {
    /// Current quantity, or `None` if the fold overflows.
    pub fn quantity(&self) -> Option<i64> {
        let base = self.checkpoint.as_ref().map_or(0, |c| c.quantity);
        fold_quantity(base, self.movements.iter().map(|m| m.delta))
    }

    pub fn last_sequence(&self) -> u64 {
        self.movements
            .last()
            .map(|m| m.sequence)
            .or_else(|| self.checkpoint.as_ref().map(|c| c.sequence))
            .unwrap_or(0)
    }

    pub fn movements_since_checkpoint(&self) -> u64 {
        self.movements.len() as u64
    }
}

/// Fold deltas onto a starting quantity with overflow checking.
pub fn fold_quantity(start: i64, deltas: impl IntoIterator<Item = i64>) -> Option<i64> {
    deltas
        .into_iter()
        .try_fold(start, |quantity, delta| quantity.checked_add(delta))
}

/// A product with its derived quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: EntityId,
    pub name: Option<String>,
    pub quantity: i64,
}

/// Applies stock adjustments against the movement log.
pub struct InventoryLedger {
    store: Arc<dyn SyncStore>,
    checkpoint_interval: u64,
}

impl InventoryLedger {
    pub fn new(store: Arc<dyn SyncStore>, checkpoint_interval: u64) -> Self {
        Self {
            store,
            checkpoint_interval,
        }
    }

    /// Apply one adjustment.
    ///
    /// An applied result is recorded together with its movement. Rejections
    /// are returned unrecorded. The caller must hold the product's lock.
    pub async fn apply_adjustment(
        &self,
        business_id: &str,
        adjustment: &StockAdjustment,
        meta: &OperationMeta,
    ) -> StoreResult<OperationResult> {
        let product = self
            .store
            .get_entity(business_id, EntityKind::Product, &adjustment.product_id)
            .await?;
        if !product.as_ref().is_some_and(|p| p.is_live()) {
            return Ok(OperationResult::rejected(
                meta.op_id.clone(),
                meta.now,
                ErrorKind::NotFound,
                format!("product '{}' does not exist", adjustment.product_id),
            ));
        }

        let state = self
            .store
            .load_stock(business_id, &adjustment.product_id)
            .await?;
        let Some(current) = state.quantity() else {
            return Ok(self.overflow(adjustment, meta));
        };
        let Some(new_quantity) = current.checked_add(adjustment.delta) else {
            return Ok(self.overflow(adjustment, meta));
        };

        if new_quantity < 0 && !adjustment.allow_negative {
            debug!(
                business_id,
                product_id = %adjustment.product_id,
                current,
                delta = adjustment.delta,
                "adjustment would drive stock negative"
            );
            return Ok(OperationResult::rejected(
                meta.op_id.clone(),
                meta.now,
                ErrorKind::InvariantViolation,
                format!(
                    "insufficient stock: {} on hand, adjustment of {}",
                    current, adjustment.delta
                ),
            )
            .with_state(ServerState::Stock {
                product_id: adjustment.product_id.clone(),
                quantity: current,
            }));
        }

        let movement = StockMovement {
            product_id: adjustment.product_id.clone(),
            sequence: state.last_sequence() + 1,
            delta: adjustment.delta,
            reason: adjustment.reason,
            resulting_quantity: new_quantity,
            op_id: meta.op_id.clone(),
            device_id: meta.device_id.clone(),
            applied_at: meta.now,
        };
        let result = OperationResult::applied(meta.op_id.clone(), meta.now).with_state(
            ServerState::Stock {
                product_id: adjustment.product_id.clone(),
                quantity: new_quantity,
            },
        );

        self.store
            .append_movement(business_id, &movement, &result)
            .await?;

        if self.checkpoint_interval > 0
            && state.movements_since_checkpoint() + 1 >= self.checkpoint_interval
        {
            let checkpoint = StockCheckpoint {
                product_id: movement.product_id.clone(),
                quantity: new_quantity,
                sequence: movement.sequence,
                taken_at: meta.now,
            };
            if let Err(e) = self.store.save_checkpoint(business_id, &checkpoint).await {
                warn!(
                    business_id,
                    product_id = %checkpoint.product_id,
                    error = %e,
                    "failed to save stock checkpoint"
                );
            }
        }

        Ok(result)
    }

    fn overflow(&self, adjustment: &StockAdjustment, meta: &OperationMeta) -> OperationResult {
        OperationResult::rejected(
            meta.op_id.clone(),
            meta.now,
            ErrorKind::Validation,
            format!("quantity overflow for product '{}'", adjustment.product_id),
        )
    }

    /// Derived quantity of a product. Products without movements hold zero.
    pub async fn current_quantity(&self, business_id: &str, product_id: &str) -> StoreResult<i64> {
        let state = self.store.load_stock(business_id, product_id).await?;
        state
            .quantity()
            .ok_or_else(|| StoreError::Invalid(format!("quantity overflow for '{}'", product_id)))
    }

    /// Live products whose quantity is at or below `threshold`.
    pub async fn low_stock(&self, business_id: &str, threshold: i64) -> StoreResult<Vec<StockLevel>> {
        let products = self
            .store
            .list_entities(business_id, EntityKind::Product)
            .await?;
        let quantities = self.store.latest_quantities(business_id).await?;

        let mut levels: Vec<StockLevel> = products
            .into_iter()
            .filter(|p| p.is_live())
            .map(|p| StockLevel {
                quantity: quantities.get(&p.id).copied().unwrap_or(0),
                name: p
                    .payload
                    .get("name")
                    .and_then(|n| n.as_str())
                    .map(str::to_string),
                product_id: p.id,
            })
            .filter(|level| level.quantity <= threshold)
            .collect();
        levels.sort_by(|a, b| {
            a.quantity
                .cmp(&b.quantity)
                .then_with(|| a.product_id.cmp(&b.product_id))
        });
        Ok(levels)
    }

    /// Most recent movements of a product, newest first.
    pub async fn history(
        &self,
        business_id: &str,
        product_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<StockMovement>> {
        self.store
            .movement_history(business_id, product_id, limit)
            .await
    }
}
