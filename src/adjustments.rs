//! Manual stock corrections.
//!
//! Positive adjustments add a zero-cost lot (found stock carries no new
//! cost basis); negative adjustments consume through the FIFO engine and
//! are recorded as wastage. Zero is rejected. The audit note travels on
//! every ledger entry the correction produces.

use chrono::Utc;
use rusqlite::TransactionBehavior;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog;
use crate::db::DbState;
use crate::error::{Result, StoreError};
use crate::fifo;
use crate::ledger::{self, MovementKind};
use crate::lots;

#[derive(Debug, Clone, Deserialize)]
pub struct StockAdjustment {
    pub ingredient_id: String,
    /// Positive adds stock, negative removes it.
    pub quantity: f64,
    pub note: Option<String>,
}

/// What an adjustment did to the books.
#[derive(Debug, Clone, Serialize)]
pub struct AdjustmentOutcome {
    pub ingredient_id: String,
    pub quantity: f64,
    /// Change in inventory value: zero for additions (zero-cost lot),
    /// negative of the FIFO-consumed cost for removals.
    pub cost_delta: f64,
}

pub fn adjust_stock(db: &DbState, req: &StockAdjustment) -> Result<AdjustmentOutcome> {
    if req.quantity == 0.0 {
        return Err(StoreError::Validation(
            "adjustment quantity must not be zero".into(),
        ));
    }

    let mut conn = db.lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    catalog::get_ingredient_row(&tx, &req.ingredient_id)?;
    let now = Utc::now().to_rfc3339();

    let cost_delta = if req.quantity > 0.0 {
        lots::insert_lot(&tx, &req.ingredient_id, req.quantity, 0.0)?;
        ledger::record_movement(
            &tx,
            MovementKind::Adjustment,
            &req.ingredient_id,
            req.quantity,
            None,
            req.note.as_deref(),
            &now,
        )?;
        0.0
    } else {
        let consumption = fifo::consume(
            &tx,
            &req.ingredient_id,
            req.quantity.abs(),
            MovementKind::Wastage,
            None,
            req.note.as_deref(),
        )?;
        -consumption.total_cost
    };

    tx.commit()?;

    info!(
        ingredient_id = %req.ingredient_id,
        quantity = %req.quantity,
        cost_delta = %cost_delta,
        "Stock adjusted"
    );

    Ok(AdjustmentOutcome {
        ingredient_id: req.ingredient_id.clone(),
        quantity: req.quantity,
        cost_delta,
    })
}

// ===========================================================================
// Tests
// ===========================================================================
