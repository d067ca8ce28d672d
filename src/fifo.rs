//! FIFO consumption engine.
//!
//! Given an ingredient and a required quantity, walks the lot store
//! oldest-purchase-first, decrements lots, accumulates the consumed cost,
//! and appends one ledger entry per lot touched. Every quantity-reducing
//! operation in the system (sale, wastage adjustment, session opening)
//! routes through `consume`.
//!
//! The availability check and the decrement loop read and write the same
//! rows, so callers MUST invoke this inside an IMMEDIATE transaction; two
//! concurrent consumers of the last unit would otherwise both pass the
//! check and oversell.

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::ledger::{self, MovementKind};
use crate::lots;

/// What one lot contributed to a consumption.
#[derive(Debug, Clone, Serialize)]
pub struct LotConsumption {
    pub lot_id: String,
    pub consumed: f64,
    pub unit_cost: f64,
}

/// Outcome of a FIFO consumption: the cost of the exact units taken, and
/// the per-lot breakdown in the order they were drained.
#[derive(Debug, Clone, Serialize)]
pub struct Consumption {
    pub total_cost: f64,
    pub entries: Vec<LotConsumption>,
}

/// Consume `required` units of an ingredient, oldest lot first.
///
/// All-or-nothing: if the lots cannot cover the requirement this fails with
/// `InsufficientStock` before any decrement. On success each drained lot
/// gets a negative ledger entry with the caller's kind/reference/note.
pub fn consume(
    conn: &Connection,
    ingredient_id: &str,
    required: f64,
    kind: MovementKind,
    reference: Option<&str>,
    note: Option<&str>,
) -> Result<Consumption> {
    if required <= 0.0 {
        return Err(StoreError::Validation(format!(
            "consumption quantity must be positive, got {required}"
        )));
    }

    let lots = lots::lots_for_ingredient(conn, ingredient_id)?;
    let available: f64 = lots.iter().filter(|l| l.quantity > 0.0).map(|l| l.quantity).sum();
    if available < required {
        return Err(StoreError::InsufficientStock {
            ingredient_id: ingredient_id.to_string(),
            required,
            available,
        });
    }

    let now = Utc::now().to_rfc3339();
    let mut remaining = required;
    let mut total_cost = 0.0;
    let mut entries = Vec::new();

    for lot in lots.iter().filter(|l| l.quantity > 0.0) {
        if remaining <= 0.0 {
            break;
        }

        let consumed = remaining.min(lot.quantity);
        lots::reduce_lot(conn, &lot.id, consumed)?;
        ledger::record_movement(
            conn,
            kind,
            ingredient_id,
            -consumed,
            reference,
            note,
            &now,
        )?;

        total_cost += consumed * lot.unit_cost;
        remaining -= consumed;

        entries.push(LotConsumption {
            lot_id: lot.id.clone(),
            consumed,
            unit_cost: lot.unit_cost,
        });
    }

    debug!(
        ingredient_id = %ingredient_id,
        required = %required,
        lots_touched = entries.len(),
        total_cost = %total_cost,
        "FIFO consumption"
    );

    Ok(Consumption {
        total_cost,
        entries,
    })
}

// ===========================================================================
// Tests
// ===========================================================================
