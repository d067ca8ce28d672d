//! Inventory lot store.
//!
//! A lot is one batch of an ingredient bought at one unit cost. Quantities
//! only ever decrease after creation; emptied lots stay behind as zero rows
//! for audit. FIFO consumers read lots ordered by purchase timestamp with
//! rowid as the deterministic tiebreak for same-instant purchases.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StoreError};

/// One batch of an ingredient at a fixed unit cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryLot {
    pub id: String,
    pub ingredient_id: String,
    pub quantity: f64,
    pub unit_cost: f64,
    pub purchased_at: String,
    pub created_at: String,
    pub updated_at: String,
}

/// All lots for an ingredient, oldest purchase first.
pub fn lots_for_ingredient(conn: &Connection, ingredient_id: &str) -> Result<Vec<InventoryLot>> {
    let mut stmt = conn.prepare(
        "SELECT id, ingredient_id, quantity, unit_cost, purchased_at, created_at, updated_at
         FROM inventory_lots
         WHERE ingredient_id = ?1
         ORDER BY purchased_at ASC, rowid ASC",
    )?;
    let rows = stmt.query_map(params![ingredient_id], |row| {
        Ok(InventoryLot {
            id: row.get(0)?,
            ingredient_id: row.get(1)?,
            quantity: row.get(2)?,
            unit_cost: row.get(3)?,
            purchased_at: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Create a lot for an ingredient. Purchases set a real unit cost;
/// positive adjustments and session returns create zero-cost lots.
pub(crate) fn insert_lot(
    conn: &Connection,
    ingredient_id: &str,
    quantity: f64,
    unit_cost: f64,
) -> Result<InventoryLot> {
    if quantity <= 0.0 {
        return Err(StoreError::Validation(format!(
            "lot quantity must be positive, got {quantity}"
        )));
    }
    if unit_cost < 0.0 {
        return Err(StoreError::Validation(format!(
            "lot unit cost must not be negative, got {unit_cost}"
        )));
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO inventory_lots (id, ingredient_id, quantity, unit_cost, purchased_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5)",
        params![id, ingredient_id, quantity, unit_cost, now],
    )?;

    Ok(InventoryLot {
        id,
        ingredient_id: ingredient_id.to_string(),
        quantity,
        unit_cost,
        purchased_at: now.clone(),
        created_at: now.clone(),
        updated_at: now,
    })
}

/// Decrement a lot's remaining quantity.
///
/// The guarded UPDATE refuses to take a lot below zero; a zero-row result is
/// then split into `NotFound` (unknown id) or `Invariant` (over-reduction,
/// unreachable from the FIFO engine, which never asks for more than a lot
/// holds).
pub(crate) fn reduce_lot(conn: &Connection, lot_id: &str, amount: f64) -> Result<()> {
    if amount <= 0.0 {
        return Err(StoreError::Validation(format!(
            "reduce amount must be positive, got {amount}"
        )));
    }

    let now = Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE inventory_lots
         SET quantity = quantity - ?1, updated_at = ?2
         WHERE id = ?3 AND quantity >= ?1",
        params![amount, now, lot_id],
    )?;

    if changed == 0 {
        let remaining: Option<f64> = conn
            .query_row(
                "SELECT quantity FROM inventory_lots WHERE id = ?1",
                params![lot_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        return match remaining {
            None => Err(StoreError::not_found("lot", lot_id)),
            Some(qty) => Err(StoreError::Invariant(format!(
                "cannot reduce lot {lot_id} by {amount}: only {qty} remaining"
            ))),
        };
    }

    Ok(())
}

/// Total remaining quantity for an ingredient across all its lots.
pub fn stock_on_hand(conn: &Connection, ingredient_id: &str) -> Result<f64> {
    let sum: f64 = conn.query_row(
        "SELECT COALESCE(SUM(quantity), 0) FROM inventory_lots WHERE ingredient_id = ?1",
        params![ingredient_id],
        |row| row.get(0),
    )?;
    Ok(sum)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn seed_ingredient(conn: &Connection, id: &str) {
        conn.execute(
            "INSERT INTO ingredients (id, name, unit) VALUES (?1, ?1, 'kg')",
            params![id],
        )
        .unwrap();
    }

    fn seed_lot(conn: &Connection, id: &str, ingredient: &str, qty: f64, cost: f64, at: &str) {
        conn.execute(
            "INSERT INTO inventory_lots (id, ingredient_id, quantity, unit_cost, purchased_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, ingredient, qty, cost, at],
        )
        .unwrap();
    }

    #[test]
    fn test_lots_ordered_oldest_first() {
        let state = db::test_state();
        let conn = state.lock().unwrap();
        seed_ingredient(&conn, "flour");

        seed_lot(&conn, "lot-new", "flour", 5.0, 2.0, "2026-02-01T00:00:00+00:00");
        seed_lot(&conn, "lot-old", "flour", 5.0, 1.0, "2026-01-01T00:00:00+00:00");
        seed_lot(&conn, "lot-mid", "flour", 5.0, 1.5, "2026-01-15T00:00:00+00:00");

        let lots = lots_for_ingredient(&conn, "flour").unwrap();
        let ids: Vec<&str> = lots.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["lot-old", "lot-mid", "lot-new"]);
    }

    #[test]
    fn test_same_timestamp_ties_break_by_insertion_order() {
        let state = db::test_state();
        let conn = state.lock().unwrap();
        seed_ingredient(&conn, "flour");

        let at = "2026-01-01T00:00:00+00:00";
        seed_lot(&conn, "lot-first", "flour", 1.0, 1.0, at);
        seed_lot(&conn, "lot-second", "flour", 1.0, 2.0, at);

        let lots = lots_for_ingredient(&conn, "flour").unwrap();
        assert_eq!(lots[0].id, "lot-first");
        assert_eq!(lots[1].id, "lot-second");
    }

    #[test]
    fn test_insert_lot_validates_inputs() {
        let state = db::test_state();
        let conn = state.lock().unwrap();
        seed_ingredient(&conn, "flour");

        assert!(matches!(
            insert_lot(&conn, "flour", 0.0, 1.0),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            insert_lot(&conn, "flour", 5.0, -1.0),
            Err(StoreError::Validation(_))
        ));

        let lot = insert_lot(&conn, "flour", 5.0, 0.0).unwrap();
        assert_eq!(lot.quantity, 5.0);
        assert_eq!(lot.unit_cost, 0.0);
    }

    #[test]
    fn test_reduce_lot_decrements_and_keeps_zero_rows() {
        let state = db::test_state();
        let conn = state.lock().unwrap();
        seed_ingredient(&conn, "flour");
        seed_lot(&conn, "lot-1", "flour", 5.0, 1.0, "2026-01-01T00:00:00+00:00");

        reduce_lot(&conn, "lot-1", 3.0).unwrap();
        assert_eq!(stock_on_hand(&conn, "flour").unwrap(), 2.0);

        // Draining to exactly zero keeps the row behind
        reduce_lot(&conn, "lot-1", 2.0).unwrap();
        let lots = lots_for_ingredient(&conn, "flour").unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].quantity, 0.0);
    }

    #[test]
    fn test_reduce_lot_unknown_id_is_not_found() {
        let state = db::test_state();
        let conn = state.lock().unwrap();

        let err = reduce_lot(&conn, "lot-missing", 1.0).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "lot", .. }), "got {err:?}");
    }

    #[test]
    fn test_reduce_lot_over_reduction_is_invariant_violation() {
        let state = db::test_state();
        let conn = state.lock().unwrap();
        seed_ingredient(&conn, "flour");
        seed_lot(&conn, "lot-1", "flour", 2.0, 1.0, "2026-01-01T00:00:00+00:00");

        let err = reduce_lot(&conn, "lot-1", 3.0).unwrap_err();
        assert!(matches!(err, StoreError::Invariant(_)), "got {err:?}");

        // And nothing changed
        assert_eq!(stock_on_hand(&conn, "flour").unwrap(), 2.0);
    }
}
