//! Append-only stock-movement ledger.
//!
//! Every inventory change in the system lands here as one signed row with a
//! typed reason code. Rows are never updated or deleted; reports reconstruct
//! history from this table. For each ingredient the signed sum of movements
//! must equal the sum of remaining lot quantities at all times.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, ToSql};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Reason code for a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    Purchase,
    SaleConsume,
    Adjustment,
    Wastage,
    SessionOut,
    SessionIn,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Purchase => "PURCHASE",
            MovementKind::SaleConsume => "SALE_CONSUME",
            MovementKind::Adjustment => "ADJUSTMENT",
            MovementKind::Wastage => "WASTAGE",
            MovementKind::SessionOut => "SESSION_OUT",
            MovementKind::SessionIn => "SESSION_IN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PURCHASE" => Some(MovementKind::Purchase),
            "SALE_CONSUME" => Some(MovementKind::SaleConsume),
            "ADJUSTMENT" => Some(MovementKind::Adjustment),
            "WASTAGE" => Some(MovementKind::Wastage),
            "SESSION_OUT" => Some(MovementKind::SessionOut),
            "SESSION_IN" => Some(MovementKind::SessionIn),
            _ => None,
        }
    }
}

impl ToSql for MovementKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for MovementKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        MovementKind::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown movement kind: {s}").into()))
    }
}

/// One row of the audit trail. Positive quantity is a stock increase,
/// negative a decrease. `reference` holds the id of the originating
/// purchase, sale, or session depending on `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: String,
    pub kind: MovementKind,
    pub ingredient_id: String,
    pub quantity: f64,
    pub reference: Option<String>,
    pub note: Option<String>,
    pub created_at: String,
}

/// Append one movement row. Runs on the caller's connection so workflow
/// transactions cover it.
pub(crate) fn record_movement(
    conn: &Connection,
    kind: MovementKind,
    ingredient_id: &str,
    quantity: f64,
    reference: Option<&str>,
    note: Option<&str>,
    at: &str,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO stock_movements (id, kind, ingredient_id, quantity, reference, note, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![id, kind, ingredient_id, quantity, reference, note, at],
    )?;
    Ok(id)
}

/// Movement history, newest first, optionally filtered to one ingredient.
pub fn movements(conn: &Connection, ingredient_id: Option<&str>) -> Result<Vec<StockMovement>> {
    let sql_all = "SELECT id, kind, ingredient_id, quantity, reference, note, created_at
                   FROM stock_movements ORDER BY created_at DESC, rowid DESC";
    let sql_one = "SELECT id, kind, ingredient_id, quantity, reference, note, created_at
                   FROM stock_movements WHERE ingredient_id = ?1
                   ORDER BY created_at DESC, rowid DESC";

    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<StockMovement> {
        Ok(StockMovement {
            id: row.get(0)?,
            kind: row.get(1)?,
            ingredient_id: row.get(2)?,
            quantity: row.get(3)?,
            reference: row.get(4)?,
            note: row.get(5)?,
            created_at: row.get(6)?,
        })
    };

    let rows = match ingredient_id {
        Some(ing) => {
            let mut stmt = conn.prepare(sql_one)?;
            let rows = stmt.query_map(params![ing], map_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
        None => {
            let mut stmt = conn.prepare(sql_all)?;
            let rows = stmt.query_map([], map_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
    };

    Ok(rows)
}

/// Signed sum of all movements for an ingredient.
///
/// Must equal `lots::stock_on_hand` for the same ingredient at any point in
/// time; the workflow tests assert this after every mutation.
pub fn ledger_balance(conn: &Connection, ingredient_id: &str) -> Result<f64> {
    let sum: f64 = conn.query_row(
        "SELECT COALESCE(SUM(quantity), 0) FROM stock_movements WHERE ingredient_id = ?1",
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

    fn seed_ingredient(conn: &Connection, id: &str, name: &str) {
        conn.execute(
            "INSERT INTO ingredients (id, name, unit) VALUES (?1, ?2, 'kg')",
            params![id, name],
        )
        .unwrap();
    }

    #[test]
    fn test_kind_round_trips_through_sql() {
        for kind in [
            MovementKind::Purchase,
            MovementKind::SaleConsume,
            MovementKind::Adjustment,
            MovementKind::Wastage,
            MovementKind::SessionOut,
            MovementKind::SessionIn,
        ] {
            assert_eq!(MovementKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MovementKind::parse("REFUND"), None);
    }

    #[test]
    fn test_kind_serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&MovementKind::SaleConsume).unwrap();
        assert_eq!(json, "\"SALE_CONSUME\"");
        let back: MovementKind = serde_json::from_str("\"SESSION_OUT\"").unwrap();
        assert_eq!(back, MovementKind::SessionOut);
    }

    #[test]
    fn test_movements_filter_and_order() {
        let state = db::test_state();
        let conn = state.lock().unwrap();
        seed_ingredient(&conn, "ing-a", "Flour");
        seed_ingredient(&conn, "ing-b", "Sugar");

        record_movement(
            &conn,
            MovementKind::Purchase,
            "ing-a",
            10.0,
            Some("pur-1"),
            None,
            "2026-01-01T08:00:00+00:00",
        )
        .unwrap();
        record_movement(
            &conn,
            MovementKind::Wastage,
            "ing-a",
            -2.0,
            None,
            Some("dropped a bag"),
            "2026-01-02T08:00:00+00:00",
        )
        .unwrap();
        record_movement(
            &conn,
            MovementKind::Purchase,
            "ing-b",
            5.0,
            Some("pur-2"),
            None,
            "2026-01-03T08:00:00+00:00",
        )
        .unwrap();

        let all = movements(&conn, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].ingredient_id, "ing-b", "newest first");

        let flour = movements(&conn, Some("ing-a")).unwrap();
        assert_eq!(flour.len(), 2);
        assert_eq!(flour[0].kind, MovementKind::Wastage);
        assert_eq!(flour[0].note.as_deref(), Some("dropped a bag"));
        assert_eq!(flour[1].kind, MovementKind::Purchase);
        assert_eq!(flour[1].reference.as_deref(), Some("pur-1"));
    }

    #[test]
    fn test_ledger_balance_sums_signed_quantities() {
        let state = db::test_state();
        let conn = state.lock().unwrap();
        seed_ingredient(&conn, "ing-a", "Flour");

        let at = "2026-01-01T08:00:00+00:00";
        record_movement(&conn, MovementKind::Purchase, "ing-a", 10.0, None, None, at).unwrap();
        record_movement(&conn, MovementKind::SaleConsume, "ing-a", -3.5, None, None, at).unwrap();
        record_movement(&conn, MovementKind::SessionOut, "ing-a", -1.5, None, None, at).unwrap();

        assert_eq!(ledger_balance(&conn, "ing-a").unwrap(), 5.0);
        assert_eq!(ledger_balance(&conn, "ing-missing").unwrap(), 0.0);
    }
}
