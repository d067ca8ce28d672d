//! Cash-session lifecycle with declared-inventory reconciliation.
//!
//! A session moves NONE → OPEN → CLOSED, with at most one OPEN session at a
//! time. Opening stages declared stock out of the tracked pool (FIFO
//! consumption, SESSION_OUT); closing returns the undeclared remainder as
//! zero-cost lots (SESSION_IN). Declared quantities are also snapshotted
//! per session for variance display; the snapshot itself never moves
//! stock, the paired ledger write does.
//!
//! The no-second-open-session check runs inside the same IMMEDIATE
//! transaction that inserts the row, so two concurrent opens cannot both
//! pass it.

use chrono::Utc;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, ToSql, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::catalog;
use crate::db::DbState;
use crate::error::{Result, StoreError};
use crate::fifo;
use crate::ledger::{self, MovementKind};
use crate::lots;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashSession {
    pub id: String,
    pub opened_at: String,
    pub opened_by: String,
    pub closed_at: Option<String>,
    pub closed_by: Option<String>,
    pub opening_float: f64,
    pub closing_float: Option<f64>,
    pub notes: Option<String>,
}

impl CashSession {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}

/// Whether a declared count was taken at opening or closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotType {
    Opening,
    Closing,
}

impl SnapshotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotType::Opening => "OPENING",
            SnapshotType::Closing => "CLOSING",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPENING" => Some(SnapshotType::Opening),
            "CLOSING" => Some(SnapshotType::Closing),
            _ => None,
        }
    }
}

impl ToSql for SnapshotType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for SnapshotType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        SnapshotType::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown snapshot type: {s}").into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInventorySnapshot {
    pub id: String,
    pub session_id: String,
    pub ingredient_id: String,
    pub quantity: f64,
    pub snapshot_type: SnapshotType,
    pub created_at: String,
}

/// One declared physical count line.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInventoryLine {
    pub ingredient_id: String,
    pub quantity: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenSession {
    pub opening_float: f64,
    pub notes: Option<String>,
    /// Stock physically staged for the shift; consumed out of the tracked
    /// pool on open.
    #[serde(default)]
    pub inventory: Vec<SessionInventoryLine>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloseSession {
    pub closing_float: f64,
    pub notes: Option<String>,
    /// Stock returned to the tracked pool on close.
    #[serde(default)]
    pub inventory: Vec<SessionInventoryLine>,
}

// ---------------------------------------------------------------------------
// Open session
// ---------------------------------------------------------------------------

/// Open a new cash session for `acting_user_id`.
///
/// Fails with `Conflict` while another session is open. The session row,
/// every SESSION_OUT consumption, and every OPENING snapshot commit
/// together; insufficient stock anywhere aborts the whole open.
pub fn open_session(db: &DbState, req: &OpenSession, acting_user_id: &str) -> Result<CashSession> {
    if req.opening_float < 0.0 {
        return Err(StoreError::Validation(format!(
            "opening float must not be negative, got {}",
            req.opening_float
        )));
    }
    validate_inventory_lines(&req.inventory)?;

    let mut conn = db.lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    // Existence check inside the write transaction: IMMEDIATE already holds
    // the write lock, so no concurrent open can slip between check and insert.
    if let Some(open) = active_session_row(&tx)? {
        return Err(StoreError::Conflict(format!(
            "a session is already open ({})",
            open.id
        )));
    }

    let session_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO cash_sessions (id, opened_at, opened_by, opening_float, notes)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![session_id, now, acting_user_id, req.opening_float, req.notes],
    )?;

    for line in &req.inventory {
        catalog::get_ingredient_row(&tx, &line.ingredient_id)?;
        if line.quantity > 0.0 {
            fifo::consume(
                &tx,
                &line.ingredient_id,
                line.quantity,
                MovementKind::SessionOut,
                Some(&session_id),
                None,
            )?;
        }
        insert_snapshot(&tx, &session_id, line, SnapshotType::Opening, &now)?;
    }

    tx.commit()?;

    info!(
        session_id = %session_id,
        opened_by = %acting_user_id,
        opening_float = %req.opening_float,
        declared_lines = req.inventory.len(),
        "Cash session opened"
    );

    Ok(CashSession {
        id: session_id,
        opened_at: now,
        opened_by: acting_user_id.to_string(),
        closed_at: None,
        closed_by: None,
        opening_float: req.opening_float,
        closing_float: None,
        notes: req.notes.clone(),
    })
}

// ---------------------------------------------------------------------------
// Close session
// ---------------------------------------------------------------------------

/// Close an open session.
///
/// Fails with `NotFound` for an unknown id and `Conflict` for a session
/// that is already closed. Declared closing stock comes back as zero-cost
/// lots with SESSION_IN entries; everything commits as one transaction.
pub fn close_session(
    db: &DbState,
    session_id: &str,
    req: &CloseSession,
    acting_user_id: &str,
) -> Result<CashSession> {
    if req.closing_float < 0.0 {
        return Err(StoreError::Validation(format!(
            "closing float must not be negative, got {}",
            req.closing_float
        )));
    }
    validate_inventory_lines(&req.inventory)?;

    let mut conn = db.lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let session = session_row(&tx, session_id)?;
    if session.closed_at.is_some() {
        return Err(StoreError::Conflict(format!(
            "session {session_id} is already closed"
        )));
    }

    let now = Utc::now().to_rfc3339();
    for line in &req.inventory {
        catalog::get_ingredient_row(&tx, &line.ingredient_id)?;
        if line.quantity > 0.0 {
            // Returned stock has no new cost basis
            lots::insert_lot(&tx, &line.ingredient_id, line.quantity, 0.0)?;
            ledger::record_movement(
                &tx,
                MovementKind::SessionIn,
                &line.ingredient_id,
                line.quantity,
                Some(session_id),
                None,
                &now,
            )?;
        }
        insert_snapshot(&tx, session_id, line, SnapshotType::Closing, &now)?;
    }

    tx.execute(
        "UPDATE cash_sessions
         SET closed_at = ?1, closed_by = ?2, closing_float = ?3,
             notes = COALESCE(?4, notes)
         WHERE id = ?5",
        params![now, acting_user_id, req.closing_float, req.notes, session_id],
    )?;

    tx.commit()?;

    info!(
        session_id = %session_id,
        closed_by = %acting_user_id,
        closing_float = %req.closing_float,
        "Cash session closed"
    );

    session_row(&conn, session_id)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// The currently open session, if any.
pub fn active_session(db: &DbState) -> Result<Option<CashSession>> {
    let conn = db.lock()?;
    active_session_row(&conn)
}

/// All sessions, newest opening first.
pub fn list_sessions(db: &DbState) -> Result<Vec<CashSession>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(
        "SELECT id, opened_at, opened_by, closed_at, closed_by, opening_float, closing_float, notes
         FROM cash_sessions ORDER BY opened_at DESC, rowid DESC",
    )?;
    let rows = stmt.query_map([], map_session)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Declared inventory counts for one session, opening lines first.
pub fn session_snapshots(db: &DbState, session_id: &str) -> Result<Vec<SessionInventorySnapshot>> {
    let conn = db.lock()?;
    session_row(&conn, session_id)?;

    let mut stmt = conn.prepare(
        "SELECT id, session_id, ingredient_id, quantity, snapshot_type, created_at
         FROM session_inventory_snapshots
         WHERE session_id = ?1
         ORDER BY snapshot_type DESC, rowid ASC",
    )?;
    let rows = stmt.query_map(params![session_id], |row| {
        Ok(SessionInventorySnapshot {
            id: row.get(0)?,
            session_id: row.get(1)?,
            ingredient_id: row.get(2)?,
            quantity: row.get(3)?,
            snapshot_type: row.get(4)?,
            created_at: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn validate_inventory_lines(lines: &[SessionInventoryLine]) -> Result<()> {
    for line in lines {
        if line.quantity < 0.0 {
            return Err(StoreError::Validation(format!(
                "declared quantity must not be negative, got {}",
                line.quantity
            )));
        }
    }
    Ok(())
}

fn insert_snapshot(
    conn: &Connection,
    session_id: &str,
    line: &SessionInventoryLine,
    snapshot_type: SnapshotType,
    at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO session_inventory_snapshots
            (id, session_id, ingredient_id, quantity, snapshot_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            Uuid::new_v4().to_string(),
            session_id,
            line.ingredient_id,
            line.quantity,
            snapshot_type,
            at
        ],
    )?;
    Ok(())
}

fn map_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<CashSession> {
    Ok(CashSession {
        id: row.get(0)?,
        opened_at: row.get(1)?,
        opened_by: row.get(2)?,
        closed_at: row.get(3)?,
        closed_by: row.get(4)?,
        opening_float: row.get(5)?,
        closing_float: row.get(6)?,
        notes: row.get(7)?,
    })
}

pub(crate) fn session_row(conn: &Connection, id: &str) -> Result<CashSession> {
    conn.query_row(
        "SELECT id, opened_at, opened_by, closed_at, closed_by, opening_float, closing_float, notes
         FROM cash_sessions WHERE id = ?1",
        params![id],
        map_session,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::not_found("session", id),
        other => other.into(),
    })
}

fn active_session_row(conn: &Connection) -> Result<Option<CashSession>> {
    conn.query_row(
        "SELECT id, opened_at, opened_by, closed_at, closed_by, opening_float, closing_float, notes
         FROM cash_sessions WHERE closed_at IS NULL",
        [],
        map_session,
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other.into()),
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{create_ingredient, NewIngredient};
    use crate::db;
    use crate::purchases::{create_purchase, NewPurchase, NewPurchaseItem};

    fn seed_ingredient(state: &DbState, name: &str) -> String {
        create_ingredient(
            state,
            &NewIngredient {
                name: name.to_string(),
                unit: "kg".to_string(),
                low_stock_level: None,
            },
        )
        .unwrap()
        .id
    }

    fn seed_stock(state: &DbState, ingredient_id: &str, quantity: f64, total_cost: f64) {
        create_purchase(
            state,
            &NewPurchase {
                supplier_id: None,
                notes: None,
                items: vec![NewPurchaseItem {
                    ingredient_id: ingredient_id.to_string(),
                    quantity,
                    total_cost,
                }],
            },
        )
        .unwrap();
    }

    fn plain_open() -> OpenSession {
        OpenSession {
            opening_float: 100.0,
            notes: None,
            inventory: vec![],
        }
    }

    fn plain_close() -> CloseSession {
        CloseSession {
            closing_float: 100.0,
            notes: None,
            inventory: vec![],
        }
    }

    #[test]
    fn test_only_one_open_session_at_a_time() {
        let state = db::test_state();

        let first = open_session(&state, &plain_open(), "user-1").unwrap();
        let err = open_session(&state, &plain_open(), "user-2").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "got {err:?}");

        // After closing, a new session can open
        close_session(&state, &first.id, &plain_close(), "user-1").unwrap();
        open_session(&state, &plain_open(), "user-2").unwrap();
    }

    #[test]
    fn test_open_consumes_declared_stock_and_snapshots() {
        let state = db::test_state();
        let flour = seed_ingredient(&state, "Flour");
        seed_stock(&state, &flour, 10.0, 20.0);

        let session = open_session(
            &state,
            &OpenSession {
                opening_float: 50.0,
                notes: Some("morning shift".to_string()),
                inventory: vec![SessionInventoryLine {
                    ingredient_id: flour.clone(),
                    quantity: 3.0,
                }],
            },
            "user-1",
        )
        .unwrap();

        let conn = state.lock().unwrap();
        assert_eq!(crate::lots::stock_on_hand(&conn, &flour).unwrap(), 7.0);

        let moves = crate::ledger::movements(&conn, Some(&flour)).unwrap();
        let out: Vec<_> = moves
            .iter()
            .filter(|m| m.kind == MovementKind::SessionOut)
            .collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].quantity, -3.0);
        assert_eq!(out[0].reference.as_deref(), Some(session.id.as_str()));

        // Ledger/lot consistency
        assert_eq!(
            crate::ledger::ledger_balance(&conn, &flour).unwrap(),
            crate::lots::stock_on_hand(&conn, &flour).unwrap()
        );
        drop(conn);

        let snapshots = session_snapshots(&state, &session.id).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].snapshot_type, SnapshotType::Opening);
        assert_eq!(snapshots[0].quantity, 3.0);
    }

    #[test]
    fn test_open_aborts_entirely_on_insufficient_stock() {
        let state = db::test_state();
        let flour = seed_ingredient(&state, "Flour");
        let sugar = seed_ingredient(&state, "Sugar");
        seed_stock(&state, &flour, 10.0, 20.0);
        seed_stock(&state, &sugar, 1.0, 5.0);

        let err = open_session(
            &state,
            &OpenSession {
                opening_float: 50.0,
                notes: None,
                inventory: vec![
                    SessionInventoryLine {
                        ingredient_id: flour.clone(),
                        quantity: 3.0,
                    },
                    SessionInventoryLine {
                        ingredient_id: sugar.clone(),
                        quantity: 2.0,
                    },
                ],
            },
            "user-1",
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::InsufficientStock { .. }), "got {err:?}");

        // No session row, no flour consumption, no snapshots survive
        assert!(active_session(&state).unwrap().is_none());
        assert!(list_sessions(&state).unwrap().is_empty());
        let conn = state.lock().unwrap();
        assert_eq!(crate::lots::stock_on_hand(&conn, &flour).unwrap(), 10.0);
    }

    #[test]
    fn test_close_returns_declared_stock_as_zero_cost_lots() {
        let state = db::test_state();
        let flour = seed_ingredient(&state, "Flour");
        seed_stock(&state, &flour, 10.0, 20.0);

        let session = open_session(
            &state,
            &OpenSession {
                opening_float: 50.0,
                notes: None,
                inventory: vec![SessionInventoryLine {
                    ingredient_id: flour.clone(),
                    quantity: 4.0,
                }],
            },
            "user-1",
        )
        .unwrap();

        let closed = close_session(
            &state,
            &session.id,
            &CloseSession {
                closing_float: 80.0,
                notes: Some("left early".to_string()),
                inventory: vec![SessionInventoryLine {
                    ingredient_id: flour.clone(),
                    quantity: 1.5,
                }],
            },
            "user-2",
        )
        .unwrap();

        assert!(closed.closed_at.is_some());
        assert_eq!(closed.closed_by.as_deref(), Some("user-2"));
        assert_eq!(closed.closing_float, Some(80.0));
        assert_eq!(closed.notes.as_deref(), Some("left early"));

        let conn = state.lock().unwrap();
        // 10 - 4 staged + 1.5 returned
        assert_eq!(crate::lots::stock_on_hand(&conn, &flour).unwrap(), 7.5);
        let lots = crate::lots::lots_for_ingredient(&conn, &flour).unwrap();
        let returned = lots.iter().find(|l| l.unit_cost == 0.0).expect("returned lot");
        assert_eq!(returned.quantity, 1.5);

        assert_eq!(
            crate::ledger::ledger_balance(&conn, &flour).unwrap(),
            crate::lots::stock_on_hand(&conn, &flour).unwrap()
        );
        drop(conn);

        let snapshots = session_snapshots(&state, &session.id).unwrap();
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots
            .iter()
            .any(|s| s.snapshot_type == SnapshotType::Closing && s.quantity == 1.5));
    }

    #[test]
    fn test_close_unknown_session_is_not_found() {
        let state = db::test_state();
        let err = close_session(&state, "missing", &plain_close(), "user-1").unwrap_err();
        assert!(
            matches!(err, StoreError::NotFound { entity: "session", .. }),
            "got {err:?}"
        );
    }

    #[test]
    fn test_close_twice_is_conflict() {
        let state = db::test_state();
        let session = open_session(&state, &plain_open(), "user-1").unwrap();
        close_session(&state, &session.id, &plain_close(), "user-1").unwrap();

        let err = close_session(&state, &session.id, &plain_close(), "user-1").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "got {err:?}");
    }

    #[test]
    fn test_zero_quantity_line_snapshots_without_movement() {
        let state = db::test_state();
        let flour = seed_ingredient(&state, "Flour");
        seed_stock(&state, &flour, 5.0, 10.0);

        let session = open_session(
            &state,
            &OpenSession {
                opening_float: 0.0,
                notes: None,
                inventory: vec![SessionInventoryLine {
                    ingredient_id: flour.clone(),
                    quantity: 0.0,
                }],
            },
            "user-1",
        )
        .unwrap();

        let conn = state.lock().unwrap();
        assert_eq!(crate::lots::stock_on_hand(&conn, &flour).unwrap(), 5.0);
        let moves = crate::ledger::movements(&conn, Some(&flour)).unwrap();
        assert!(moves.iter().all(|m| m.kind != MovementKind::SessionOut));
        drop(conn);

        let snapshots = session_snapshots(&state, &session.id).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].quantity, 0.0);
    }

    #[test]
    fn test_negative_floats_and_quantities_rejected() {
        let state = db::test_state();
        let flour = seed_ingredient(&state, "Flour");

        let err = open_session(
            &state,
            &OpenSession {
                opening_float: -1.0,
                notes: None,
                inventory: vec![],
            },
            "user-1",
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let err = open_session(
            &state,
            &OpenSession {
                opening_float: 10.0,
                notes: None,
                inventory: vec![SessionInventoryLine {
                    ingredient_id: flour,
                    quantity: -2.0,
                }],
            },
            "user-1",
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }
}
