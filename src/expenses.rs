//! Expense records.
//!
//! Independent of the inventory ledger; they exist so daily reporting can
//! show spend next to revenue.

use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::DbState;
use crate::error::{Result, StoreError};
use crate::sales::PaymentType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expense {
    pub id: String,
    pub label: String,
    pub amount: f64,
    pub paid_via: PaymentType,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewExpense {
    pub label: String,
    pub amount: f64,
    pub paid_via: PaymentType,
}

pub fn create_expense(db: &DbState, req: &NewExpense) -> Result<Expense> {
    if req.label.trim().is_empty() {
        return Err(StoreError::Validation("expense label is required".into()));
    }
    if req.amount <= 0.0 {
        return Err(StoreError::Validation(format!(
            "expense amount must be positive, got {}",
            req.amount
        )));
    }

    let conn = db.lock()?;
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO expenses (id, label, amount, paid_via, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, req.label.trim(), req.amount, req.paid_via, now],
    )?;

    Ok(Expense {
        id,
        label: req.label.trim().to_string(),
        amount: req.amount,
        paid_via: req.paid_via,
        created_at: now,
    })
}

/// All expenses, newest first.
pub fn list_expenses(db: &DbState) -> Result<Vec<Expense>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(
        "SELECT id, label, amount, paid_via, created_at
         FROM expenses ORDER BY created_at DESC, rowid DESC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Expense {
            id: row.get(0)?,
            label: row.get(1)?,
            amount: row.get(2)?,
            paid_via: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

// ===========================================================================
// Tests
// ===========================================================================
