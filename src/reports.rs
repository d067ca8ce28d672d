//! Read-only reporting queries.
//!
//! Everything here reconstructs from the lot table, the movement ledger,
//! and the sale/expense records; nothing writes. Aggregates are computed
//! per query, never cached in mutable columns.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

use crate::db::DbState;
use crate::error::Result;
use crate::ledger::{self, StockMovement};
use crate::sessions;

/// Remaining stock for one ingredient, summed across its lots.
#[derive(Debug, Clone, Serialize)]
pub struct IngredientStock {
    pub ingredient_id: String,
    pub ingredient_name: String,
    pub total_quantity: f64,
    pub unit: String,
    pub low_stock_level: Option<f64>,
}

/// Current stock per ingredient, including ingredients with no lots yet.
pub fn current_stock(db: &DbState) -> Result<Vec<IngredientStock>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(
        "SELECT i.id, i.name, COALESCE(SUM(l.quantity), 0), i.unit, i.low_stock_level
         FROM ingredients i
         LEFT JOIN inventory_lots l ON l.ingredient_id = i.id
         GROUP BY i.id, i.name, i.unit, i.low_stock_level
         ORDER BY i.name ASC",
    )?;
    let rows = stmt.query_map([], map_ingredient_stock)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Ingredients whose remaining stock is below their configured threshold.
pub fn low_stock(db: &DbState) -> Result<Vec<IngredientStock>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(
        "SELECT i.id, i.name, COALESCE(SUM(l.quantity), 0), i.unit, i.low_stock_level
         FROM ingredients i
         LEFT JOIN inventory_lots l ON l.ingredient_id = i.id
         WHERE i.low_stock_level IS NOT NULL
         GROUP BY i.id, i.name, i.unit, i.low_stock_level
         HAVING COALESCE(SUM(l.quantity), 0) < i.low_stock_level
         ORDER BY i.name ASC",
    )?;
    let rows = stmt.query_map([], map_ingredient_stock)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn map_ingredient_stock(row: &rusqlite::Row<'_>) -> rusqlite::Result<IngredientStock> {
    Ok(IngredientStock {
        ingredient_id: row.get(0)?,
        ingredient_name: row.get(1)?,
        total_quantity: row.get(2)?,
        unit: row.get(3)?,
        low_stock_level: row.get(4)?,
    })
}

/// Movement history, newest first, optionally filtered to one ingredient.
pub fn stock_history(db: &DbState, ingredient_id: Option<&str>) -> Result<Vec<StockMovement>> {
    let conn = db.lock()?;
    ledger::movements(&conn, ingredient_id)
}

/// Sales ranking over a date range.
#[derive(Debug, Clone, Serialize)]
pub struct TopProduct {
    pub product_id: String,
    pub product_name: String,
    pub sku: String,
    pub total_qty: i64,
    pub total_revenue: f64,
}

/// Best sellers between `from` and `to` inclusive, by revenue.
pub fn top_products(
    db: &DbState,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<TopProduct>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(
        "SELECT si.product_id, p.name, p.sku,
                COALESCE(SUM(si.qty), 0), COALESCE(SUM(si.line_total), 0)
         FROM sale_items si
         INNER JOIN sales s ON s.id = si.sale_id
         INNER JOIN products p ON p.id = si.product_id
         WHERE s.created_at >= ?1 AND s.created_at <= ?2
         GROUP BY si.product_id, p.name, p.sku
         ORDER BY SUM(si.line_total) DESC",
    )?;
    let rows = stmt.query_map(params![from.to_rfc3339(), to.to_rfc3339()], |row| {
        Ok(TopProduct {
            product_id: row.get(0)?,
            product_name: row.get(1)?,
            sku: row.get(2)?,
            total_qty: row.get(3)?,
            total_revenue: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Revenue, cost, and order count over a date range.
#[derive(Debug, Clone, Serialize)]
pub struct SalesOverview {
    pub revenue: f64,
    pub cogs: f64,
    pub gross_margin: f64,
    pub order_count: i64,
}

/// Totals between `from` and `to` inclusive. Zero-total sales are not
/// counted as orders.
pub fn sales_overview(
    db: &DbState,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<SalesOverview> {
    let conn = db.lock()?;
    let (revenue, cogs, order_count): (f64, f64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(total), 0), COALESCE(SUM(cogs), 0),
                COUNT(CASE WHEN total > 0 THEN 1 END)
         FROM sales WHERE created_at >= ?1 AND created_at <= ?2",
        params![from.to_rfc3339(), to.to_rfc3339()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    Ok(SalesOverview {
        revenue,
        cogs,
        gross_margin: revenue - cogs,
        order_count,
    })
}

/// Cash reconciliation for one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionVariance {
    pub session_id: String,
    pub opening_float: f64,
    pub cash_sales: f64,
    /// opening float + cash sales recorded against the session.
    pub expected_cash: f64,
    pub closing_float: Option<f64>,
    /// closing float − expected cash; `None` while the session is open.
    pub variance: Option<f64>,
}

pub fn session_variance(db: &DbState, session_id: &str) -> Result<SessionVariance> {
    let conn = db.lock()?;
    let session = sessions::session_row(&conn, session_id)?;

    let cash_sales: f64 = conn.query_row(
        "SELECT COALESCE(SUM(total), 0) FROM sales
         WHERE session_id = ?1 AND payment_type = 'CASH'",
        params![session_id],
        |row| row.get(0),
    )?;

    let expected_cash = session.opening_float + cash_sales;
    let variance = session.closing_float.map(|actual| actual - expected_cash);

    Ok(SessionVariance {
        session_id: session.id,
        opening_float: session.opening_float,
        cash_sales,
        expected_cash,
        closing_float: session.closing_float,
        variance,
    })
}

/// One line of the recent-activity feed.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub kind: ActivityKind,
    pub id: String,
    pub description: String,
    pub amount: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Sale,
    Expense,
}

/// Most recent sales and expenses merged, newest first.
pub fn recent_activity(db: &DbState, limit: usize) -> Result<Vec<ActivityEntry>> {
    let conn = db.lock()?;
    let per_side = std::cmp::max(1, limit);

    let mut entries = Vec::new();

    let mut stmt = conn.prepare(
        "SELECT id, total, created_at FROM sales
         ORDER BY created_at DESC, rowid DESC LIMIT ?1",
    )?;
    let sales_rows = stmt.query_map(params![per_side as i64], |row| {
        let total: f64 = row.get(1)?;
        Ok(ActivityEntry {
            kind: ActivityKind::Sale,
            id: row.get(0)?,
            description: format!("Sale of {total:.2}"),
            amount: total,
            created_at: row.get(2)?,
        })
    })?;
    entries.extend(sales_rows.collect::<rusqlite::Result<Vec<_>>>()?);

    let mut stmt = conn.prepare(
        "SELECT id, label, amount, created_at FROM expenses
         ORDER BY created_at DESC, rowid DESC LIMIT ?1",
    )?;
    let expense_rows = stmt.query_map(params![per_side as i64], |row| {
        Ok(ActivityEntry {
            kind: ActivityKind::Expense,
            id: row.get(0)?,
            description: row.get(1)?,
            amount: row.get(2)?,
            created_at: row.get(3)?,
        })
    })?;
    entries.extend(expense_rows.collect::<rusqlite::Result<Vec<_>>>()?);

    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    entries.truncate(limit);
    Ok(entries)
}

// ===========================================================================
// Tests
// ===========================================================================
