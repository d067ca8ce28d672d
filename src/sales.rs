//! Sale recording with FIFO cost of goods sold.
//!
//! Each sale line resolves the product's price and recipe, then consumes
//! every recipe ingredient through the FIFO engine. Revenue and COGS are
//! computed here, never supplied by the caller, and the sale header, its
//! lines, all lot decrements, and all ledger entries commit as a single
//! transaction. There is no sell-what's-available fallback: any shortfall
//! aborts the whole sale.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, ToSql, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::catalog;
use crate::db::DbState;
use crate::error::{Result, StoreError};
use crate::fifo;
use crate::ledger::MovementKind;

/// How a sale or expense was paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    Cash,
    Card,
    Other,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Cash => "CASH",
            PaymentType::Card => "CARD",
            PaymentType::Other => "OTHER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CASH" => Some(PaymentType::Cash),
            "CARD" => Some(PaymentType::Card),
            "OTHER" => Some(PaymentType::Other),
            _ => None,
        }
    }
}

impl ToSql for PaymentType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for PaymentType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        PaymentType::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown payment type: {s}").into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sale {
    pub id: String,
    pub session_id: Option<String>,
    pub user_id: String,
    /// Σ line totals.
    pub total: f64,
    /// FIFO-consumed cost across every recipe ingredient of every line,
    /// frozen at sale time.
    pub cogs: f64,
    pub payment_type: PaymentType,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    pub qty: i64,
    /// Product price at the moment of sale.
    pub unit_price: f64,
    pub line_total: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSaleItem {
    pub product_id: String,
    pub qty: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSale {
    pub session_id: Option<String>,
    pub payment_type: PaymentType,
    pub items: Vec<NewSaleItem>,
}

/// Record a sale on behalf of `acting_user_id`.
///
/// Inactive products are rejected here, not just hidden from menus.
pub fn create_sale(db: &DbState, req: &NewSale, acting_user_id: &str) -> Result<Sale> {
    if req.items.is_empty() {
        return Err(StoreError::Validation("a sale needs at least one item".into()));
    }
    for item in &req.items {
        if item.qty <= 0 {
            return Err(StoreError::Validation(format!(
                "sale quantity must be positive, got {}",
                item.qty
            )));
        }
    }

    let mut conn = db.lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Some(ref session_id) = req.session_id {
        require_session(&tx, session_id)?;
    }

    let sale_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let mut total_revenue = 0.0;
    let mut total_cogs = 0.0;
    let mut line_rows = Vec::with_capacity(req.items.len());

    for item in &req.items {
        let product = catalog::get_product_row(&tx, &item.product_id)?;
        if !product.active {
            return Err(StoreError::not_found("product", &item.product_id));
        }

        let unit_price = product.price;
        let line_total = unit_price * item.qty as f64;
        total_revenue += line_total;
        line_rows.push((item.product_id.clone(), item.qty, unit_price, line_total));

        // Consume every recipe ingredient for this line through the engine
        let recipe = catalog::recipe_rows(&tx, &item.product_id)?;
        for recipe_item in &recipe {
            let required = recipe_item.quantity * item.qty as f64;
            let consumption = fifo::consume(
                &tx,
                &recipe_item.ingredient_id,
                required,
                MovementKind::SaleConsume,
                Some(&sale_id),
                None,
            )?;
            total_cogs += consumption.total_cost;
        }
    }

    tx.execute(
        "INSERT INTO sales (id, session_id, user_id, total, cogs, payment_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            sale_id,
            req.session_id,
            acting_user_id,
            total_revenue,
            total_cogs,
            req.payment_type,
            now
        ],
    )?;

    for (product_id, qty, unit_price, line_total) in &line_rows {
        tx.execute(
            "INSERT INTO sale_items (id, sale_id, product_id, qty, unit_price, line_total)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Uuid::new_v4().to_string(),
                sale_id,
                product_id,
                qty,
                unit_price,
                line_total
            ],
        )?;
    }

    tx.commit()?;

    info!(
        sale_id = %sale_id,
        total = %total_revenue,
        cogs = %total_cogs,
        items = req.items.len(),
        "Sale recorded"
    );

    Ok(Sale {
        id: sale_id,
        session_id: req.session_id.clone(),
        user_id: acting_user_id.to_string(),
        total: total_revenue,
        cogs: total_cogs,
        payment_type: req.payment_type,
        created_at: now,
    })
}

/// Sales newest first, optionally bounded to a time range.
pub fn list_sales(
    db: &DbState,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<Vec<Sale>> {
    let conn = db.lock()?;
    let mut sql = String::from(
        "SELECT id, session_id, user_id, total, cogs, payment_type, created_at FROM sales",
    );
    let mut bounds = Vec::new();
    if from.is_some() {
        bounds.push("created_at >= ?1");
    }
    if to.is_some() {
        bounds.push(if from.is_some() {
            "created_at <= ?2"
        } else {
            "created_at <= ?1"
        });
    }
    if !bounds.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&bounds.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at DESC, rowid DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = match (from, to) {
        (Some(f), Some(t)) => stmt
            .query_map(params![f.to_rfc3339(), t.to_rfc3339()], map_sale)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
        (Some(f), None) => stmt
            .query_map(params![f.to_rfc3339()], map_sale)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
        (None, Some(t)) => stmt
            .query_map(params![t.to_rfc3339()], map_sale)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
        (None, None) => stmt
            .query_map([], map_sale)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
    };
    Ok(rows)
}

/// Line items of one sale.
pub fn sale_items(db: &DbState, sale_id: &str) -> Result<Vec<SaleItem>> {
    let conn = db.lock()?;
    let exists: Option<String> = conn
        .query_row("SELECT id FROM sales WHERE id = ?1", params![sale_id], |row| {
            row.get(0)
        })
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    if exists.is_none() {
        return Err(StoreError::not_found("sale", sale_id));
    }

    let mut stmt = conn.prepare(
        "SELECT id, sale_id, product_id, qty, unit_price, line_total
         FROM sale_items WHERE sale_id = ?1 ORDER BY rowid ASC",
    )?;
    let rows = stmt.query_map(params![sale_id], |row| {
        Ok(SaleItem {
            id: row.get(0)?,
            sale_id: row.get(1)?,
            product_id: row.get(2)?,
            qty: row.get(3)?,
            unit_price: row.get(4)?,
            line_total: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn map_sale(row: &rusqlite::Row<'_>) -> rusqlite::Result<Sale> {
    Ok(Sale {
        id: row.get(0)?,
        session_id: row.get(1)?,
        user_id: row.get(2)?,
        total: row.get(3)?,
        cogs: row.get(4)?,
        payment_type: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn require_session(conn: &Connection, id: &str) -> Result<()> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM cash_sessions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    match found {
        Some(_) => Ok(()),
        None => Err(StoreError::not_found("session", id)),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
