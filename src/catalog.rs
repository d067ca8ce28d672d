//! Catalog management: ingredients, suppliers, products, and recipes.
//!
//! These are the read dependencies of the sale workflow. Ingredients are
//! never deleted once created; lots, recipes, and ledger rows reference
//! them. Changing a recipe does not touch past sales; COGS is computed and
//! frozen at sale time.

use chrono::Utc;
use rusqlite::{params, Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::db::DbState;
use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// Ingredients
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: String,
    pub name: String,
    pub unit: String,
    pub low_stock_level: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewIngredient {
    pub name: String,
    /// Free-form unit of measure, e.g. "g", "kg", "ml", "unit".
    pub unit: String,
    pub low_stock_level: Option<f64>,
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateIngredient {
    pub name: Option<String>,
    pub unit: Option<String>,
    pub low_stock_level: Option<f64>,
}

pub fn create_ingredient(db: &DbState, req: &NewIngredient) -> Result<Ingredient> {
    if req.name.trim().is_empty() {
        return Err(StoreError::Validation("ingredient name is required".into()));
    }
    if req.unit.trim().is_empty() {
        return Err(StoreError::Validation("ingredient unit is required".into()));
    }
    if let Some(level) = req.low_stock_level {
        if level < 0.0 {
            return Err(StoreError::Validation(format!(
                "low stock level must not be negative, got {level}"
            )));
        }
    }

    let conn = db.lock()?;
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO ingredients (id, name, unit, low_stock_level, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![id, req.name.trim(), req.unit.trim(), req.low_stock_level, now],
    )?;

    info!(ingredient_id = %id, name = %req.name, "Ingredient created");
    get_ingredient_row(&conn, &id)
}

pub fn update_ingredient(db: &DbState, id: &str, req: &UpdateIngredient) -> Result<Ingredient> {
    let conn = db.lock()?;
    let existing = get_ingredient_row(&conn, id)?;

    let name = req.name.clone().unwrap_or(existing.name);
    let unit = req.unit.clone().unwrap_or(existing.unit);
    let low_stock_level = req.low_stock_level.or(existing.low_stock_level);
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "UPDATE ingredients SET name = ?1, unit = ?2, low_stock_level = ?3, updated_at = ?4
         WHERE id = ?5",
        params![name, unit, low_stock_level, now, id],
    )?;

    get_ingredient_row(&conn, id)
}

pub fn get_ingredient(db: &DbState, id: &str) -> Result<Ingredient> {
    let conn = db.lock()?;
    get_ingredient_row(&conn, id)
}

pub fn list_ingredients(db: &DbState) -> Result<Vec<Ingredient>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(
        "SELECT id, name, unit, low_stock_level, created_at, updated_at
         FROM ingredients ORDER BY name ASC",
    )?;
    let rows = stmt.query_map([], map_ingredient)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn map_ingredient(row: &rusqlite::Row<'_>) -> rusqlite::Result<Ingredient> {
    Ok(Ingredient {
        id: row.get(0)?,
        name: row.get(1)?,
        unit: row.get(2)?,
        low_stock_level: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Fetch an ingredient on the caller's connection, `NotFound` if missing.
/// Workflows use this inside their transactions before touching stock.
pub(crate) fn get_ingredient_row(conn: &Connection, id: &str) -> Result<Ingredient> {
    conn.query_row(
        "SELECT id, name, unit, low_stock_level, created_at, updated_at
         FROM ingredients WHERE id = ?1",
        params![id],
        map_ingredient,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::not_found("ingredient", id),
        other => other.into(),
    })
}

// ---------------------------------------------------------------------------
// Suppliers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Supplier {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSupplier {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

pub fn create_supplier(db: &DbState, req: &NewSupplier) -> Result<Supplier> {
    if req.name.trim().is_empty() {
        return Err(StoreError::Validation("supplier name is required".into()));
    }

    let conn = db.lock()?;
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO suppliers (id, name, phone, email, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![id, req.name.trim(), req.phone, req.email, now],
    )?;

    Ok(Supplier {
        id,
        name: req.name.trim().to_string(),
        phone: req.phone.clone(),
        email: req.email.clone(),
        created_at: now.clone(),
        updated_at: now,
    })
}

pub fn list_suppliers(db: &DbState) -> Result<Vec<Supplier>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(
        "SELECT id, name, phone, email, created_at, updated_at
         FROM suppliers ORDER BY name ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Supplier {
            id: row.get(0)?,
            name: row.get(1)?,
            phone: row.get(2)?,
            email: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Existence check for a purchase's optional supplier reference.
pub(crate) fn require_supplier(conn: &Connection, id: &str) -> Result<()> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM suppliers WHERE id = ?1",
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
        None => Err(StoreError::not_found("supplier", id)),
    }
}

// ---------------------------------------------------------------------------
// Products and recipes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub sku: String,
    pub price: f64,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// One bill-of-materials line: quantity of an ingredient needed per single
/// unit of product sold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeItem {
    pub id: String,
    pub product_id: String,
    pub ingredient_id: String,
    pub quantity: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecipeLine {
    pub ingredient_id: String,
    pub quantity: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub sku: String,
    pub price: f64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub recipe: Vec<RecipeLine>,
}

fn default_active() -> bool {
    true
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProduct {
    pub name: Option<String>,
    pub sku: Option<String>,
    pub price: Option<f64>,
    pub active: Option<bool>,
}

/// Create a product, optionally with its recipe, as one transaction.
/// A bad recipe line (unknown ingredient, non-positive quantity) rolls the
/// product back too.
pub fn create_product(db: &DbState, req: &NewProduct) -> Result<Product> {
    if req.name.trim().is_empty() {
        return Err(StoreError::Validation("product name is required".into()));
    }
    if req.sku.trim().is_empty() {
        return Err(StoreError::Validation("product sku is required".into()));
    }
    if req.price < 0.0 {
        return Err(StoreError::Validation(format!(
            "product price must not be negative, got {}",
            req.price
        )));
    }

    let mut conn = db.lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO products (id, name, sku, price, active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![id, req.name.trim(), req.sku.trim(), req.price, req.active, now],
    )?;

    insert_recipe_lines(&tx, &id, &req.recipe)?;

    tx.commit()?;
    info!(product_id = %id, name = %req.name, recipe_lines = req.recipe.len(), "Product created");

    get_product_row(&conn, &id)
}

pub fn update_product(db: &DbState, id: &str, req: &UpdateProduct) -> Result<Product> {
    let conn = db.lock()?;
    let existing = get_product_row(&conn, id)?;

    let name = req.name.clone().unwrap_or(existing.name);
    let sku = req.sku.clone().unwrap_or(existing.sku);
    let price = req.price.unwrap_or(existing.price);
    let active = req.active.unwrap_or(existing.active);
    if price < 0.0 {
        return Err(StoreError::Validation(format!(
            "product price must not be negative, got {price}"
        )));
    }
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "UPDATE products SET name = ?1, sku = ?2, price = ?3, active = ?4, updated_at = ?5
         WHERE id = ?6",
        params![name, sku, price, active, now, id],
    )?;

    get_product_row(&conn, id)
}

pub fn get_product(db: &DbState, id: &str) -> Result<Product> {
    let conn = db.lock()?;
    get_product_row(&conn, id)
}

pub fn list_products(db: &DbState) -> Result<Vec<Product>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(
        "SELECT id, name, sku, price, active, created_at, updated_at
         FROM products ORDER BY name ASC",
    )?;
    let rows = stmt.query_map([], map_product)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Replace a product's recipe wholesale. Past sales keep the COGS they were
/// computed with.
pub fn set_recipe(db: &DbState, product_id: &str, lines: &[RecipeLine]) -> Result<Vec<RecipeItem>> {
    let mut conn = db.lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    get_product_row(&tx, product_id)?;
    tx.execute(
        "DELETE FROM recipe_items WHERE product_id = ?1",
        params![product_id],
    )?;
    insert_recipe_lines(&tx, product_id, lines)?;

    tx.commit()?;

    recipe_rows(&conn, product_id)
}

pub fn recipe_for_product(db: &DbState, product_id: &str) -> Result<Vec<RecipeItem>> {
    let conn = db.lock()?;
    get_product_row(&conn, product_id)?;
    recipe_rows(&conn, product_id)
}

fn insert_recipe_lines(conn: &Connection, product_id: &str, lines: &[RecipeLine]) -> Result<()> {
    for line in lines {
        if line.quantity <= 0.0 {
            return Err(StoreError::Validation(format!(
                "recipe quantity must be positive, got {}",
                line.quantity
            )));
        }
        get_ingredient_row(conn, &line.ingredient_id)?;
        conn.execute(
            "INSERT INTO recipe_items (id, product_id, ingredient_id, quantity)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                Uuid::new_v4().to_string(),
                product_id,
                line.ingredient_id,
                line.quantity
            ],
        )?;
    }
    Ok(())
}

fn map_product(row: &rusqlite::Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        sku: row.get(2)?,
        price: row.get(3)?,
        active: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Fetch a product on the caller's connection, `NotFound` if missing.
pub(crate) fn get_product_row(conn: &Connection, id: &str) -> Result<Product> {
    conn.query_row(
        "SELECT id, name, sku, price, active, created_at, updated_at
         FROM products WHERE id = ?1",
        params![id],
        map_product,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::not_found("product", id),
        other => other.into(),
    })
}

/// Recipe rows for a product on the caller's connection.
pub(crate) fn recipe_rows(conn: &Connection, product_id: &str) -> Result<Vec<RecipeItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, product_id, ingredient_id, quantity
         FROM recipe_items WHERE product_id = ?1 ORDER BY rowid ASC",
    )?;
    let rows = stmt.query_map(params![product_id], |row| {
        Ok(RecipeItem {
            id: row.get(0)?,
            product_id: row.get(1)?,
            ingredient_id: row.get(2)?,
            quantity: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

// ===========================================================================
// Tests
// ===========================================================================
