//! Local SQLite database layer for the inventory ledger.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations and the shared
//! connection state that every workflow locks before writing. Multi-step
//! workflows open IMMEDIATE transactions on this connection so the FIFO
//! read-then-decrement sequence can never interleave with another writer.

use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::error::{Result, StoreError};

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Lock the connection for a unit of work.
    ///
    /// A poisoned mutex means a writer panicked mid-operation; surface that
    /// as an invariant failure instead of unwrapping.
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Invariant("database mutex poisoned".to_string()))
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Initialize the database at `{data_dir}/stockpot.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState> {
    fs::create_dir_all(data_dir)?;

    let db_path = data_dir.join("stockpot.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
pub(crate) fn run_migrations(conn: &Connection) -> Result<()> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Migration v1: catalog and inventory core.
///
/// Ingredients are never deleted (lots, recipes, and movements reference
/// them), so there is no ON DELETE action anywhere in this schema.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- ingredients
        CREATE TABLE IF NOT EXISTS ingredients (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            unit TEXT NOT NULL,
            low_stock_level REAL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- suppliers
        CREATE TABLE IF NOT EXISTS suppliers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            phone TEXT,
            email TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- products
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            sku TEXT NOT NULL UNIQUE,
            price REAL NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- recipe items (bill of materials, per one unit of product sold)
        CREATE TABLE IF NOT EXISTS recipe_items (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL REFERENCES products(id),
            ingredient_id TEXT NOT NULL REFERENCES ingredients(id),
            quantity REAL NOT NULL
        );

        -- inventory lots; quantity only ever decreases after creation and
        -- zero rows are kept for audit
        CREATE TABLE IF NOT EXISTS inventory_lots (
            id TEXT PRIMARY KEY,
            ingredient_id TEXT NOT NULL REFERENCES ingredients(id),
            quantity REAL NOT NULL,
            unit_cost REAL NOT NULL,
            purchased_at TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- stock movements (append-only audit trail)
        CREATE TABLE IF NOT EXISTS stock_movements (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            ingredient_id TEXT NOT NULL REFERENCES ingredients(id),
            quantity REAL NOT NULL,
            reference TEXT,
            note TEXT,
            created_at TEXT NOT NULL
        );

        -- purchases
        CREATE TABLE IF NOT EXISTS purchases (
            id TEXT PRIMARY KEY,
            supplier_id TEXT REFERENCES suppliers(id),
            notes TEXT,
            created_at TEXT NOT NULL
        );

        -- purchase items
        CREATE TABLE IF NOT EXISTS purchase_items (
            id TEXT PRIMARY KEY,
            purchase_id TEXT NOT NULL REFERENCES purchases(id),
            ingredient_id TEXT NOT NULL REFERENCES ingredients(id),
            quantity REAL NOT NULL,
            total_cost REAL NOT NULL
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_lots_ingredient_fifo
            ON inventory_lots(ingredient_id, purchased_at);
        CREATE INDEX IF NOT EXISTS idx_movements_ingredient
            ON stock_movements(ingredient_id);
        CREATE INDEX IF NOT EXISTS idx_movements_created_at
            ON stock_movements(created_at);
        CREATE INDEX IF NOT EXISTS idx_recipe_items_product
            ON recipe_items(product_id);
        ",
    )?;

    conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
    info!("Migration v1 applied");
    Ok(())
}

/// Migration v2: sales, cash sessions, expenses.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- cash sessions; at most one row with closed_at IS NULL, enforced by
        -- the open workflow inside its write transaction
        CREATE TABLE IF NOT EXISTS cash_sessions (
            id TEXT PRIMARY KEY,
            opened_at TEXT NOT NULL,
            opened_by TEXT NOT NULL,
            closed_at TEXT,
            closed_by TEXT,
            opening_float REAL NOT NULL DEFAULT 0,
            closing_float REAL,
            notes TEXT
        );

        -- sales; total and cogs are computed by the sale workflow
        CREATE TABLE IF NOT EXISTS sales (
            id TEXT PRIMARY KEY,
            session_id TEXT REFERENCES cash_sessions(id),
            user_id TEXT NOT NULL,
            total REAL NOT NULL,
            cogs REAL NOT NULL,
            payment_type TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        -- sale items (unit_price is a snapshot taken at sale time)
        CREATE TABLE IF NOT EXISTS sale_items (
            id TEXT PRIMARY KEY,
            sale_id TEXT NOT NULL REFERENCES sales(id),
            product_id TEXT NOT NULL REFERENCES products(id),
            qty INTEGER NOT NULL,
            unit_price REAL NOT NULL,
            line_total REAL NOT NULL
        );

        -- expenses (reporting surface only, independent of the ledger)
        CREATE TABLE IF NOT EXISTS expenses (
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            amount REAL NOT NULL,
            paid_via TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_sales_created_at ON sales(created_at);
        CREATE INDEX IF NOT EXISTS idx_sales_session ON sales(session_id);
        CREATE INDEX IF NOT EXISTS idx_sale_items_sale ON sale_items(sale_id);
        ",
    )?;

    conn.execute("INSERT INTO schema_version (version) VALUES (2)", [])?;
    info!("Migration v2 applied");
    Ok(())
}

/// Migration v3: per-session declared inventory counts for variance display.
fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS session_inventory_snapshots (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES cash_sessions(id),
            ingredient_id TEXT NOT NULL REFERENCES ingredients(id),
            quantity REAL NOT NULL,
            snapshot_type TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_session_snapshots_session
            ON session_inventory_snapshots(session_id);
        ",
    )?;

    conn.execute("INSERT INTO schema_version (version) VALUES (3)", [])?;
    info!("Migration v3 applied");
    Ok(())
}

/// Test-only helper so other modules' tests can migrate an in-memory db.
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

/// Build an in-memory `DbState` with pragmas and the full schema applied.
/// Shared by the test modules across the crate.
#[cfg(test)]
pub fn test_state() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    run_migrations_for_test(&conn);
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
