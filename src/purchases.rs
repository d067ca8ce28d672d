//! Purchase recording.
//!
//! A purchase is a header plus line items; every line deterministically
//! produces exactly one inventory lot at unit cost = total cost / quantity
//! and one PURCHASE ledger entry referencing the purchase. The header, the
//! items, the lots, and the ledger entries commit as one transaction; a
//! single bad line rolls back the entire purchase.

use chrono::Utc;
use rusqlite::{params, Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::catalog;
use crate::db::DbState;
use crate::error::{Result, StoreError};
use crate::ledger::{self, MovementKind};
use crate::lots;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub id: String,
    pub supplier_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseItem {
    pub id: String,
    pub purchase_id: String,
    pub ingredient_id: String,
    pub quantity: f64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPurchaseItem {
    pub ingredient_id: String,
    pub quantity: f64,
    /// Total paid for this line's quantity, not per unit.
    pub total_cost: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPurchase {
    pub supplier_id: Option<String>,
    pub notes: Option<String>,
    pub items: Vec<NewPurchaseItem>,
}

/// Record a purchase and stock its lots.
pub fn create_purchase(db: &DbState, req: &NewPurchase) -> Result<Purchase> {
    if req.items.is_empty() {
        return Err(StoreError::Validation(
            "a purchase needs at least one item".into(),
        ));
    }
    for item in &req.items {
        if item.quantity <= 0.0 {
            return Err(StoreError::Validation(format!(
                "purchase quantity must be positive, got {}",
                item.quantity
            )));
        }
        if item.total_cost < 0.0 {
            return Err(StoreError::Validation(format!(
                "purchase cost must not be negative, got {}",
                item.total_cost
            )));
        }
    }

    let mut conn = db.lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let purchase_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    if let Some(ref supplier_id) = req.supplier_id {
        catalog::require_supplier(&tx, supplier_id)?;
    }

    tx.execute(
        "INSERT INTO purchases (id, supplier_id, notes, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![purchase_id, req.supplier_id, req.notes, now],
    )?;

    for item in &req.items {
        catalog::get_ingredient_row(&tx, &item.ingredient_id)?;
        let unit_cost = item.total_cost / item.quantity;

        tx.execute(
            "INSERT INTO purchase_items (id, purchase_id, ingredient_id, quantity, total_cost)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Uuid::new_v4().to_string(),
                purchase_id,
                item.ingredient_id,
                item.quantity,
                item.total_cost
            ],
        )?;

        lots::insert_lot(&tx, &item.ingredient_id, item.quantity, unit_cost)?;
        ledger::record_movement(
            &tx,
            MovementKind::Purchase,
            &item.ingredient_id,
            item.quantity,
            Some(&purchase_id),
            None,
            &now,
        )?;
    }

    tx.commit()?;

    info!(
        purchase_id = %purchase_id,
        items = req.items.len(),
        "Purchase recorded"
    );

    Ok(Purchase {
        id: purchase_id,
        supplier_id: req.supplier_id.clone(),
        notes: req.notes.clone(),
        created_at: now,
    })
}

/// All purchases, newest first.
pub fn list_purchases(db: &DbState) -> Result<Vec<Purchase>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(
        "SELECT id, supplier_id, notes, created_at
         FROM purchases ORDER BY created_at DESC, rowid DESC",
    )?;
    let rows = stmt.query_map([], map_purchase)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Line items of one purchase.
pub fn purchase_items(db: &DbState, purchase_id: &str) -> Result<Vec<PurchaseItem>> {
    let conn = db.lock()?;
    require_purchase(&conn, purchase_id)?;

    let mut stmt = conn.prepare(
        "SELECT id, purchase_id, ingredient_id, quantity, total_cost
         FROM purchase_items WHERE purchase_id = ?1 ORDER BY rowid ASC",
    )?;
    let rows = stmt.query_map(params![purchase_id], |row| {
        Ok(PurchaseItem {
            id: row.get(0)?,
            purchase_id: row.get(1)?,
            ingredient_id: row.get(2)?,
            quantity: row.get(3)?,
            total_cost: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn map_purchase(row: &rusqlite::Row<'_>) -> rusqlite::Result<Purchase> {
    Ok(Purchase {
        id: row.get(0)?,
        supplier_id: row.get(1)?,
        notes: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn require_purchase(conn: &Connection, id: &str) -> Result<()> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM purchases WHERE id = ?1",
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
        None => Err(StoreError::not_found("purchase", id)),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::catalog::{create_ingredient, NewIngredient};

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

    fn one_item(ingredient_id: &str, quantity: f64, total_cost: f64) -> NewPurchase {
        NewPurchase {
            supplier_id: None,
            notes: None,
            items: vec![NewPurchaseItem {
                ingredient_id: ingredient_id.to_string(),
                quantity,
                total_cost,
            }],
        }
    }

    #[test]
    fn test_purchase_creates_lot_at_derived_unit_cost() {
        let state = db::test_state();
        let flour = seed_ingredient(&state, "Flour");

        let purchase = create_purchase(&state, &one_item(&flour, 10.0, 50.0)).unwrap();

        let conn = state.lock().unwrap();
        let lots = crate::lots::lots_for_ingredient(&conn, &flour).unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].quantity, 10.0);
        assert_eq!(lots[0].unit_cost, 5.0);

        let movements = crate::ledger::movements(&conn, Some(&flour)).unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].kind, MovementKind::Purchase);
        assert_eq!(movements[0].quantity, 10.0);
        assert_eq!(movements[0].reference.as_deref(), Some(purchase.id.as_str()));

        // Ledger/lot consistency
        assert_eq!(
            crate::ledger::ledger_balance(&conn, &flour).unwrap(),
            crate::lots::stock_on_hand(&conn, &flour).unwrap()
        );
    }

    #[test]
    fn test_purchase_is_all_or_nothing() {
        let state = db::test_state();
        let flour = seed_ingredient(&state, "Flour");

        let req = NewPurchase {
            supplier_id: None,
            notes: None,
            items: vec![
                NewPurchaseItem {
                    ingredient_id: flour.clone(),
                    quantity: 10.0,
                    total_cost: 50.0,
                },
                NewPurchaseItem {
                    ingredient_id: "missing-ingredient".to_string(),
                    quantity: 5.0,
                    total_cost: 10.0,
                },
            ],
        };
        let err = create_purchase(&state, &req).unwrap_err();
        assert!(
            matches!(err, StoreError::NotFound { entity: "ingredient", .. }),
            "got {err:?}"
        );

        // Nothing from the first item may have been committed
        {
            let conn = state.lock().unwrap();
            assert!(crate::lots::lots_for_ingredient(&conn, &flour).unwrap().is_empty());
            assert!(crate::ledger::movements(&conn, None).unwrap().is_empty());
        }
        assert!(list_purchases(&state).unwrap().is_empty());
    }

    #[test]
    fn test_purchase_rejects_zero_quantity() {
        let state = db::test_state();
        let flour = seed_ingredient(&state, "Flour");

        // Zero quantity would divide by zero deriving the unit cost
        let err = create_purchase(&state, &one_item(&flour, 0.0, 50.0)).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)), "got {err:?}");
    }

    #[test]
    fn test_purchase_rejects_empty_items() {
        let state = db::test_state();
        let err = create_purchase(
            &state,
            &NewPurchase {
                supplier_id: None,
                notes: None,
                items: vec![],
            },
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)), "got {err:?}");
    }

    #[test]
    fn test_purchase_with_unknown_supplier_is_not_found() {
        let state = db::test_state();
        let flour = seed_ingredient(&state, "Flour");

        let mut req = one_item(&flour, 10.0, 50.0);
        req.supplier_id = Some("missing-supplier".to_string());
        let err = create_purchase(&state, &req).unwrap_err();
        assert!(
            matches!(err, StoreError::NotFound { entity: "supplier", .. }),
            "got {err:?}"
        );
    }

    #[test]
    fn test_zero_cost_purchase_is_allowed() {
        // Donated goods: quantity in, no cost
        let state = db::test_state();
        let flour = seed_ingredient(&state, "Flour");

        create_purchase(&state, &one_item(&flour, 3.0, 0.0)).unwrap();

        let conn = state.lock().unwrap();
        let lots = crate::lots::lots_for_ingredient(&conn, &flour).unwrap();
        assert_eq!(lots[0].unit_cost, 0.0);
    }

    #[test]
    fn test_list_and_items_round_trip() {
        let state = db::test_state();
        let flour = seed_ingredient(&state, "Flour");
        let sugar = seed_ingredient(&state, "Sugar");

        let req = NewPurchase {
            supplier_id: None,
            notes: Some("weekly order".to_string()),
            items: vec![
                NewPurchaseItem {
                    ingredient_id: flour.clone(),
                    quantity: 10.0,
                    total_cost: 50.0,
                },
                NewPurchaseItem {
                    ingredient_id: sugar.clone(),
                    quantity: 2.0,
                    total_cost: 6.0,
                },
            ],
        };
        let created = create_purchase(&state, &req).unwrap();

        let all = list_purchases(&state).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].notes.as_deref(), Some("weekly order"));

        let items = purchase_items(&state, &created.id).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].ingredient_id, flour);
        assert_eq!(items[1].total_cost, 6.0);

        let err = purchase_items(&state, "missing").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
