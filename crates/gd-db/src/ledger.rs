//! Needed-vs-purchased ledger.
//!
//! A need is a `drive_items` or `child_items` row. Its purchased quantity is
//! never stored; it is the sum of `order_items` referencing it.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use gd_reconcile::NeedLedger;
use gd_schemas::{NeedRef, ProductRef, Store};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::need_column;

/// A need joined with its item, drive and (for child needs) child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeedRow {
    pub need: NeedRef,
    pub requested: i64,
    pub drive_id: Uuid,
    pub drive_name: String,
    pub child_id: Option<Uuid>,
    pub child_name: Option<String>,
    pub item_id: Uuid,
    pub product: ProductRef,
    pub item_name: String,
    pub image_url: Option<String>,
    pub price_cents: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeedAvailability {
    pub need: NeedRef,
    pub requested: i64,
    pub purchased: i64,
    pub remaining: i64,
}

impl NeedAvailability {
    pub fn from_ledger(need: NeedRef, l: NeedLedger) -> Self {
        Self {
            need,
            requested: l.requested,
            purchased: l.purchased,
            remaining: l.remaining(),
        }
    }
}

const DRIVE_NEED_SELECT: &str = r#"
    select
      di.drive_item_id as need_id,
      di.quantity::bigint as requested,
      d.drive_id,
      d.name as drive_name,
      null::uuid as child_id,
      null::text as child_name,
      i.item_id,
      i.store_key,
      i.product_id,
      i.name as item_name,
      i.image_url,
      i.price_cents
    from drive_items di
    join drives d on d.drive_id = di.drive_id
    join items i on i.item_id = di.item_id
    where di.drive_item_id = $1
"#;

const CHILD_NEED_SELECT: &str = r#"
    select
      ci.child_item_id as need_id,
      ci.quantity::bigint as requested,
      d.drive_id,
      d.name as drive_name,
      c.child_id,
      c.display_name as child_name,
      i.item_id,
      i.store_key,
      i.product_id,
      i.name as item_name,
      i.image_url,
      i.price_cents
    from child_items ci
    join children c on c.child_id = ci.child_id
    join drives d on d.drive_id = c.drive_id
    join items i on i.item_id = ci.item_id
    where ci.child_item_id = $1
"#;

fn need_row_from_pg(need: NeedRef, row: &PgRow) -> Result<NeedRow> {
    let store_key: String = row.try_get("store_key")?;
    let store =
        Store::from_key(&store_key).ok_or_else(|| anyhow!("item has empty store_key: {need}"))?;
    Ok(NeedRow {
        need,
        requested: row.try_get("requested")?,
        drive_id: row.try_get("drive_id")?,
        drive_name: row.try_get("drive_name")?,
        child_id: row.try_get("child_id")?,
        child_name: row.try_get("child_name")?,
        item_id: row.try_get("item_id")?,
        product: ProductRef::new(store, row.try_get::<String, _>("product_id")?),
        item_name: row.try_get("item_name")?,
        image_url: row.try_get("image_url")?,
        price_cents: row.try_get("price_cents")?,
    })
}

async fn select_need(conn: &mut PgConnection, need: NeedRef, for_update: bool) -> Result<Option<NeedRow>> {
    let sql = match (need, for_update) {
        (NeedRef::Drive(_), false) => DRIVE_NEED_SELECT.to_string(),
        (NeedRef::Drive(_), true) => format!("{DRIVE_NEED_SELECT} for update of di"),
        (NeedRef::Child(_), false) => CHILD_NEED_SELECT.to_string(),
        (NeedRef::Child(_), true) => format!("{CHILD_NEED_SELECT} for update of ci"),
    };

    let row = sqlx::query(&sql)
        .bind(need.id())
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("select need failed: {need}"))?;

    row.map(|r| need_row_from_pg(need, &r)).transpose()
}

/// Read a need without locking.
pub async fn fetch_need(conn: &mut PgConnection, need: NeedRef) -> Result<Option<NeedRow>> {
    select_need(conn, need, false).await
}

/// `SELECT … FOR UPDATE` on the need row. Every writer that can change the
/// purchased or in-cart quantity of a need takes this lock first, which
/// serializes concurrent add-to-cart and finalize calls for the same need.
pub async fn lock_need(conn: &mut PgConnection, need: NeedRef) -> Result<Option<NeedRow>> {
    select_need(conn, need, true).await
}

/// Sum of order line quantities referencing `need`.
pub async fn purchased_quantity(conn: &mut PgConnection, need: NeedRef) -> Result<i64> {
    let sql = format!(
        "select coalesce(sum(quantity), 0)::bigint from order_items where {} = $1",
        need_column(&need)
    );
    let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(&sql)
        .bind(need.id())
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("purchased_quantity failed: {need}"))?;
    Ok(n)
}

/// Ledger for an already-loaded need row.
pub async fn ledger_for_row(conn: &mut PgConnection, row: &NeedRow) -> Result<NeedLedger> {
    let purchased = purchased_quantity(conn, row.need).await?;
    Ok(NeedLedger::new(row.requested, purchased))
}

/// `None` when the need does not exist.
pub async fn need_ledger(conn: &mut PgConnection, need: NeedRef) -> Result<Option<NeedLedger>> {
    let Some(row) = fetch_need(conn, need).await? else {
        return Ok(None);
    };
    Ok(Some(ledger_for_row(conn, &row).await?))
}

/// Ledgers for a set of needs. Needs that no longer exist are omitted.
pub async fn need_ledgers(
    conn: &mut PgConnection,
    needs: &[NeedRef],
) -> Result<BTreeMap<NeedRef, NeedLedger>> {
    let mut out = BTreeMap::new();
    for need in needs {
        if let Some(l) = need_ledger(conn, *need).await? {
            out.insert(*need, l);
        }
    }
    Ok(out)
}

/// Read-only availability for status endpoints.
pub async fn need_availability(pool: &PgPool, need: NeedRef) -> Result<Option<NeedAvailability>> {
    let mut conn = pool.acquire().await.context("acquire connection failed")?;
    let ledger = need_ledger(&mut conn, need).await?;
    Ok(ledger.map(|l| NeedAvailability::from_ledger(need, l)))
}
