//! Local cart mirror: `carts` and `cart_contents`.
//!
//! The mirror records what is believed to be in the remote cart and is the
//! only place that links remote lines to needs.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use gd_reconcile::{LocalCartMirror, MirrorLine};
use gd_schemas::{NeedRef, ProductRef, Store};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use uuid::Uuid;

use crate::{is_unique_constraint_violation, need_column, need_columns, need_from_columns};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CartStatus {
    Open,
    Submitted,
    Expired,
}

impl CartStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CartStatus::Open => "OPEN",
            CartStatus::Submitted => "SUBMITTED",
            CartStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "OPEN" => Ok(CartStatus::Open),
            "SUBMITTED" => Ok(CartStatus::Submitted),
            "EXPIRED" => Ok(CartStatus::Expired),
            other => Err(anyhow!("invalid cart status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartRow {
    pub cart_id: Uuid,
    pub donor_id: String,
    pub remote_cart_id: String,
    pub status: CartStatus,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

fn cart_row_from_pg(row: &PgRow) -> Result<CartRow> {
    Ok(CartRow {
        cart_id: row.try_get("cart_id")?,
        donor_id: row.try_get("donor_id")?,
        remote_cart_id: row.try_get("remote_cart_id")?,
        status: CartStatus::parse(&row.try_get::<String, _>("status")?)?,
        created_at_utc: row.try_get("created_at_utc")?,
        updated_at_utc: row.try_get("updated_at_utc")?,
    })
}

const CART_COLUMNS: &str =
    "cart_id, donor_id, remote_cart_id, status, created_at_utc, updated_at_utc";

async fn select_open_cart(
    conn: &mut PgConnection,
    donor_id: &str,
    for_update: bool,
) -> Result<Option<CartRow>> {
    let sql = format!(
        "select {CART_COLUMNS} from carts where donor_id = $1 and status = 'OPEN'{}",
        if for_update { " for update" } else { "" }
    );
    let row = sqlx::query(&sql)
        .bind(donor_id)
        .fetch_optional(&mut *conn)
        .await
        .context("select open cart failed")?;
    row.as_ref().map(cart_row_from_pg).transpose()
}

pub async fn open_cart_for_donor(conn: &mut PgConnection, donor_id: &str) -> Result<Option<CartRow>> {
    select_open_cart(conn, donor_id, false).await
}

/// Lock the donor's open cart row. Serializes mutations of one donor's cart.
pub async fn lock_open_cart_for_donor(
    conn: &mut PgConnection,
    donor_id: &str,
) -> Result<Option<CartRow>> {
    select_open_cart(conn, donor_id, true).await
}

/// `SELECT … FOR UPDATE` on a cart regardless of status.
pub async fn lock_cart(conn: &mut PgConnection, cart_id: Uuid) -> Result<Option<CartRow>> {
    let sql = format!("select {CART_COLUMNS} from carts where cart_id = $1 for update");
    let row = sqlx::query(&sql)
        .bind(cart_id)
        .fetch_optional(&mut *conn)
        .await
        .context("lock_cart failed")?;
    row.as_ref().map(cart_row_from_pg).transpose()
}

pub async fn cart_by_remote_id(conn: &mut PgConnection, remote_cart_id: &str) -> Result<Option<CartRow>> {
    let sql = format!("select {CART_COLUMNS} from carts where remote_cart_id = $1");
    let row = sqlx::query(&sql)
        .bind(remote_cart_id)
        .fetch_optional(&mut *conn)
        .await
        .context("cart_by_remote_id failed")?;
    row.as_ref().map(cart_row_from_pg).transpose()
}

/// Insert a new OPEN cart. Fails with a recognizable message when the donor
/// already has one (`uq_carts_open_per_donor`).
pub async fn insert_cart(
    conn: &mut PgConnection,
    donor_id: &str,
    remote_cart_id: &str,
) -> Result<CartRow> {
    let sql = format!(
        "insert into carts (cart_id, donor_id, remote_cart_id, status) \
         values ($1, $2, $3, 'OPEN') returning {CART_COLUMNS}"
    );
    let res = sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(donor_id)
        .bind(remote_cart_id)
        .fetch_one(&mut *conn)
        .await;

    match res {
        Ok(row) => cart_row_from_pg(&row),
        Err(e) if is_unique_constraint_violation(&e, "uq_carts_open_per_donor") => {
            Err(anyhow!("donor already has an open cart"))
        }
        Err(e) => Err(anyhow::Error::new(e).context("insert_cart failed")),
    }
}

/// Point a cart at a freshly created remote cart (after remote expiry).
pub async fn replace_remote_cart_id(
    conn: &mut PgConnection,
    cart_id: Uuid,
    remote_cart_id: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        update carts
        set remote_cart_id = $2,
            updated_at_utc = now()
        where cart_id = $1
        "#,
    )
    .bind(cart_id)
    .bind(remote_cart_id)
    .execute(&mut *conn)
    .await
    .context("replace_remote_cart_id failed")?;
    Ok(())
}

pub async fn mark_cart_status(conn: &mut PgConnection, cart_id: Uuid, status: CartStatus) -> Result<()> {
    sqlx::query(
        r#"
        update carts
        set status = $2,
            updated_at_utc = now()
        where cart_id = $1
        "#,
    )
    .bind(cart_id)
    .bind(status.as_str())
    .execute(&mut *conn)
    .await
    .context("mark_cart_status failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// cart_contents
// ---------------------------------------------------------------------------

/// Mirror line joined with catalog display metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineRow {
    pub cart_content_id: Uuid,
    pub need: NeedRef,
    pub quantity: i64,
    pub product: ProductRef,
    pub item_name: String,
    pub image_url: Option<String>,
    pub price_cents: Option<i64>,
}

impl CartLineRow {
    pub fn to_mirror_line(&self) -> MirrorLine {
        MirrorLine {
            need: self.need,
            product: self.product.clone(),
            quantity: self.quantity,
        }
    }
}

pub fn mirror_from_lines(lines: &[CartLineRow]) -> LocalCartMirror {
    LocalCartMirror::new(lines.iter().map(CartLineRow::to_mirror_line).collect())
}

fn cart_line_from_pg(row: &PgRow) -> Result<CartLineRow> {
    let need = need_from_columns(row.try_get("drive_item_id")?, row.try_get("child_item_id")?)?;
    let store_key: String = row.try_get("store_key")?;
    let store = Store::from_key(&store_key).ok_or_else(|| anyhow!("item has empty store_key"))?;
    Ok(CartLineRow {
        cart_content_id: row.try_get("cart_content_id")?,
        need,
        quantity: row.try_get("quantity")?,
        product: ProductRef::new(store, row.try_get::<String, _>("product_id")?),
        item_name: row.try_get("item_name")?,
        image_url: row.try_get("image_url")?,
        price_cents: row.try_get("price_cents")?,
    })
}

pub async fn cart_lines(conn: &mut PgConnection, cart_id: Uuid) -> Result<Vec<CartLineRow>> {
    let rows = sqlx::query(
        r#"
        select
          cc.cart_content_id,
          cc.drive_item_id,
          cc.child_item_id,
          cc.quantity::bigint as quantity,
          i.store_key,
          i.product_id,
          i.name as item_name,
          i.image_url,
          i.price_cents
        from cart_contents cc
        left join drive_items di on di.drive_item_id = cc.drive_item_id
        left join child_items ci on ci.child_item_id = cc.child_item_id
        join items i on i.item_id = coalesce(di.item_id, ci.item_id)
        where cc.cart_id = $1
        order by cc.created_at_utc asc, cc.cart_content_id asc
        "#,
    )
    .bind(cart_id)
    .fetch_all(&mut *conn)
    .await
    .context("cart_lines query failed")?;

    rows.iter().map(cart_line_from_pg).collect()
}

/// Quantity of `need` in this cart, `None` when there is no line.
pub async fn cart_line_quantity(
    conn: &mut PgConnection,
    cart_id: Uuid,
    need: NeedRef,
) -> Result<Option<i64>> {
    let sql = format!(
        "select quantity::bigint from cart_contents where cart_id = $1 and {} = $2",
        need_column(&need)
    );
    let row: Option<(i64,)> = sqlx::query_as(&sql)
        .bind(cart_id)
        .bind(need.id())
        .fetch_optional(&mut *conn)
        .await
        .context("cart_line_quantity failed")?;
    Ok(row.map(|(q,)| q))
}

/// Set the absolute quantity of a mirror line, inserting it if absent.
pub async fn upsert_cart_line(
    conn: &mut PgConnection,
    cart_id: Uuid,
    need: NeedRef,
    quantity: i64,
) -> Result<()> {
    if quantity <= 0 {
        return Err(anyhow!("cart line quantity must be > 0 (got {quantity})"));
    }
    let quantity = i32::try_from(quantity).context("cart line quantity out of range")?;
    let (drive_item_id, child_item_id) = need_columns(&need);
    let col = need_column(&need);

    let sql = format!(
        r#"
        insert into cart_contents (cart_content_id, cart_id, drive_item_id, child_item_id, quantity)
        values ($1, $2, $3, $4, $5)
        on conflict (cart_id, {col}) where {col} is not null
        do update set quantity = excluded.quantity,
                      updated_at_utc = now()
        "#
    );

    sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(cart_id)
        .bind(drive_item_id)
        .bind(child_item_id)
        .bind(quantity)
        .execute(&mut *conn)
        .await
        .context("upsert_cart_line failed")?;
    Ok(())
}

/// Update the quantity of an existing line only. Returns `false` when the
/// need has no line in this cart.
pub async fn set_cart_line_quantity(
    conn: &mut PgConnection,
    cart_id: Uuid,
    need: NeedRef,
    quantity: i64,
) -> Result<bool> {
    if quantity <= 0 {
        return Err(anyhow!("cart line quantity must be > 0 (got {quantity})"));
    }
    let quantity = i32::try_from(quantity).context("cart line quantity out of range")?;
    let sql = format!(
        "update cart_contents set quantity = $3, updated_at_utc = now() where cart_id = $1 and {} = $2",
        need_column(&need)
    );
    let res = sqlx::query(&sql)
        .bind(cart_id)
        .bind(need.id())
        .bind(quantity)
        .execute(&mut *conn)
        .await
        .context("set_cart_line_quantity failed")?;
    Ok(res.rows_affected() > 0)
}

/// Returns `true` when a line was deleted.
pub async fn delete_cart_line(conn: &mut PgConnection, cart_id: Uuid, need: NeedRef) -> Result<bool> {
    let sql = format!(
        "delete from cart_contents where cart_id = $1 and {} = $2",
        need_column(&need)
    );
    let res = sqlx::query(&sql)
        .bind(cart_id)
        .bind(need.id())
        .execute(&mut *conn)
        .await
        .context("delete_cart_line failed")?;
    Ok(res.rows_affected() > 0)
}

/// Delete every line whose item belongs to `store`. Used after that store's
/// checkout was finalized.
pub async fn delete_cart_lines_for_store(
    conn: &mut PgConnection,
    cart_id: Uuid,
    store: &Store,
) -> Result<u64> {
    let res = sqlx::query(
        r#"
        delete from cart_contents
        where cart_content_id in (
          select cc.cart_content_id
          from cart_contents cc
          left join drive_items di on di.drive_item_id = cc.drive_item_id
          left join child_items ci on ci.child_item_id = cc.child_item_id
          join items i on i.item_id = coalesce(di.item_id, ci.item_id)
          where cc.cart_id = $1 and i.store_key = $2
        )
        "#,
    )
    .bind(cart_id)
    .bind(store.key())
    .execute(&mut *conn)
    .await
    .context("delete_cart_lines_for_store failed")?;
    Ok(res.rows_affected())
}

pub async fn touch_cart(conn: &mut PgConnection, cart_id: Uuid) -> Result<()> {
    sqlx::query("update carts set updated_at_utc = now() where cart_id = $1")
        .bind(cart_id)
        .execute(&mut *conn)
        .await
        .context("touch_cart failed")?;
    Ok(())
}
