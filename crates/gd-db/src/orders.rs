//! Order ledger: one `orders` row per completed store checkout, one
//! `order_items` row per need purchased in it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use gd_schemas::NeedRef;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::{need_columns, need_from_columns};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRow {
    pub order_id: Uuid,
    pub cart_id: Uuid,
    pub donor_id: String,
    pub remote_cart_id: String,
    pub store_key: String,
    pub request_id: String,
    pub created_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_id: Uuid,
    pub cart_id: Uuid,
    pub donor_id: String,
    pub remote_cart_id: String,
    pub store_key: String,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemRow {
    pub order_item_id: Uuid,
    pub order_id: Uuid,
    pub need: NeedRef,
    pub quantity: i64,
}

const ORDER_COLUMNS: &str =
    "order_id, cart_id, donor_id, remote_cart_id, store_key, request_id, created_at_utc";

fn order_row_from_pg(row: &PgRow) -> Result<OrderRow> {
    Ok(OrderRow {
        order_id: row.try_get("order_id")?,
        cart_id: row.try_get("cart_id")?,
        donor_id: row.try_get("donor_id")?,
        remote_cart_id: row.try_get("remote_cart_id")?,
        store_key: row.try_get("store_key")?,
        request_id: row.try_get("request_id")?,
        created_at_utc: row.try_get("created_at_utc")?,
    })
}

pub async fn order_by_request_id(conn: &mut PgConnection, request_id: &str) -> Result<Option<OrderRow>> {
    let sql = format!("select {ORDER_COLUMNS} from orders where request_id = $1");
    let row = sqlx::query(&sql)
        .bind(request_id)
        .fetch_optional(&mut *conn)
        .await
        .context("order_by_request_id failed")?;
    row.as_ref().map(order_row_from_pg).transpose()
}

/// Insert an order keyed by `request_id`.
///
/// Returns `true` if a new row was created, `false` if the request id was
/// already recorded (duplicate finalize).
pub async fn insert_order(conn: &mut PgConnection, o: &NewOrder) -> Result<bool> {
    let res = sqlx::query(
        r#"
        insert into orders (order_id, cart_id, donor_id, remote_cart_id, store_key, request_id)
        values ($1, $2, $3, $4, $5, $6)
        on conflict (request_id) do nothing
        "#,
    )
    .bind(o.order_id)
    .bind(o.cart_id)
    .bind(&o.donor_id)
    .bind(&o.remote_cart_id)
    .bind(&o.store_key)
    .bind(&o.request_id)
    .execute(&mut *conn)
    .await
    .context("insert_order failed")?;
    Ok(res.rows_affected() == 1)
}

pub async fn insert_order_item(
    conn: &mut PgConnection,
    order_id: Uuid,
    need: NeedRef,
    quantity: i64,
) -> Result<Uuid> {
    let quantity = i32::try_from(quantity).context("order item quantity out of range")?;
    let (drive_item_id, child_item_id) = need_columns(&need);
    let order_item_id = Uuid::new_v4();
    sqlx::query(
        r#"
        insert into order_items (order_item_id, order_id, drive_item_id, child_item_id, quantity)
        values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(order_item_id)
    .bind(order_id)
    .bind(drive_item_id)
    .bind(child_item_id)
    .bind(quantity)
    .execute(&mut *conn)
    .await
    .context("insert_order_item failed")?;
    Ok(order_item_id)
}

pub async fn order_items_for_order(conn: &mut PgConnection, order_id: Uuid) -> Result<Vec<OrderItemRow>> {
    let rows = sqlx::query(
        r#"
        select order_item_id, order_id, drive_item_id, child_item_id, quantity::bigint as quantity
        from order_items
        where order_id = $1
        order by created_at_utc asc, order_item_id asc
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await
    .context("order_items_for_order failed")?;

    rows.iter()
        .map(|r| {
            Ok(OrderItemRow {
                order_item_id: r.try_get("order_item_id")?,
                order_id: r.try_get("order_id")?,
                need: need_from_columns(r.try_get("drive_item_id")?, r.try_get("child_item_id")?)?,
                quantity: r.try_get("quantity")?,
            })
        })
        .collect()
}

pub async fn orders_for_donor(pool: &PgPool, donor_id: &str) -> Result<Vec<OrderRow>> {
    let sql = format!(
        "select {ORDER_COLUMNS} from orders where donor_id = $1 order by created_at_utc asc, order_id asc"
    );
    let rows = sqlx::query(&sql)
        .bind(donor_id)
        .fetch_all(pool)
        .await
        .context("orders_for_donor failed")?;
    rows.iter().map(order_row_from_pg).collect()
}
