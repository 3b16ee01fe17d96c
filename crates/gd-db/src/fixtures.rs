//! Catalog and need inserts.
//!
//! Organization/drive/child CRUD belongs to the surrounding platform; these
//! inserts exist for scenario tests and `gd-cli seed`.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

pub async fn insert_organization(pool: &PgPool, name: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query("insert into organizations (organization_id, name) values ($1, $2)")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await
        .context("insert_organization failed")?;
    Ok(id)
}

pub async fn insert_drive(
    pool: &PgPool,
    organization_id: Uuid,
    name: &str,
    starts_on: Option<NaiveDate>,
    ends_on: Option<NaiveDate>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        insert into drives (drive_id, organization_id, name, starts_on, ends_on)
        values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(organization_id)
    .bind(name)
    .bind(starts_on)
    .bind(ends_on)
    .execute(pool)
    .await
    .context("insert_drive failed")?;
    Ok(id)
}

pub async fn insert_child(pool: &PgPool, drive_id: Uuid, display_name: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query("insert into children (child_id, drive_id, display_name) values ($1, $2, $3)")
        .bind(id)
        .bind(drive_id)
        .bind(display_name)
        .execute(pool)
        .await
        .context("insert_child failed")?;
    Ok(id)
}

#[derive(Debug, Clone)]
pub struct NewItem {
    pub store_key: String,
    pub product_id: String,
    pub name: String,
    pub image_url: Option<String>,
    pub price_cents: Option<i64>,
}

/// Upsert by `(store_key, product_id)`; returns the item id.
pub async fn insert_item(pool: &PgPool, item: &NewItem) -> Result<Uuid> {
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        insert into items (item_id, store_key, product_id, name, image_url, price_cents)
        values ($1, $2, $3, $4, $5, $6)
        on conflict (store_key, product_id)
        do update set name = excluded.name,
                      image_url = excluded.image_url,
                      price_cents = excluded.price_cents
        returning item_id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&item.store_key)
    .bind(&item.product_id)
    .bind(&item.name)
    .bind(&item.image_url)
    .bind(item.price_cents)
    .fetch_one(pool)
    .await
    .context("insert_item failed")?;
    Ok(id)
}

pub async fn insert_drive_item(pool: &PgPool, drive_id: Uuid, item_id: Uuid, quantity: i32) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "insert into drive_items (drive_item_id, drive_id, item_id, quantity) values ($1, $2, $3, $4)",
    )
    .bind(id)
    .bind(drive_id)
    .bind(item_id)
    .bind(quantity)
    .execute(pool)
    .await
    .context("insert_drive_item failed")?;
    Ok(id)
}

pub async fn insert_child_item(pool: &PgPool, child_id: Uuid, item_id: Uuid, quantity: i32) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "insert into child_items (child_item_id, child_id, item_id, quantity) values ($1, $2, $3, $4)",
    )
    .bind(id)
    .bind(child_id)
    .bind(item_id)
    .bind(quantity)
    .execute(pool)
    .await
    .context("insert_child_item failed")?;
    Ok(id)
}
