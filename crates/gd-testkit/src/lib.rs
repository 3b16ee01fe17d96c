//! Test support for the cart/checkout subsystem: an in-memory commerce cart
//! and seeded needs in a real Postgres database.

use std::sync::Arc;

use anyhow::Result;
use gd_cart::CartService;
use gd_config::CartSettings;
use gd_db::NewItem;
use gd_schemas::{NeedRef, ProductRef, Store};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

mod fake_commerce;

pub use fake_commerce::FakeCommerce;

/// Connect + migrate, or `None` (after printing `SKIP:`) when
/// `GIFTDRIVE_DATABASE_URL` is unset.
pub async fn test_pool() -> Result<Option<PgPool>> {
    let url = match std::env::var(gd_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: {} not set", gd_db::ENV_DB_URL);
            return Ok(None);
        }
    };
    let pool = PgPoolOptions::new().max_connections(8).connect(&url).await?;
    gd_db::migrate(&pool).await?;
    Ok(Some(pool))
}

/// Cart service over `pool` and a fresh [`FakeCommerce`].
pub fn service(pool: &PgPool) -> (CartService, Arc<FakeCommerce>) {
    service_with(pool, CartSettings::default())
}

pub fn service_with(pool: &PgPool, settings: CartSettings) -> (CartService, Arc<FakeCommerce>) {
    let fake = Arc::new(FakeCommerce::new());
    let svc = CartService::new(pool.clone(), fake.clone(), settings);
    (svc, fake)
}

/// A unique donor id per test so runs against a shared database never collide.
pub fn donor() -> String {
    format!("donor-{}", Uuid::new_v4())
}

#[derive(Debug, Clone)]
pub struct SeededDrive {
    pub organization_id: Uuid,
    pub drive_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct SeededNeed {
    pub need: NeedRef,
    pub product: ProductRef,
    pub item_id: Uuid,
}

pub async fn seed_drive(pool: &PgPool) -> Result<SeededDrive> {
    let tag = Uuid::new_v4().simple().to_string();
    let organization_id = gd_db::insert_organization(pool, &format!("Org {tag}")).await?;
    let drive_id = gd_db::insert_drive(pool, organization_id, &format!("Drive {tag}"), None, None).await?;
    Ok(SeededDrive {
        organization_id,
        drive_id,
    })
}

/// A catalog item with a product id unique to this call.
pub async fn seed_item(pool: &PgPool, store: &Store, name: &str) -> Result<(Uuid, ProductRef)> {
    let product = ProductRef::new(store.clone(), format!("P{}", Uuid::new_v4().simple()));
    let item_id = gd_db::insert_item(
        pool,
        &NewItem {
            store_key: store.key().to_string(),
            product_id: product.product_id.clone(),
            name: name.to_string(),
            image_url: None,
            price_cents: Some(1999),
        },
    )
    .await?;
    Ok((item_id, product))
}

pub async fn seed_drive_need(pool: &PgPool, drive: &SeededDrive, store: &Store, requested: i32) -> Result<SeededNeed> {
    let (item_id, product) = seed_item(pool, store, "Art kit").await?;
    let id = gd_db::insert_drive_item(pool, drive.drive_id, item_id, requested).await?;
    Ok(SeededNeed {
        need: NeedRef::Drive(id),
        product,
        item_id,
    })
}

pub async fn seed_child_need(pool: &PgPool, drive: &SeededDrive, store: &Store, requested: i32) -> Result<SeededNeed> {
    let (item_id, product) = seed_item(pool, store, "Winter coat").await?;
    let child_id = gd_db::insert_child(pool, drive.drive_id, "Child A").await?;
    let id = gd_db::insert_child_item(pool, child_id, item_id, requested).await?;
    Ok(SeededNeed {
        need: NeedRef::Child(id),
        product,
        item_id,
    })
}

/// A second need pointing at an already seeded item.
pub async fn seed_drive_need_for_item(
    pool: &PgPool,
    drive: &SeededDrive,
    item: &SeededNeed,
    requested: i32,
) -> Result<SeededNeed> {
    let id = gd_db::insert_drive_item(pool, drive.drive_id, item.item_id, requested).await?;
    Ok(SeededNeed {
        need: NeedRef::Drive(id),
        product: item.product.clone(),
        item_id: item.item_id,
    })
}
