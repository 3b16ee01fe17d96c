//! Postgres persistence for the cart/checkout subsystem.
//!
//! Functions that participate in a caller-scoped transaction take
//! `&mut PgConnection` (pass `&mut *tx`); stand-alone reads and fixtures take
//! `&PgPool`.

use anyhow::{Context, Result};
use gd_schemas::NeedRef;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

mod cart;
mod fixtures;
mod ledger;
mod orders;

pub use cart::*;
pub use fixtures::*;
pub use ledger::*;
pub use orders::*;

pub const ENV_DB_URL: &str = "GIFTDRIVE_DATABASE_URL";

/// Connect to Postgres using GIFTDRIVE_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_carts_table: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='carts'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_carts_table: exists,
    })
}

/// Column pair `(drive_item_id, child_item_id)` for binding a need; exactly
/// one side is `Some`.
pub(crate) fn need_columns(need: &NeedRef) -> (Option<Uuid>, Option<Uuid>) {
    match need {
        NeedRef::Drive(id) => (Some(*id), None),
        NeedRef::Child(id) => (None, Some(*id)),
    }
}

/// Name of the column that references `need` in cart_contents / order_items.
pub(crate) fn need_column(need: &NeedRef) -> &'static str {
    match need {
        NeedRef::Drive(_) => "drive_item_id",
        NeedRef::Child(_) => "child_item_id",
    }
}

pub(crate) fn need_from_columns(drive_item_id: Option<Uuid>, child_item_id: Option<Uuid>) -> Result<NeedRef> {
    match (drive_item_id, child_item_id) {
        (Some(d), None) => Ok(NeedRef::Drive(d)),
        (None, Some(c)) => Ok(NeedRef::Child(c)),
        _ => anyhow::bail!("row must reference exactly one of drive_item_id / child_item_id"),
    }
}

/// Detect a Postgres unique constraint violation by constraint/index name.
pub(crate) fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn need_columns_set_exactly_one_side() {
        let id = Uuid::new_v4();
        assert_eq!(need_columns(&NeedRef::Drive(id)), (Some(id), None));
        assert_eq!(need_columns(&NeedRef::Child(id)), (None, Some(id)));
        assert_eq!(need_column(&NeedRef::Child(id)), "child_item_id");
    }

    #[test]
    fn need_from_columns_rejects_both_or_neither() {
        let id = Uuid::new_v4();
        assert_eq!(need_from_columns(Some(id), None).unwrap(), NeedRef::Drive(id));
        assert!(need_from_columns(Some(id), Some(id)).is_err());
        assert!(need_from_columns(None, None).is_err());
    }
}
