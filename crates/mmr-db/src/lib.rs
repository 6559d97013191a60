//! Postgres persistence for the reconciliation engine.
//!
//! [`PgLedger`] implements the Ledger Store contract over one sqlx
//! transaction per transition. [`PgSequenceStore`] and [`PgRatingLookup`] are
//! called while a transition's transaction is open, so they run on a separate
//! pool from [`connect_side_pool`].

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

use mmr_ledger::StoreError;

mod ledger;
mod rating;
mod sequence;

pub use ledger::{PgLedger, PgTxn};
pub use rating::PgRatingLookup;
pub use sequence::PgSequenceStore;

pub const ENV_DB_URL: &str = "MMR_DATABASE_URL";

/// One connection per in-flight transition.
const MAX_CONNECTIONS: u32 = 10;

/// Side-pool queries are single statements that never wait on a ledger lock.
const SIDE_POOL_CONNECTIONS: u32 = 2;

/// Connect to Postgres using MMR_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect(url)
        .await
        .context("failed to connect to Postgres")
}

/// Pool for [`PgSequenceStore`] and [`PgRatingLookup`]. Never hand it to
/// [`PgLedger`]: a block refill or rating read must not queue behind the
/// transactions that are waiting on it.
pub async fn connect_side_pool(url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(SIDE_POOL_CONNECTIONS)
        .connect(url)
        .await
        .context("failed to connect side pool to Postgres")
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Connectivity and ledger-schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (ok, has_ledger_tables): (bool, bool) = sqlx::query_as(
        r#"
        select true,
               to_regclass('public.long_component_state') is not null
                 and to_regclass('public.long_comp_result') is not null
                 and to_regclass('public.id_sequences') is not null
        "#,
    )
    .fetch_one(pool)
    .await
    .context("db status query failed")?;

    Ok(DbStatus {
        ok,
        has_ledger_tables,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbStatus {
    pub ok: bool,
    /// Every table the engine writes exists.
    pub has_ledger_tables: bool,
}

/// Postgres unique_violation.
const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";

/// `Some(constraint)` when `err` is a unique violation. The constraint name
/// is empty if the server did not report one.
fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err)
            if db_err.code().as_deref() == Some(SQLSTATE_UNIQUE_VIOLATION) =>
        {
            Some(db_err.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

/// Map a sqlx error from an insert onto the store taxonomy. A unique
/// violation becomes `Duplicate` only when it hit one of `duplicate_keys`;
/// any other unique constraint is a backend fault naming the constraint.
pub(crate) fn insert_error(
    err: sqlx::Error,
    entity: &'static str,
    duplicate_keys: &[&str],
    key: String,
) -> StoreError {
    match unique_violation(&err) {
        Some(constraint) if duplicate_keys.contains(&constraint.as_str()) => {
            StoreError::Duplicate { entity, key }
        }
        Some(constraint) => StoreError::backend(format!(
            "{entity} insert hit unique constraint {constraint:?} ({key}): {err}"
        )),
        None => backend_error(err, entity),
    }
}

pub(crate) fn backend_error(err: sqlx::Error, what: &str) -> StoreError {
    StoreError::backend(format!("{what} failed: {err}"))
}
