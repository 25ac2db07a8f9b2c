pub(crate) mod dao;
pub(crate) mod models;

use anyhow::{Context, Result};
use sqlx::PgPool;

/// 埋め込み済みマイグレーションを適用する。
pub(crate) async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("failed to apply sync_db migrations")
}
