use sqlx::{PgConnection, Row};
use xxhash_rust::xxh3::xxh3_64;

/// Advisory lock namespaces. Launch and report claims must never collide.
pub(crate) const LAUNCH_NAMESPACE: &str = "launch";
pub(crate) const REPORT_NAMESPACE: &str = "report";

/// 名前空間付きの識別子を PostgreSQL のアドバイザリロック用 64 ビットキーに変換する。
pub(crate) fn lock_key(namespace: &str, id: &str) -> i64 {
    let hash = xxh3_64(format!("{namespace}:{id}").as_bytes());
    i64::from_ne_bytes(hash.to_ne_bytes())
}

/// PostgreSQLのアドバイザリトランザクションロックを取得する。
///
/// `pg_try_advisory_xact_lock` はトランザクション終了時に自動で解放される。
/// ワーカーがクラッシュしてもロックは残らない。
///
/// # Returns
/// - `Ok(true)`: ロックの取得に成功
/// - `Ok(false)`: 他のセッションが保持中
///
/// # Errors
/// SQLクエリの実行に失敗した場合はエラーを返します。
pub(crate) async fn try_acquire_lock(conn: &mut PgConnection, key: i64) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT pg_try_advisory_xact_lock($1) AS acquired")
        .bind(key)
        .fetch_one(conn)
        .await?;

    row.try_get("acquired")
}
