use chrono::{Duration, Utc};

use crate::db::Database;
use crate::error::Result;
use crate::models::ChallengeRow;

/// Short-TTL store for in-flight ceremony state.
///
/// Keys are ceremony-scoped (`reg:{userId}`, `login:{ceremonyId}`); a put
/// replaces any live entry for the same key. Expired entries are invisible
/// to `get` and physically removed by the periodic sweeper.
pub struct ChallengeStore;

impl ChallengeStore {
    /// Store a value under `key` for `ttl_secs` seconds
    pub async fn put(db: &Database, key: &str, value: &str, ttl_secs: i64) -> Result<()> {
        let now = Utc::now();
        let expires_at = (now + Duration::seconds(ttl_secs)).to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO challenge_sessions (id, data, expires_at, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                expires_at = excluded.expires_at,
                created_at = excluded.created_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(&expires_at)
        .bind(now.to_rfc3339())
        .execute(db.pool())
        .await?;
        Ok(())
    }

    /// Fetch the live value for `key`, if any
    pub async fn get(db: &Database, key: &str) -> Result<Option<String>> {
        let row: Option<ChallengeRow> =
            sqlx::query_as("SELECT * FROM challenge_sessions WHERE id = ?")
                .bind(key)
                .fetch_optional(db.pool())
                .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at = match chrono::DateTime::parse_from_rfc3339(&row.expires_at) {
            Ok(t) => t,
            Err(_) => {
                tracing::warn!("Dropping challenge entry {} with unparseable expiry", key);
                return Ok(None);
            }
        };
        if expires_at < Utc::now() {
            return Ok(None);
        }

        Ok(Some(row.data))
    }

    /// Remove `key`; removing an absent key is not an error
    pub async fn delete(db: &Database, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM challenge_sessions WHERE id = ?")
            .bind(key)
            .execute(db.pool())
            .await?;
        Ok(())
    }

    /// Delete every expired entry, returning how many were removed
    pub async fn cleanup_expired(db: &Database) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM challenge_sessions WHERE expires_at < ?")
            .bind(Utc::now().to_rfc3339())
            .execute(db.pool())
            .await?
            .rows_affected();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    #[tokio::test]
    async fn put_then_get_returns_value() {
        let db = test_db().await;
        ChallengeStore::put(&db, "reg:u1", "state", 300).await.unwrap();
        let got = ChallengeStore::get(&db, "reg:u1").await.unwrap();
        assert_eq!(got.as_deref(), Some("state"));
    }

    #[tokio::test]
    async fn get_after_ttl_returns_absent() {
        let db = test_db().await;
        ChallengeStore::put(&db, "reg:u1", "state", 1).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        assert!(ChallengeStore::get(&db, "reg:u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_replaces_live_entry_for_same_key() {
        let db = test_db().await;
        ChallengeStore::put(&db, "login:c1", "first", 300).await.unwrap();
        ChallengeStore::put(&db, "login:c1", "second", 300).await.unwrap();

        let got = ChallengeStore::get(&db, "login:c1").await.unwrap();
        assert_eq!(got.as_deref(), Some("second"));

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM challenge_sessions")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let db = test_db().await;
        ChallengeStore::put(&db, "reg:u1", "state", 300).await.unwrap();
        ChallengeStore::delete(&db, "reg:u1").await.unwrap();
        ChallengeStore::delete(&db, "reg:u1").await.unwrap();
        assert!(ChallengeStore::get(&db, "reg:u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired_entries() {
        let db = test_db().await;
        ChallengeStore::put(&db, "stale", "a", -5).await.unwrap();
        ChallengeStore::put(&db, "live", "b", 300).await.unwrap();

        let removed = ChallengeStore::cleanup_expired(&db).await.unwrap();
        assert_eq!(removed, 1);
        assert!(ChallengeStore::get(&db, "live").await.unwrap().is_some());
    }
}
