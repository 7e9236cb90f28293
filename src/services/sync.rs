use chrono::Utc;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::services::UserDataStore;

/// Pull/push of the per-user synchronized document.
///
/// Conflict policy is last-write-wins: a push overwrites unconditionally
/// and is stamped with the server clock. Debouncing is the client's job.
pub struct SyncService;

impl SyncService {
    /// Store the document for a user, returning the assigned timestamp (ms)
    pub async fn push(
        db: &Database,
        user_id: &str,
        document: &serde_json::Value,
    ) -> Result<i64> {
        let updated_at = Utc::now().timestamp_millis();
        UserDataStore::upsert(db, user_id, &document.to_string(), updated_at)
            .await
            .map_err(|e| match &e {
                AppError::Database(sqlx::Error::Database(db_err))
                    if db_err.is_foreign_key_violation() =>
                {
                    AppError::Unauthorized("Unknown user".to_string())
                }
                _ => e,
            })?;
        Ok(updated_at)
    }

    /// Fetch the document for a user; `(None, 0)` when nothing was pushed yet
    pub async fn pull(db: &Database, user_id: &str) -> Result<(Option<serde_json::Value>, i64)> {
        match UserDataStore::get(db, user_id).await? {
            Some(record) => {
                let document = serde_json::from_str(&record.data).map_err(|_| {
                    AppError::Internal("Stored document is not valid JSON".to_string())
                })?;
                Ok((Some(document), record.updated_at))
            }
            None => Ok((None, 0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::services::UserService;
    use serde_json::json;

    async fn seed_user(db: &Database, id: &str) {
        let mut tx = db.pool().begin().await.unwrap();
        UserService::insert_tx(tx.as_mut(), id, "Test User", None).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn push_then_pull_round_trips_with_matching_timestamp() {
        let db = test_db().await;
        seed_user(&db, "u1").await;

        let doc = json!({"tasks": []});
        let pushed_at = SyncService::push(&db, "u1", &doc).await.unwrap();

        let (pulled, updated_at) = SyncService::pull(&db, "u1").await.unwrap();
        assert_eq!(pulled, Some(doc));
        assert_eq!(updated_at, pushed_at);
    }

    #[tokio::test]
    async fn pull_without_push_is_null_and_zero() {
        let db = test_db().await;
        let (document, updated_at) = SyncService::pull(&db, "u1").await.unwrap();
        assert!(document.is_none());
        assert_eq!(updated_at, 0);
    }

    #[tokio::test]
    async fn later_push_wins() {
        let db = test_db().await;
        seed_user(&db, "u1").await;

        SyncService::push(&db, "u1", &json!({"rev": 1})).await.unwrap();
        SyncService::push(&db, "u1", &json!({"rev": 2})).await.unwrap();

        let (pulled, _) = SyncService::pull(&db, "u1").await.unwrap();
        assert_eq!(pulled, Some(json!({"rev": 2})));
    }

    #[tokio::test]
    async fn push_for_unknown_user_is_unauthorized() {
        let db = test_db().await;
        let err = SyncService::push(&db, "ghost", &json!({})).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
