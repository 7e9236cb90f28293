use crate::db::Database;
use crate::error::Result;
use crate::models::UserDataRecord;

/// Single-document-per-user storage with upsert semantics
pub struct UserDataStore;

impl UserDataStore {
    /// The user's document and its write timestamp, if any
    pub async fn get(db: &Database, user_id: &str) -> Result<Option<UserDataRecord>> {
        let record = sqlx::query_as("SELECT * FROM user_data WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(db.pool())
            .await?;
        Ok(record)
    }

    /// Replace (or create) the user's document in a single atomic statement.
    ///
    /// Concurrent pushes for the same user must not interleave a read with
    /// a write, so this is an upsert rather than select-then-insert.
    pub async fn upsert(db: &Database, user_id: &str, data: &str, updated_at: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_data (user_id, data, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(data)
        .bind(updated_at)
        .execute(db.pool())
        .await?;
        Ok(())
    }

    /// Upsert within a caller-owned transaction (registration batch)
    pub async fn upsert_tx(
        conn: &mut sqlx::SqliteConnection,
        user_id: &str,
        data: &str,
        updated_at: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_data (user_id, data, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(data)
        .bind(updated_at)
        .execute(conn)
        .await?;
        Ok(())
    }
}
