use chrono::Utc;

use crate::db::Database;
use crate::error::Result;
use crate::models::User;
use crate::services::ChallengeStore;

/// User row access and account lifecycle
pub struct UserService;

impl UserService {
    pub async fn find_by_id(db: &Database, user_id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(db.pool())
            .await?;
        Ok(user)
    }

    pub async fn find_by_email(db: &Database, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(db.pool())
            .await?;
        Ok(user)
    }

    /// Insert a user row within the registration transaction.
    ///
    /// `INSERT OR IGNORE` keeps re-registration for an existing user id
    /// idempotent; the credential insert in the same batch is what fails
    /// on a genuine duplicate.
    pub async fn insert_tx(
        conn: &mut sqlx::SqliteConnection,
        user_id: &str,
        name: &str,
        email: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO users (id, name, email, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(name)
        .bind(email)
        .bind(Utc::now().to_rfc3339())
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Delete a user together with their credentials and synced document.
    ///
    /// The three deletes commit as one transaction; any live ceremony
    /// entries for the user are cleaned up afterwards on a best-effort
    /// basis (login ceremonies are keyed by ceremony id and simply expire).
    pub async fn delete_account(db: &Database, user_id: &str) -> Result<()> {
        let mut tx = db.pool().begin().await?;

        sqlx::query("DELETE FROM user_data WHERE user_id = ?")
            .bind(user_id)
            .execute(tx.as_mut())
            .await?;
        sqlx::query("DELETE FROM credentials WHERE user_id = ?")
            .bind(user_id)
            .execute(tx.as_mut())
            .await?;
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(tx.as_mut())
            .await?;

        tx.commit().await?;

        for key in [format!("reg:{}", user_id), format!("login:{}", user_id)] {
            if let Err(e) = ChallengeStore::delete(db, &key).await {
                tracing::warn!("Challenge cleanup for {} failed: {}", key, e);
            }
        }

        tracing::info!("Deleted account {}", user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::services::{CredentialStore, UserDataStore};

    #[tokio::test]
    async fn delete_account_removes_user_credentials_and_data() {
        let db = test_db().await;

        let mut tx = db.pool().begin().await.unwrap();
        UserService::insert_tx(tx.as_mut(), "u1", "Alice", Some("alice@example.com"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        CredentialStore::insert(&db, "cred-1", "u1", "{}", 0).await.unwrap();
        UserDataStore::upsert(&db, "u1", "{}", 1).await.unwrap();
        ChallengeStore::put(&db, "reg:u1", "state", 300).await.unwrap();

        UserService::delete_account(&db, "u1").await.unwrap();

        assert!(UserService::find_by_id(&db, "u1").await.unwrap().is_none());
        assert!(CredentialStore::find_by_user(&db, "u1").await.unwrap().is_empty());
        assert!(UserDataStore::get(&db, "u1").await.unwrap().is_none());
        assert!(ChallengeStore::get(&db, "reg:u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_tx_is_idempotent_per_user_id() {
        let db = test_db().await;

        let mut tx = db.pool().begin().await.unwrap();
        UserService::insert_tx(tx.as_mut(), "u1", "Alice", None).await.unwrap();
        UserService::insert_tx(tx.as_mut(), "u1", "Alice Again", None).await.unwrap();
        tx.commit().await.unwrap();

        let user = UserService::find_by_id(&db, "u1").await.unwrap().unwrap();
        assert_eq!(user.name, "Alice");
    }

    #[tokio::test]
    async fn find_by_email_matches_exactly() {
        let db = test_db().await;

        let mut tx = db.pool().begin().await.unwrap();
        UserService::insert_tx(tx.as_mut(), "u1", "Alice", Some("alice@example.com"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(UserService::find_by_email(&db, "alice@example.com")
            .await
            .unwrap()
            .is_some());
        assert!(UserService::find_by_email(&db, "bob@example.com")
            .await
            .unwrap()
            .is_none());
    }
}
