use chrono::Utc;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::Credential;

/// Durable storage for registered WebAuthn credentials
pub struct CredentialStore;

impl CredentialStore {
    /// All credentials registered by one user (exclude/allow-list building)
    pub async fn find_by_user(db: &Database, user_id: &str) -> Result<Vec<Credential>> {
        let creds = sqlx::query_as("SELECT * FROM credentials WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(db.pool())
            .await?;
        Ok(creds)
    }

    /// Every known credential (discoverable login builds its allow-list from this)
    pub async fn find_all(db: &Database) -> Result<Vec<Credential>> {
        let creds = sqlx::query_as("SELECT * FROM credentials ORDER BY created_at DESC")
            .fetch_all(db.pool())
            .await?;
        Ok(creds)
    }

    /// Primary authentication lookup by credential id
    pub async fn find_by_credential_id(
        db: &Database,
        credential_id: &str,
    ) -> Result<Option<Credential>> {
        let cred = sqlx::query_as("SELECT * FROM credentials WHERE id = ?")
            .bind(credential_id)
            .fetch_optional(db.pool())
            .await?;
        Ok(cred)
    }

    /// Insert a new credential
    pub async fn insert(
        db: &Database,
        credential_id: &str,
        user_id: &str,
        public_key: &str,
        sign_counter: i64,
    ) -> Result<()> {
        let mut tx = db.pool().begin().await?;
        Self::insert_tx(tx.as_mut(), credential_id, user_id, public_key, sign_counter).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Insert within a caller-owned transaction (registration batch)
    pub async fn insert_tx(
        conn: &mut sqlx::SqliteConnection,
        credential_id: &str,
        user_id: &str,
        public_key: &str,
        sign_counter: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO credentials (id, user_id, public_key, sign_counter, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(credential_id)
        .bind(user_id)
        .bind(public_key)
        .bind(sign_counter)
        .bind(Utc::now().to_rfc3339())
        .execute(conn)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                AppError::Conflict("Credential already registered".to_string())
            }
            _ => AppError::from(e),
        })?;
        Ok(())
    }

    /// Overwrite the stored signature counter and key material after a
    /// successful assertion. The overwrite is unconditional; monotonicity
    /// is checked by the assertion verifier before this point.
    pub async fn update_counter(
        db: &Database,
        credential_id: &str,
        new_counter: i64,
        public_key: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE credentials SET sign_counter = ?, public_key = ? WHERE id = ?")
            .bind(new_counter)
            .bind(public_key)
            .bind(credential_id)
            .execute(db.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    async fn seed_user(db: &Database, id: &str) {
        sqlx::query("INSERT INTO users (id, name, created_at) VALUES (?, ?, ?)")
            .bind(id)
            .bind("Test User")
            .bind(Utc::now().to_rfc3339())
            .execute(db.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn insert_and_find_by_user() {
        let db = test_db().await;
        seed_user(&db, "u1").await;

        CredentialStore::insert(&db, "cred-1", "u1", "{\"pk\":1}", 0)
            .await
            .unwrap();

        let creds = CredentialStore::find_by_user(&db, "u1").await.unwrap();
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].id, "cred-1");
        assert_eq!(creds[0].sign_counter, 0);
    }

    #[tokio::test]
    async fn duplicate_credential_id_is_a_conflict() {
        let db = test_db().await;
        seed_user(&db, "u1").await;
        seed_user(&db, "u2").await;

        CredentialStore::insert(&db, "cred-1", "u1", "{}", 0).await.unwrap();
        let err = CredentialStore::insert(&db, "cred-1", "u2", "{}", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn find_by_credential_id_misses_cleanly() {
        let db = test_db().await;
        let got = CredentialStore::find_by_credential_id(&db, "nope").await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn update_counter_overwrites_counter_and_key() {
        let db = test_db().await;
        seed_user(&db, "u1").await;
        CredentialStore::insert(&db, "cred-1", "u1", "old", 0).await.unwrap();

        CredentialStore::update_counter(&db, "cred-1", 7, "new").await.unwrap();

        let cred = CredentialStore::find_by_credential_id(&db, "cred-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cred.sign_counter, 7);
        assert_eq!(cred.public_key, "new");
    }
}
