use sqlx::FromRow;

/// The single synchronized document for one user.
///
/// `data` is an opaque JSON payload owned by the client; `updated_at` is
/// the server-assigned write timestamp in milliseconds since the epoch.
#[derive(Debug, Clone, FromRow)]
pub struct UserDataRecord {
    pub user_id: String,
    pub data: String,
    pub updated_at: i64,
}
