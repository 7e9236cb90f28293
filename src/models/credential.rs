use sqlx::FromRow;

/// A registered WebAuthn credential.
///
/// `id` is the authenticator's credential id, base64url-encoded without
/// padding, and is unique across all users. `public_key` is the serialized
/// verification key material; `sign_counter` mirrors the authenticator's
/// signature counter after the latest successful assertion.
#[derive(Debug, Clone, FromRow)]
pub struct Credential {
    pub id: String,
    pub user_id: String,
    pub public_key: String,
    pub sign_counter: i64,
    pub created_at: String,
}

/// Ephemeral ceremony state row, keyed by `reg:{userId}` / `login:{ceremonyId}`
#[derive(Debug, Clone, FromRow)]
pub struct ChallengeRow {
    pub id: String,
    pub data: String,
    pub expires_at: String,
    pub created_at: String,
}
