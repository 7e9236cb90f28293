use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User model
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub created_at: String,
}

/// Authenticated session identity (extracted from the session cookie)
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub id: String,
    pub email: Option<String>,
}

/// Session token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String, // user id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub iat: usize, // issued at
    pub exp: usize, // expiration time
}
