use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};

use crate::error::{AppError, Result};
use crate::models::SessionClaims;

/// Session cookie name
pub const SESSION_COOKIE: &str = "plm_s";

/// Stateless session token codec.
///
/// Tokens are compact signed claims (HS256 over base64url header.payload),
/// verified entirely from the token itself; nothing is stored server-side.
pub struct TokenCodec;

impl TokenCodec {
    /// Issue a signed session token for a user
    pub fn issue(
        user_id: &str,
        email: Option<String>,
        secret: &str,
        ttl_secs: i64,
    ) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(ttl_secs);

        let claims = SessionClaims {
            sub: user_id.to_string(),
            email,
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("Token signing failed: {}", e)))?;

        Ok(token)
    }

    /// Verify a session token and extract its claims.
    ///
    /// Any failure mode (malformed token, bad signature, expired `exp`)
    /// yields `None`; verification never surfaces an error to callers.
    pub fn verify(token: &str, secret: &str) -> Option<SessionClaims> {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        validation.leeway = 0;

        decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .ok()
        .map(|data| data.claims)
    }

    /// Build the session cookie carrying a freshly issued token
    pub fn session_cookie(token: String, ttl_secs: i64, secure: bool) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, token))
            .path("/")
            .max_age(time::Duration::seconds(ttl_secs))
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(secure)
            .build()
    }

    /// Build a cookie that clears the session on the client
    pub fn clear_cookie(secure: bool) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, ""))
            .path("/")
            .max_age(time::Duration::ZERO)
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(secure)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn round_trip_preserves_claims() {
        let token =
            TokenCodec::issue("user-1", Some("a@example.com".to_string()), SECRET, 3600).unwrap();
        let claims = TokenCodec::verify(&token, SECRET).expect("token should verify");
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email.as_deref(), Some("a@example.com"));
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let token = TokenCodec::issue("user-1", None, SECRET, 3600).unwrap();
        let mut tampered = token.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });
        assert_ne!(token, tampered);
        assert!(TokenCodec::verify(&tampered, SECRET).is_none());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = TokenCodec::issue("user-1", None, SECRET, 3600).unwrap();
        assert!(TokenCodec::verify(&token, "other-secret").is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = TokenCodec::issue("user-1", None, SECRET, -120).unwrap();
        assert!(TokenCodec::verify(&token, SECRET).is_none());
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(TokenCodec::verify("", SECRET).is_none());
        assert!(TokenCodec::verify("not-a-token", SECRET).is_none());
        assert!(TokenCodec::verify("only.two", SECRET).is_none());
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let cookie = TokenCodec::clear_cookie(false);
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
    }
}
