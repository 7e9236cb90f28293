use chrono::Utc;
use serde::{Deserialize, Serialize};
use webauthn_rs::prelude::*;
use webauthn_rs_proto::{AuthenticatorAttachment, UserVerificationPolicy};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::config::Config;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::User;
use crate::services::{
    ChallengeStore, CredentialStore, SyncService, TokenCodec, UserDataStore, UserService,
};

/// Ceremony timeout advertised to the client authenticator
const CEREMONY_TIMEOUT_MS: u32 = 300_000;

/// In-flight registration ceremony state, serialized into the challenge store
#[derive(Serialize, Deserialize)]
struct RegistrationSession {
    state: PasskeyRegistration,
    name: String,
    email: Option<String>,
}

/// In-flight login ceremony state. `email` scopes the ceremony to one
/// identity; `None` is the discoverable flow.
#[derive(Serialize, Deserialize)]
struct LoginSession {
    state: PasskeyAuthentication,
    email: Option<String>,
}

/// Successful login outcome: the authenticated user, their latest synced
/// document, and a freshly issued session token.
#[derive(Debug)]
pub struct LoginSuccess {
    pub user: User,
    pub user_data: Option<serde_json::Value>,
    pub token: String,
}

/// Relying-party hostname for a client origin.
///
/// `localhost` and `127.0.0.1` collapse to `localhost`; anything that does
/// not parse falls back to `localhost` rather than failing the ceremony.
pub fn hostname_from_origin(origin: &str) -> String {
    match Url::parse(origin) {
        Ok(url) => match url.host_str() {
            Some("127.0.0.1") | Some("localhost") => "localhost".to_string(),
            Some(host) => host.to_string(),
            None => "localhost".to_string(),
        },
        Err(_) => "localhost".to_string(),
    }
}

/// WebAuthn registration and authentication ceremonies
pub struct PasskeyService;

impl PasskeyService {
    /// Build the ceremony verifier for one request.
    ///
    /// The expected-origin set is the configured origin plus the request's
    /// own `Origin` header (proxied deployments present both); the RP id
    /// comes from configuration, derived from the configured origin when
    /// not set explicitly.
    fn webauthn_for(config: &Config, request_origin: Option<&str>) -> Result<Webauthn> {
        let rp_origin_raw = config.webauthn.rp_origin.trim();
        let rp_origin = Url::parse(rp_origin_raw).or_else(|_| {
            if rp_origin_raw.contains("://") {
                Err(url::ParseError::RelativeUrlWithoutBase)
            } else {
                Url::parse(&format!("http://{}", rp_origin_raw))
            }
        });
        let rp_origin = rp_origin.map_err(|_| {
            AppError::BadRequest(format!(
                "Invalid rp_origin: {} (expected like http://localhost:1323)",
                rp_origin_raw
            ))
        })?;

        let rp_id = if config.webauthn.rp_id.trim().is_empty() {
            hostname_from_origin(rp_origin.as_str())
        } else {
            config.webauthn.rp_id.trim().to_string()
        };

        let mut builder = WebauthnBuilder::new(&rp_id, &rp_origin)
            .map_err(|_| {
                AppError::BadRequest(format!(
                    "Invalid WebAuthn config (rp_id={}, rp_origin={})",
                    rp_id, rp_origin
                ))
            })?
            .rp_name(&config.webauthn.rp_name);

        if let Some(raw) = request_origin {
            if let Ok(origin) = Url::parse(raw) {
                if origin != rp_origin {
                    builder = builder.append_allowed_origin(&origin);
                }
            }
        }

        let webauthn = builder
            .build()
            .map_err(|e| AppError::Internal(format!("WebAuthn build error: {:?}", e)))?;
        Ok(webauthn)
    }

    /// Start a registration ceremony.
    ///
    /// A known email reuses that account's user id and excludes its existing
    /// credentials from the ceremony; otherwise a fresh user id is minted.
    /// Returns the creation options and the user id the client must echo back.
    pub async fn start_register(
        db: &Database,
        config: &Config,
        request_origin: Option<&str>,
        name: &str,
        email: Option<&str>,
    ) -> Result<(CreationChallengeResponse, String)> {
        let webauthn = Self::webauthn_for(config, request_origin)?;

        let (user_id, exclude) = match email {
            Some(email) => match UserService::find_by_email(db, email).await? {
                Some(user) => {
                    let creds = CredentialStore::find_by_user(db, &user.id).await?;
                    let mut exclude: Vec<CredentialID> = Vec::new();
                    for c in &creds {
                        let pk: Passkey = serde_json::from_str(&c.public_key).map_err(|_| {
                            AppError::Internal("Deserialize passkey failed".to_string())
                        })?;
                        exclude.push(pk.cred_id().clone());
                    }
                    let exclude = if exclude.is_empty() { None } else { Some(exclude) };
                    (user.id, exclude)
                }
                None => (Uuid::new_v4().to_string(), None),
            },
            None => (Uuid::new_v4().to_string(), None),
        };

        let uid = Uuid::parse_str(&user_id)
            .map_err(|_| AppError::Internal("Invalid user id".to_string()))?;

        let (mut ccr, reg_state) = webauthn
            .start_passkey_registration(uid, name, name, exclude)
            .map_err(|e| AppError::BadRequest(format!("start registration failed: {:?}", e)))?;

        ccr.public_key.timeout = Some(CEREMONY_TIMEOUT_MS);
        if let Some(selection) = ccr.public_key.authenticator_selection.as_mut() {
            selection.authenticator_attachment = Some(AuthenticatorAttachment::Platform);
            selection.user_verification = UserVerificationPolicy::Required;
        }

        let session = RegistrationSession {
            state: reg_state,
            name: name.to_string(),
            email: email.map(str::to_string),
        };
        let value = serde_json::to_string(&session)
            .map_err(|_| AppError::Internal("Serialize registration state failed".to_string()))?;
        ChallengeStore::put(
            db,
            &format!("reg:{}", user_id),
            &value,
            config.webauthn.challenge_ttl_secs,
        )
        .await?;

        Ok((ccr, user_id))
    }

    /// Complete a registration ceremony.
    ///
    /// Verifies the attestation against the stored challenge, then commits
    /// user + credential (+ optional initial document) as one batch. The
    /// challenge entry is deleted only on success, so a replay of the same
    /// ceremony fails as an expired session.
    pub async fn finish_register(
        db: &Database,
        config: &Config,
        request_origin: Option<&str>,
        user_id: &str,
        credential: &serde_json::Value,
        local_data: Option<&serde_json::Value>,
    ) -> Result<()> {
        let key = format!("reg:{}", user_id);
        let raw = ChallengeStore::get(db, &key).await?.ok_or_else(|| {
            AppError::SessionExpired("Invalid or expired registration session".to_string())
        })?;
        let session: RegistrationSession = serde_json::from_str(&raw)
            .map_err(|_| AppError::Internal("Deserialize registration state failed".to_string()))?;

        let credential: RegisterPublicKeyCredential = serde_json::from_value(credential.clone())
            .map_err(|_| AppError::BadRequest("Invalid credential response".to_string()))?;

        let webauthn = Self::webauthn_for(config, request_origin)?;
        let passkey = webauthn
            .finish_passkey_registration(&credential, &session.state)
            .map_err(|e| {
                AppError::VerificationFailed(format!("registration verification failed: {:?}", e))
            })?;

        let cred_id = URL_SAFE_NO_PAD.encode(passkey.cred_id());
        let public_key = serde_json::to_string(&passkey)
            .map_err(|_| AppError::Internal("Serialize passkey failed".to_string()))?;

        Self::persist_registration(
            db,
            user_id,
            &session.name,
            session.email.as_deref(),
            &cred_id,
            &public_key,
            local_data,
        )
        .await?;

        ChallengeStore::delete(db, &key).await?;
        tracing::info!("Registered credential {} for user {}", cred_id, user_id);
        Ok(())
    }

    /// Commit the registration rows as a single all-or-nothing batch
    async fn persist_registration(
        db: &Database,
        user_id: &str,
        name: &str,
        email: Option<&str>,
        credential_id: &str,
        public_key: &str,
        local_data: Option<&serde_json::Value>,
    ) -> Result<()> {
        let mut tx = db.pool().begin().await?;
        UserService::insert_tx(tx.as_mut(), user_id, name, email).await?;
        CredentialStore::insert_tx(tx.as_mut(), credential_id, user_id, public_key, 0).await?;
        if let Some(data) = local_data {
            UserDataStore::upsert_tx(
                tx.as_mut(),
                user_id,
                &data.to_string(),
                Utc::now().timestamp_millis(),
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Start a login ceremony.
    ///
    /// An email hint narrows the allow-list to that account's credentials
    /// (and gets the longer scoped TTL); without one, any registered
    /// credential may answer (discoverable flow). Returns the request
    /// options and the ceremony id the client must echo back.
    pub async fn start_login(
        db: &Database,
        config: &Config,
        request_origin: Option<&str>,
        email: Option<&str>,
    ) -> Result<(RequestChallengeResponse, String)> {
        let webauthn = Self::webauthn_for(config, request_origin)?;

        let (creds, ttl) = match email {
            Some(email) => {
                let user = UserService::find_by_email(db, email)
                    .await?
                    .ok_or_else(|| AppError::NotFound("No account for that email".to_string()))?;
                (
                    CredentialStore::find_by_user(db, &user.id).await?,
                    config.webauthn.scoped_challenge_ttl_secs,
                )
            }
            None => (
                CredentialStore::find_all(db).await?,
                config.webauthn.challenge_ttl_secs,
            ),
        };

        let mut passkeys: Vec<Passkey> = Vec::new();
        for c in &creds {
            let pk: Passkey = serde_json::from_str(&c.public_key)
                .map_err(|_| AppError::Internal("Deserialize passkey failed".to_string()))?;
            passkeys.push(pk);
        }
        if passkeys.is_empty() {
            return Err(AppError::BadRequest("No passkeys registered".to_string()));
        }

        let (mut rcr, auth_state) = webauthn
            .start_passkey_authentication(&passkeys)
            .map_err(|e| AppError::BadRequest(format!("start authentication failed: {:?}", e)))?;

        rcr.public_key.timeout = Some(CEREMONY_TIMEOUT_MS);
        rcr.public_key.user_verification = UserVerificationPolicy::Required;

        let ceremony_id = Uuid::new_v4().to_string();
        let session = LoginSession {
            state: auth_state,
            email: email.map(str::to_string),
        };
        let value = serde_json::to_string(&session)
            .map_err(|_| AppError::Internal("Serialize authentication state failed".to_string()))?;
        ChallengeStore::put(db, &format!("login:{}", ceremony_id), &value, ttl).await?;

        Ok((rcr, ceremony_id))
    }

    /// Complete a login ceremony: verify the assertion, persist the new
    /// signature counter, consume the challenge, and issue a session token.
    pub async fn finish_login(
        db: &Database,
        config: &Config,
        request_origin: Option<&str>,
        ceremony_id: &str,
        credential: &serde_json::Value,
    ) -> Result<LoginSuccess> {
        let key = format!("login:{}", ceremony_id);
        let raw = ChallengeStore::get(db, &key).await?.ok_or_else(|| {
            AppError::SessionExpired("Invalid or expired login session".to_string())
        })?;
        let session: LoginSession = serde_json::from_str(&raw).map_err(|_| {
            AppError::Internal("Deserialize authentication state failed".to_string())
        })?;

        let credential: PublicKeyCredential = serde_json::from_value(credential.clone())
            .map_err(|_| AppError::BadRequest("Invalid credential response".to_string()))?;

        let stored = CredentialStore::find_by_credential_id(db, &credential.id)
            .await?
            .ok_or_else(|| AppError::CredentialNotFound("Credential not found".to_string()))?;
        let user = UserService::find_by_id(db, &stored.user_id)
            .await?
            .ok_or_else(|| AppError::Internal("Credential owner missing".to_string()))?;

        if let Some(expected) = session.email.as_deref() {
            if user.email.as_deref() != Some(expected) {
                return Err(AppError::IdentityMismatch(
                    "Unable to login with passkey".to_string(),
                ));
            }
        }

        let webauthn = Self::webauthn_for(config, request_origin)?;
        let result = webauthn
            .finish_passkey_authentication(&credential, &session.state)
            .map_err(|e| AppError::VerificationFailed(format!("authentication failed: {:?}", e)))?;

        let new_counter = result.counter() as i64;
        if stored.sign_counter > 0 && new_counter <= stored.sign_counter {
            // Clone-detection signal; the verifier already rejects regressions
            tracing::warn!(
                "Credential {} reported non-increasing signature counter ({} -> {})",
                stored.id,
                stored.sign_counter,
                new_counter
            );
        }

        let mut passkey: Passkey = serde_json::from_str(&stored.public_key)
            .map_err(|_| AppError::Internal("Deserialize passkey failed".to_string()))?;
        if passkey.update_credential(&result) == Some(true) {
            let refreshed = serde_json::to_string(&passkey)
                .map_err(|_| AppError::Internal("Serialize passkey failed".to_string()))?;
            CredentialStore::update_counter(db, &stored.id, new_counter, &refreshed).await?;
        }

        ChallengeStore::delete(db, &key).await?;

        let token = TokenCodec::issue(
            &user.id,
            user.email.clone(),
            &config.session.secret,
            config.session.ttl_secs,
        )?;
        let (user_data, _) = SyncService::pull(db, &user.id).await?;

        tracing::info!("User {} logged in with credential {}", user.id, stored.id);
        Ok(LoginSuccess {
            user,
            user_data,
            token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use serde_json::json;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.webauthn.rp_origin = "http://localhost:1323".to_string();
        config
    }

    #[test]
    fn hostname_from_origin_maps_loopback_to_localhost() {
        assert_eq!(hostname_from_origin("http://localhost:3000"), "localhost");
        assert_eq!(hostname_from_origin("http://127.0.0.1:8080"), "localhost");
        assert_eq!(hostname_from_origin("https://plm.example.com"), "plm.example.com");
        assert_eq!(hostname_from_origin("not a url"), "localhost");
    }

    #[tokio::test]
    async fn start_register_issues_options_and_stores_challenge() {
        let db = test_db().await;
        let config = test_config();

        let (ccr, user_id) = PasskeyService::start_register(&db, &config, None, "Alice", None)
            .await
            .unwrap();

        assert_eq!(ccr.public_key.timeout, Some(CEREMONY_TIMEOUT_MS));
        let selection = ccr.public_key.authenticator_selection.as_ref().unwrap();
        assert_eq!(
            selection.authenticator_attachment,
            Some(AuthenticatorAttachment::Platform)
        );
        assert_eq!(selection.user_verification, UserVerificationPolicy::Required);

        let stored = ChallengeStore::get(&db, &format!("reg:{}", user_id))
            .await
            .unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn finish_register_without_challenge_is_session_expired() {
        let db = test_db().await;
        let config = test_config();

        let err =
            PasskeyService::finish_register(&db, &config, None, "no-such-user", &json!({}), None)
                .await
                .unwrap_err();
        assert!(matches!(err, AppError::SessionExpired(_)));
    }

    #[tokio::test]
    async fn finish_register_after_challenge_consumed_is_session_expired() {
        let db = test_db().await;
        let config = test_config();

        let (_, user_id) = PasskeyService::start_register(&db, &config, None, "Alice", None)
            .await
            .unwrap();
        ChallengeStore::delete(&db, &format!("reg:{}", user_id))
            .await
            .unwrap();

        let err = PasskeyService::finish_register(&db, &config, None, &user_id, &json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionExpired(_)));
    }

    #[tokio::test]
    async fn finish_register_with_garbage_credential_creates_nothing() {
        let db = test_db().await;
        let config = test_config();

        let (_, user_id) = PasskeyService::start_register(&db, &config, None, "Alice", None)
            .await
            .unwrap();

        let err = PasskeyService::finish_register(
            &db,
            &config,
            None,
            &user_id,
            &json!({"id": "bogus"}),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        assert!(UserService::find_by_id(&db, &user_id).await.unwrap().is_none());
        // The ceremony is still live; only success consumes it
        assert!(ChallengeStore::get(&db, &format!("reg:{}", user_id))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn persist_registration_rolls_back_on_credential_conflict() {
        let db = test_db().await;

        let mut tx = db.pool().begin().await.unwrap();
        UserService::insert_tx(tx.as_mut(), "existing", "Bob", None).await.unwrap();
        tx.commit().await.unwrap();
        CredentialStore::insert(&db, "cred-1", "existing", "{}", 0).await.unwrap();

        let err = PasskeyService::persist_registration(
            &db,
            "fresh",
            "Alice",
            None,
            "cred-1",
            "{}",
            Some(&json!({"tasks": []})),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // No orphaned user or data row from the failed batch
        assert!(UserService::find_by_id(&db, "fresh").await.unwrap().is_none());
        assert!(UserDataStore::get(&db, "fresh").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn start_login_without_credentials_is_bad_request() {
        let db = test_db().await;
        let config = test_config();

        let err = PasskeyService::start_login(&db, &config, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn start_login_for_unknown_email_is_not_found() {
        let db = test_db().await;
        let config = test_config();

        let err = PasskeyService::start_login(&db, &config, None, Some("ghost@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn finish_login_without_session_is_session_expired() {
        let db = test_db().await;
        let config = test_config();

        let err = PasskeyService::finish_login(&db, &config, None, "no-such-ceremony", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionExpired(_)));
    }
}
