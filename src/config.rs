use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub webauthn: WebAuthnConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

/// Session token settings (HS256 signing secret and cookie lifetime)
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_secret")]
    pub secret: String,
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: i64,
    #[serde(default)]
    pub cookie_secure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebAuthnConfig {
    #[serde(default = "default_rp_name")]
    pub rp_name: String,
    /// Relying party id. Empty means "derive from rp_origin".
    #[serde(default)]
    pub rp_id: String,
    #[serde(default = "default_rp_origin")]
    pub rp_origin: String,
    #[serde(default = "default_challenge_ttl")]
    pub challenge_ttl_secs: i64,
    /// TTL for email-scoped login ceremonies.
    #[serde(default = "default_scoped_challenge_ttl")]
    pub scoped_challenge_ttl_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// When false, sync endpoints accept an explicit ?userId= (local/dev flows).
    #[serde(default = "default_require_session_token")]
    pub require_session_token: bool,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1323
}

fn default_db_path() -> String {
    "data/plm.db".to_string()
}

fn default_session_secret() -> String {
    // Replaced by a generated, persisted secret on first start
    "change-this-session-secret".to_string()
}

fn default_session_ttl() -> i64 {
    604800 // 7 days
}

fn default_rp_name() -> String {
    "Personal Life Manager".to_string()
}

fn default_rp_origin() -> String {
    "http://localhost:1323".to_string()
}

fn default_challenge_ttl() -> i64 {
    300 // 5 minutes
}

fn default_scoped_challenge_ttl() -> i64 {
    600 // 10 minutes
}

fn default_require_session_token() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: default_session_secret(),
            ttl_secs: default_session_ttl(),
            cookie_secure: false,
        }
    }
}

impl Default for WebAuthnConfig {
    fn default() -> Self {
        Self {
            rp_name: default_rp_name(),
            rp_id: String::new(),
            rp_origin: default_rp_origin(),
            challenge_ttl_secs: default_challenge_ttl(),
            scoped_challenge_ttl_secs: default_scoped_challenge_ttl(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            require_session_token: default_require_session_token(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            session: SessionConfig::default(),
            webauthn: WebAuthnConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.ensure_directories()?;
        config.ensure_session_secret()?;
        tracing::info!(
            "WebAuthn config: rp_id={}, rp_origin={}, rp_name={}",
            if config.webauthn.rp_id.is_empty() { "<derived>" } else { &config.webauthn.rp_id },
            config.webauthn.rp_origin,
            config.webauthn.rp_name
        );
        Ok(config)
    }

    /// Ensure the token-signing secret is not the placeholder and is persisted
    fn ensure_session_secret(&mut self) -> anyhow::Result<()> {
        if self.session.secret == default_session_secret() || self.session.secret.is_empty() {
            let secret_path = Path::new("data/.session_secret");

            if secret_path.exists() {
                let secret = fs::read_to_string(secret_path)?;
                self.session.secret = secret.trim().to_string();
                tracing::info!("Loaded persisted session secret from data/.session_secret");
            } else {
                let secret = uuid::Uuid::new_v4().to_string();

                if let Some(parent) = secret_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                fs::write(secret_path, &secret)?;
                self.session.secret = secret;
                tracing::info!("Generated and persisted new session secret to data/.session_secret");
            }
        }
        Ok(())
    }

    /// Load configuration from conf.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["conf.toml", "config.toml", "data/conf.toml", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: PLM_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        // Server overrides
        if let Ok(val) = env::var("PLM_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = env::var("PLM_CONF_SERVER_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }

        // Database overrides
        if let Ok(val) = env::var("PLM_CONF_DATABASE_PATH") {
            self.database.path = val;
        }

        // Session overrides
        if let Ok(val) = env::var("PLM_CONF_SESSION_SECRET") {
            self.session.secret = val;
        }
        if let Ok(val) = env::var("PLM_CONF_SESSION_TTL") {
            if let Ok(secs) = val.parse() {
                self.session.ttl_secs = secs;
            }
        }
        if let Ok(val) = env::var("PLM_CONF_SESSION_COOKIE_SECURE") {
            if let Ok(v) = val.parse() {
                self.session.cookie_secure = v;
            }
        }

        // WebAuthn overrides
        if let Ok(val) = env::var("PLM_CONF_WEBAUTHN_RP_ID") {
            if !val.trim().is_empty() {
                self.webauthn.rp_id = val;
            }
        }
        if let Ok(val) = env::var("PLM_CONF_WEBAUTHN_RP_NAME") {
            if !val.trim().is_empty() {
                self.webauthn.rp_name = val;
            }
        }
        if let Ok(val) = env::var("PLM_CONF_WEBAUTHN_RP_ORIGIN") {
            if !val.trim().is_empty() {
                self.webauthn.rp_origin = val;
            }
        }
        if let Ok(val) = env::var("PLM_CONF_WEBAUTHN_CHALLENGE_TTL") {
            if let Ok(secs) = val.parse() {
                self.webauthn.challenge_ttl_secs = secs;
            }
        }

        // Sync overrides
        if let Ok(val) = env::var("PLM_CONF_SYNC_REQUIRE_SESSION_TOKEN") {
            if let Ok(v) = val.parse() {
                self.sync.require_session_token = v;
            }
        }
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if self.database.path != ":memory:" {
            if let Some(parent) = Path::new(&self.database.path).parent() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}
