use std::{env, net::SocketAddr};

/// Minimum length of `SESSION_SECRET`; the cookie signing key needs 64 bytes.
pub const MIN_SESSION_SECRET_LEN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable {0}")]
    Missing(&'static str),

    #[error("SESSION_SECRET must be at least 64 bytes long")]
    SessionSecretTooShort,

    #[error("Invalid bind address: {0}")]
    InvalidBindAddr(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub rc_client_id: String,
    pub rc_client_secret: String,
    pub session_secret: String,
    pub base_url: String,
    pub provider_url: String,
    pub bind_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
        let bind_addr = bind_addr
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddr(bind_addr))?;

        let config = Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:rcdir.db".to_string()),
            rc_client_id: required("RC_CLIENT_ID")?,
            rc_client_secret: required("RC_CLIENT_SECRET")?,
            session_secret: required("SESSION_SECRET")?,
            base_url: env::var("BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            provider_url: env::var("PROVIDER_URL")
                .unwrap_or_else(|_| "https://www.recurse.com".to_string()),
            bind_addr,
        };
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_secret.len() < MIN_SESSION_SECRET_LEN {
            return Err(ConfigError::SessionSecretTooShort);
        }
        Ok(())
    }

    /// Cookies are only marked `Secure` when the app is served over https.
    pub fn secure_cookies(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}
