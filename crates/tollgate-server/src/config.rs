use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use tollgate_auth::{Client, OAuthConfig, User};
use tollgate_auth_postgres::PostgresConfig;

/// Top-level server configuration, usually read from `tollgate.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Token lifecycle settings
    #[serde(default)]
    pub auth: OAuthConfig,
    #[serde(default)]
    pub housekeeping: HousekeepingConfig,
    /// Statically registered clients
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
    /// Statically registered users (password grant)
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }

        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }

        if self.storage.backend == StorageBackend::Postgres && self.storage.postgres.url.is_empty()
        {
            return Err("storage.postgres.url is required for the postgres backend".into());
        }

        if self.housekeeping.enabled && self.housekeeping.purge_interval.is_zero() {
            return Err("housekeeping.purge_interval must be > 0".into());
        }

        self.auth.validate().map_err(|e| format!("auth: {e}"))?;

        for entry in &self.clients {
            entry
                .client
                .validate()
                .map_err(|e| format!("clients.{}: {e}", entry.client.client_id))?;
            if entry.client.confidential && entry.secret.as_deref().unwrap_or("").is_empty() {
                return Err(format!(
                    "clients.{}: confidential clients require a secret",
                    entry.client.client_id
                ));
            }
        }

        for entry in &self.users {
            if entry.user.id.is_empty() || entry.user.username.is_empty() {
                return Err("users: id and username are required".into());
            }
        }

        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::new(host, self.server.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

/// Which token store backs the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local store; tokens are lost on restart.
    #[default]
    Memory,
    /// Shared PostgreSQL store.
    Postgres,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub postgres: PostgresConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Background removal of expired codes and tokens.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HousekeepingConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub purge_interval: Duration,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            purge_interval: Duration::from_secs(300),
        }
    }
}

/// A client registration plus its secret.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(flatten)]
    pub client: Client,
    #[serde(default)]
    pub secret: Option<String>,
}

/// A user account plus its password.
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    #[serde(flatten)]
    pub user: User,
    pub password: String,
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Load configuration from `path` (if it exists) and `TOLLGATE__*`
    /// environment overrides, e.g. `TOLLGATE__SERVER__PORT=9090`.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("tollgate.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        builder = builder.add_source(
            Environment::with_prefix("TOLLGATE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_auth::GrantType;

    const SAMPLE: &str = r#"
        [server]
        port = 9000

        [storage]
        backend = "postgres"

        [storage.postgres]
        url = "postgres://tollgate:pw@db:5432/tollgate"
        pool_size = 4

        [auth]
        access_token_lifetime = "15m"
        refresh_token_lifetime = "30d"
        refresh_token_scoping = "client_user_scope"
        grant_types = ["authorization_code", "refresh_token"]

        [[clients]]
        client_id = "web"
        confidential = true
        secret = "s3cret"
        redirect_uris = ["https://app.example.com/cb"]
        grant_types = ["authorization_code", "refresh_token"]

        [[users]]
        id = "u1"
        username = "alice"
        active = true
        password = "wonderland"
    "#;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.addr().port(), 8080);
    }

    #[test]
    fn test_parse_sample() {
        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.storage.backend, StorageBackend::Postgres);
        assert_eq!(config.storage.postgres.pool_size, 4);
        assert_eq!(config.auth.access_token_lifetime, Duration::from_secs(900));
        assert_eq!(
            config.auth.refresh_token_lifetime,
            Some(Duration::from_secs(30 * 24 * 3600))
        );
        assert!(!config.auth.is_grant_type_enabled(GrantType::Password));

        let web = &config.clients[0];
        assert_eq!(web.client.client_id, "web");
        assert!(web.client.active);
        assert_eq!(web.secret.as_deref(), Some("s3cret"));
        assert_eq!(config.users[0].user.username, "alice");
    }

    #[test]
    fn test_confidential_client_needs_secret() {
        let mut config: AppConfig = toml::from_str(SAMPLE).unwrap();
        config.clients[0].secret = None;
        let err = config.validate().unwrap_err();
        assert!(err.contains("secret"));
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.logging.level = "verbose".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.storage.backend = StorageBackend::Postgres;
        config.storage.postgres.url.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.auth.grant_types.clear();
        assert!(config.validate().unwrap_err().starts_with("auth:"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = loader::load_config(Some("/nonexistent/tollgate.toml")).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
    }
}
