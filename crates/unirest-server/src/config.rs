use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};
use unirest_filter::{CompilerSettings, MAX_OR_VALUES};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Remote API connection settings
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Connection cache tuning
    #[serde(default)]
    pub connections: ConnectionsConfig,
    /// Filter compilation settings
    #[serde(default)]
    pub filter: CompilerSettings,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

const MAX_TTL_SECS: u64 = 24 * 60 * 60;

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Remote validations
        if self.remote.backend == RemoteBackend::Http {
            let url = self.remote.base_url.as_deref().unwrap_or("");
            if url.is_empty() {
                return Err("remote.backend=http requires remote.base_url".into());
            }
        }
        if self.remote.timeout_ms == 0 {
            return Err("remote.timeout_ms must be > 0".into());
        }
        // Connection cache validations
        if self.connections.ttl_secs == 0 || self.connections.ttl_secs > MAX_TTL_SECS {
            return Err(format!(
                "connections.ttl_secs must be between 1 and {MAX_TTL_SECS}"
            ));
        }
        if self.connections.max_waiters == 0 {
            return Err("connections.max_waiters must be > 0".into());
        }
        if self.connections.login_attempts == 0 {
            return Err("connections.login_attempts must be > 0".into());
        }
        if self.connections.max_entries == 0 {
            return Err("connections.max_entries must be > 0".into());
        }
        // Filter validations
        if self.filter.or_limit == 0 || self.filter.or_limit > MAX_OR_VALUES {
            return Err(format!(
                "filter.or_limit must be between 1 and {MAX_OR_VALUES}"
            ));
        }
        if self.filter.raw_query_key.trim().is_empty() {
            return Err("filter.raw_query_key must not be empty".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
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
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
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
    4 * 1024 * 1024
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

/// Which remote backend sessions are opened against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
    #[default]
    Http,
    /// Process-local backend seeded from `remote.accounts` / `remote.companies`
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub backend: RemoteBackend,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Partner key sent with every login.
    #[serde(default)]
    pub affiliate_key: Uuid,
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub companies: Vec<CompanyConfig>,
}

fn default_remote_timeout_ms() -> u64 {
    30_000
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: RemoteBackend::default(),
            base_url: None,
            affiliate_key: Uuid::nil(),
            timeout_ms: default_remote_timeout_ms(),
            accounts: Vec::new(),
            companies: Vec::new(),
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyConfig {
    pub id: i32,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionsConfig {
    /// Session lifetime. Defaults to 30 minutes; 30 to 60 minutes suits the
    /// remote API, but anything from 1 second to 24 hours is accepted so tests
    /// and unusual deployments can tune it.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Callers allowed to queue behind one credential's login.
    #[serde(default = "default_max_waiters")]
    pub max_waiters: usize,
    #[serde(default = "default_login_attempts")]
    pub login_attempts: u32,
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
}

fn default_ttl_secs() -> u64 {
    30 * 60
}
fn default_max_waiters() -> usize {
    20
}
fn default_login_attempts() -> u32 {
    5
}
fn default_max_entries() -> u64 {
    10_000
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_waiters: default_max_waiters(),
            login_attempts: default_login_attempts(),
            max_entries: default_max_entries(),
        }
    }
}

impl ConnectionsConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchemaConfig {
    /// Optional TOML file with additional entity schemas.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
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

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Load configuration from a TOML file overlaid with `UNIREST__*` variables.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("unirest.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., UNIREST__CONNECTIONS__TTL_SECS=3600
        builder = builder.add_source(
            Environment::with_prefix("UNIREST")
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
    use unirest_filter::OverflowStrategy;

    fn memory_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.remote.backend = RemoteBackend::Memory;
        cfg
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.connections.ttl(), Duration::from_secs(1800));
        assert_eq!(cfg.connections.max_waiters, 20);
        assert_eq!(cfg.connections.login_attempts, 5);
        assert_eq!(cfg.filter.or_limit, 40);
        assert_eq!(cfg.filter.overflow, OverflowStrategy::ServerFold);
    }

    #[test]
    fn http_backend_needs_base_url() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().unwrap_err().contains("base_url"));
        assert!(memory_config().validate().is_ok());
    }

    #[test]
    fn ttl_bounds_are_enforced() {
        let mut cfg = memory_config();
        cfg.connections.ttl_secs = 0;
        assert!(cfg.validate().is_err());
        cfg.connections.ttl_secs = MAX_TTL_SECS + 1;
        assert!(cfg.validate().is_err());
        cfg.connections.ttl_secs = 3600;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn or_limit_is_capped_at_remote_limit() {
        let mut cfg = memory_config();
        cfg.filter.or_limit = MAX_OR_VALUES;
        assert!(cfg.validate().is_ok());
        cfg.filter.or_limit = 100;
        assert!(cfg.validate().unwrap_err().contains("filter.or_limit"));
        cfg.filter.or_limit = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn account_debug_hides_password() {
        let account = AccountConfig {
            username: "alice".into(),
            password: "hunter2".into(),
        };
        let out = format!("{account:?}");
        assert!(out.contains("alice"));
        assert!(!out.contains("hunter2"));
    }
}
