//! Service configuration (OPERATOR settings only): loaded from an optional
//! TOML file, then overridden by environment variables, with secrets read
//! from files rather than inline values.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_PORT: u16 = 9013;

/// Which ballot store implementation a role (fast or long) is wired to.
/// The same three-way choice is available for either role; only the
/// defaults differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Keyspace,
    Relational,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// A single-instance deployment skips the voted-index reload task.
    #[serde(default)]
    pub single_instance: bool,

    #[serde(default = "default_fast_backend_kind")]
    pub fast_backend_kind: BackendKind,

    #[serde(default = "default_long_backend_kind")]
    pub long_backend_kind: BackendKind,

    #[serde(default)]
    pub datastore: DatastoreConfig,

    #[serde(default)]
    pub keyspace: KeyspaceConfig,

    #[serde(default)]
    pub relational: RelationalConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Disables TLS and other hardening for local development.
    #[serde(default)]
    pub development: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreConfig {
    #[serde(default = "default_datastore_url")]
    pub url: String,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            url: default_datastore_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyspaceConfig {
    #[serde(default = "default_keyspace_host")]
    pub host: String,
    #[serde(default = "default_keyspace_port")]
    pub port: u16,
}

impl Default for KeyspaceConfig {
    fn default() -> Self {
        Self {
            host: default_keyspace_host(),
            port: default_keyspace_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationalConfig {
    #[serde(default = "default_relational_host")]
    pub host: String,
    #[serde(default = "default_relational_port")]
    pub port: u16,
    #[serde(default = "default_relational_user")]
    pub user: String,
    #[serde(default = "default_relational_name")]
    pub name: String,
    /// Path to a file holding the password, never the password itself.
    pub password_file: Option<PathBuf>,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            host: default_relational_host(),
            port: default_relational_port(),
            user: default_relational_user(),
            name: default_relational_name(),
            password_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_fast_backend_kind() -> BackendKind {
    BackendKind::Keyspace
}
fn default_long_backend_kind() -> BackendKind {
    BackendKind::Relational
}
fn default_datastore_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_keyspace_host() -> String {
    "localhost".to_string()
}
fn default_keyspace_port() -> u16 {
    6379
}
fn default_relational_host() -> String {
    "localhost".to_string()
}
fn default_relational_port() -> u16 {
    5432
}
fn default_relational_user() -> String {
    "vote".to_string()
}
fn default_relational_name() -> String {
    "vote".to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn parse_backend_kind(value: &str) -> Option<BackendKind> {
    match value.to_ascii_lowercase().as_str() {
        "memory" => Some(BackendKind::Memory),
        "keyspace" => Some(BackendKind::Keyspace),
        "relational" => Some(BackendKind::Relational),
        _ => None,
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            single_instance: false,
            fast_backend_kind: default_fast_backend_kind(),
            long_backend_kind: default_long_backend_kind(),
            datastore: DatastoreConfig::default(),
            keyspace: KeyspaceConfig::default(),
            relational: RelationalConfig::default(),
            logging: LoggingConfig::default(),
            development: false,
        }
    }
}

impl ServiceConfig {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file '{}': {e}", path.display()))?;
        toml::from_str(&contents)
            .map_err(|e| format!("failed to parse config file '{}': {e}", path.display()).into())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("VOTE_SERVICE_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
        if let Ok(flag) = std::env::var("VOTE_SERVICE_SINGLE_INSTANCE") {
            self.single_instance = flag == "1" || flag.eq_ignore_ascii_case("true");
        }
        if let Ok(kind) = std::env::var("VOTE_SERVICE_FAST_BACKEND_KIND") {
            if let Some(kind) = parse_backend_kind(&kind) {
                self.fast_backend_kind = kind;
            }
        }
        if let Ok(kind) = std::env::var("VOTE_SERVICE_LONG_BACKEND_KIND") {
            if let Some(kind) = parse_backend_kind(&kind) {
                self.long_backend_kind = kind;
            }
        }
        if let Ok(url) = std::env::var("VOTE_SERVICE_DATASTORE_URL") {
            self.datastore.url = url;
        }
        if let Ok(host) = std::env::var("VOTE_SERVICE_KEYSPACE_HOST") {
            self.keyspace.host = host;
        }
        if let Ok(host) = std::env::var("VOTE_SERVICE_RELATIONAL_HOST") {
            self.relational.host = host;
        }
        if let Ok(level) = std::env::var("VOTE_SERVICE_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Read the relational store password from its secret file, if configured.
    pub fn relational_password(&self) -> Result<Option<String>, Box<dyn std::error::Error>> {
        match &self.relational.password_file {
            None => Ok(None),
            Some(path) => Ok(Some(
                fs::read_to_string(path)
                    .map_err(|e| format!("failed to read password file '{}': {e}", path.display()))?
                    .trim_end()
                    .to_string(),
            )),
        }
    }

    pub fn relational_url(&self) -> Result<String, Box<dyn std::error::Error>> {
        let password = self.relational_password()?.unwrap_or_default();
        Ok(format!(
            "postgres://{}:{}@{}:{}/{}",
            self.relational.user, password, self.relational.host, self.relational.port, self.relational.name
        ))
    }

    pub fn keyspace_url(&self) -> String {
        format!("redis://{}:{}", self.keyspace.host, self.keyspace.port)
    }

    pub fn generate_default_toml() -> String {
        format!(
            r#"# vote-service configuration (operator settings only)

port = {port}
single_instance = false
fast_backend_kind = "keyspace"
long_backend_kind = "relational"

[datastore]
url = "http://localhost:8000"

[keyspace]
host = "localhost"
port = 6379

[relational]
host = "localhost"
port = 5432
user = "vote"
name = "vote"
# password_file = "/run/secrets/vote-db-password"

[logging]
level = "info"
"#,
            port = DEFAULT_PORT
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_sane() {
        let config = ServiceConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(!config.single_instance);
        assert_eq!(config.fast_backend_kind, BackendKind::Keyspace);
        assert_eq!(config.long_backend_kind, BackendKind::Relational);
        assert_eq!(config.keyspace.port, 6379);
        assert_eq!(config.relational.port, 5432);
    }

    #[test]
    fn load_from_generated_default_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, ServiceConfig::generate_default_toml()).unwrap();

        let config = ServiceConfig::load(Some(&path)).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.relational.user, "vote");
    }

    #[test]
    fn missing_fields_use_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "port = 9999\n").unwrap();

        let config = ServiceConfig::load(Some(&path)).unwrap();
        assert_eq!(config.port, 9999);
        assert_eq!(config.keyspace.host, "localhost");
    }

    #[test]
    fn relational_password_defaults_to_none() {
        let config = ServiceConfig::default();
        assert_eq!(config.relational_password().unwrap(), None);
    }

    #[test]
    fn fast_backend_kind_can_be_overridden_to_memory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "fast_backend_kind = \"memory\"\n").unwrap();

        let config = ServiceConfig::load(Some(&path)).unwrap();
        assert_eq!(config.fast_backend_kind, BackendKind::Memory);
        assert_eq!(config.long_backend_kind, BackendKind::Relational);
    }
}
