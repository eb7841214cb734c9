//! Gateway configuration.
//!
//! Sources, later overriding earlier:
//! 1. Built-in defaults
//! 2. `<data_dir>/config.yaml` (optional), or an explicit file (required)
//! 3. `LGH_`-prefixed environment variables

use ::config::{Config as ConfigLib, Environment, File, FileFormat};
use lgh_events::LOG_FILE_NAME;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 9418;

/// Default bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "LGH";

const CONFIG_FILE_NAME: &str = "config.yaml";
const PID_FILE_NAME: &str = "lgh.pid";
const SOCKET_FILE_NAME: &str = "lgh.sock";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    /// The configuration is unsafe or inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listen port.
    pub port: u16,
    /// HTTP bind address.
    pub bind_address: String,
    /// Root holding the bare repositories. Defaults to `<data_dir>/repos`.
    pub repos_dir: Option<PathBuf>,
    /// State directory (event log, socket, PID file).
    pub data_dir: PathBuf,
    /// Reject push requests.
    pub read_only: bool,
    /// Require HTTP Basic authentication.
    pub auth_enabled: bool,
    pub auth_user: String,
    /// `salt:hash`, or a legacy unsalted SHA-256 hex digest.
    pub auth_password_hash: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log format (`pretty` or `json`).
    pub log_format: String,
    /// Permit a network bind without authentication or read-only mode.
    pub allow_unsafe: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            repos_dir: None,
            data_dir: default_data_dir(),
            read_only: false,
            auth_enabled: false,
            auth_user: String::new(),
            auth_password_hash: String::new(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            allow_unsafe: false,
        }
    }
}

/// `~/.localgithub`, or `.localgithub` when no home directory is known.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".localgithub"))
        .unwrap_or_else(|| PathBuf::from(".localgithub"))
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// `path` names an explicit configuration file, which must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load configuration with an explicit environment map in place of the
    /// process environment.
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).format(FileFormat::Yaml).required(true),
            None => File::from(default_data_dir().join(CONFIG_FILE_NAME))
                .format(FileFormat::Yaml)
                .required(false),
        };

        let legacy_auth = match &env {
            Some(vars) => legacy_auth_enabled(|k| vars.get(k).cloned()),
            None => legacy_auth_enabled(|k| std::env::var(k).ok()),
        };

        let settings = ConfigLib::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        // Missing keys fall back to `Config::default()`.
        let mut config: Config = settings.try_deserialize()?;
        if legacy_auth {
            config.auth_enabled = true;
        }
        Ok(config)
    }

    /// Root holding the bare repositories.
    pub fn repos_dir(&self) -> PathBuf {
        self.repos_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("repos"))
    }

    /// Directory of the event log.
    pub fn events_dir(&self) -> PathBuf {
        self.data_dir.join("events")
    }

    /// Active event log file.
    pub fn event_log_path(&self) -> PathBuf {
        self.events_dir().join(LOG_FILE_NAME)
    }

    /// Local event stream socket.
    pub fn socket_path(&self) -> PathBuf {
        self.data_dir.join(SOCKET_FILE_NAME)
    }

    /// PID file written while the gateway runs.
    pub fn pid_path(&self) -> PathBuf {
        self.data_dir.join(PID_FILE_NAME)
    }

    /// Base URL of the local gateway.
    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.bind_address, self.port)
    }

    /// Whether the bind address only accepts local connections.
    pub fn is_loopback_bind(&self) -> bool {
        matches!(self.bind_address.as_str(), "127.0.0.1" | "localhost" | "::1")
    }

    /// Check the configuration before serving.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".to_string()));
        }
        if self.auth_enabled && (self.auth_user.is_empty() || self.auth_password_hash.is_empty()) {
            return Err(ConfigError::Invalid(
                "authentication is enabled but auth_user or auth_password_hash is missing"
                    .to_string(),
            ));
        }
        if !self.is_loopback_bind() && !self.auth_enabled && !self.read_only && !self.allow_unsafe {
            return Err(ConfigError::Invalid(format!(
                "binding to {} exposes the gateway to the network without protection; \
                 enable authentication, read-only mode, or allow_unsafe",
                self.bind_address
            )));
        }
        Ok(())
    }
}

/// Both legacy auth variables set and non-empty.
fn legacy_auth_enabled(get: impl Fn(&str) -> Option<String>) -> bool {
    let set = |key: &str| get(key).map_or(false, |v| !v.is_empty());
    set("LGH_AUTH_USER") && set("LGH_AUTH_PASSWORD_HASH")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(yaml: Option<&str>, env: &[(&str, &str)]) -> Result<Config> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        match yaml {
            Some(yaml) => {
                std::fs::write(&path, yaml).unwrap();
                Config::load_with_env(Some(&path), Some(env))
            }
            None => Config::load_with_env(None, Some(env)),
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 9418);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert!(config.data_dir.ends_with(".localgithub"));
        assert_eq!(config.repos_dir(), config.data_dir.join("repos"));
        assert_eq!(
            config.event_log_path(),
            config.data_dir.join("events").join("events.jsonl")
        );
        assert_eq!(config.socket_path(), config.data_dir.join("lgh.sock"));
        assert_eq!(config.pid_path(), config.data_dir.join("lgh.pid"));
        assert_eq!(config.server_url(), "http://127.0.0.1:9418");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_file() {
        let config = load(
            Some("port: 8080\nread_only: true\ndata_dir: /tmp/lgh-data\n"),
            &[],
        )
        .unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.read_only);
        assert_eq!(config.repos_dir(), PathBuf::from("/tmp/lgh-data/repos"));
        assert_eq!(config.bind_address, "127.0.0.1");
    }

    #[test]
    fn test_env_overrides_file() {
        let config = load(Some("port: 8080\n"), &[("LGH_PORT", "9000")]).unwrap();
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let result = Config::load_with_env(
            Some(Path::new("/nonexistent/lgh/config.yaml")),
            Some(HashMap::new()),
        );
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_legacy_env_auth() {
        let config = load(
            None,
            &[
                ("LGH_AUTH_USER", "alice"),
                ("LGH_AUTH_PASSWORD_HASH", "salt:abcdef"),
            ],
        )
        .unwrap();
        assert!(config.auth_enabled);
        assert_eq!(config.auth_user, "alice");
        assert_eq!(config.auth_password_hash, "salt:abcdef");

        let config = load(None, &[("LGH_AUTH_USER", "alice")]).unwrap();
        assert!(!config.auth_enabled);
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.auth_enabled = true;
        assert!(config.validate().is_err());
        config.auth_user = "alice".to_string();
        config.auth_password_hash = "salt:hash".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_network_bind() {
        let mut config = Config::default();
        config.bind_address = "0.0.0.0".to_string();
        assert!(config.validate().is_err());

        config.read_only = true;
        assert!(config.validate().is_ok());

        config.read_only = false;
        config.allow_unsafe = true;
        assert!(config.validate().is_ok());
    }
}
