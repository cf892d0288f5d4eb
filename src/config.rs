//! Command-line configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via RETSIO_CONFIG or --config)
//! 3. Environment variables
//! 4. Command-line flags

use retsio_client::{ClientConfig, ClientError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "RETSIO_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// CLI configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
}

/// Server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Login URL or bare server URL.
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub user_agent: Option<String>,
    pub rets_version: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            user_agent: None,
            rets_version: None,
            timeout_secs: 120,
        }
    }
}

/// Metadata cache settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory. Defaults to the process temp directory.
    pub dir: Option<PathBuf>,
}

impl Config {
    /// Loads the file named by `path` or RETSIO_CONFIG, then applies
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match std::env::var(CONFIG_ENV) {
                Ok(path) => Self::from_file(&path)?,
                Err(_) => Self::default(),
            },
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))
    }

    /// Applies overrides from `lookup`, normally the process environment.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(url) = non_empty("RETSIO_URL") {
            self.server.url = Some(url);
        }
        if let Some(username) = non_empty("RETS_USERNAME") {
            self.server.username = Some(username);
        }
        if let Some(password) = lookup("RETS_USERPASSWORD") {
            self.server.password = Some(password);
        }
        if let Some(user_agent) = non_empty("RETSIO_USER_AGENT") {
            self.server.user_agent = Some(user_agent);
        }
        if let Some(dir) = non_empty("RETSIO_CACHE_DIR") {
            self.cache.dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = non_empty("RETSIO_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.server.timeout_secs = secs;
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.server.timeout_secs)
    }

    /// Builds the client configuration.
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let url = self.server.url.as_deref().ok_or_else(|| {
            ConfigError::Invalid("no server URL (set --url, RETSIO_URL or server.url)".into())
        })?;
        let mut config = ClientConfig::new(url).map_err(|e| match e {
            ClientError::Config(msg) => ConfigError::Invalid(msg),
            other => ConfigError::Invalid(other.to_string()),
        })?;
        if let Some(ref user_agent) = self.server.user_agent {
            config = config.with_user_agent(user_agent);
        }
        if let Some(ref version) = self.server.rets_version {
            config = config.with_rets_version(version);
        }
        if let Some(ref dir) = self.cache.dir {
            config = config.with_cache_dir(dir);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.server.url.is_none());
        assert_eq!(config.server.timeout_secs, 120);
        assert!(config.cache.dir.is_none());
        assert!(matches!(
            config.client_config(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  url: https://rets.example.com/Login.asmx/Login\n  username: jdoe\ncache:\n  dir: /var/cache/retsio"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.username.as_deref(), Some("jdoe"));
        assert_eq!(config.server.timeout_secs, 120);

        let client = config.client_config().unwrap();
        assert_eq!(client.login_path, "/Login.asmx/Login");
        assert_eq!(client.cache_dir, Some(PathBuf::from("/var/cache/retsio")));
    }

    #[test]
    fn test_bad_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "server: [not, a, map").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Parse(_, _))
        ));
        assert!(matches!(
            Config::from_file("/nonexistent/retsio.yaml"),
            Err(ConfigError::Io(_, _))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.server.username = Some("file-user".to_string());

        config.apply_overrides(env(&[
            ("RETSIO_URL", "https://rets.example.com"),
            ("RETS_USERNAME", "env-user"),
            ("RETS_USERPASSWORD", "secret"),
            ("RETSIO_USER_AGENT", "MyApp/1.0"),
            ("RETSIO_CACHE_DIR", "/tmp/rets"),
        ]));

        assert_eq!(config.server.username.as_deref(), Some("env-user"));
        assert_eq!(config.server.password.as_deref(), Some("secret"));

        let client = config.client_config().unwrap();
        assert_eq!(client.user_agent, "MyApp/1.0");
        assert_eq!(client.cache_dir, Some(PathBuf::from("/tmp/rets")));
    }

    #[test]
    fn test_empty_env_ignored() {
        let mut config = Config::default();
        config.server.url = Some("https://a.example.com".to_string());
        config.apply_overrides(env(&[("RETSIO_URL", ""), ("RETSIO_TIMEOUT", "abc")]));
        assert_eq!(config.server.url.as_deref(), Some("https://a.example.com"));
        assert_eq!(config.server.timeout_secs, 120);
    }
}
