//! Client configuration.

use crate::error::ClientError;
use retsio_protocol::{DEFAULT_LOGIN_PATH, RETS_VERSION};
use std::path::PathBuf;
use url::Url;

/// Default event channel capacity per operation.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default `User-Agent` announced to the server.
pub const DEFAULT_USER_AGENT: &str = concat!("retsio/", env!("CARGO_PKG_VERSION"));

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL.
    pub server_url: Url,
    /// Login capability path, the only path known before negotiation.
    pub login_path: String,
    /// `User-Agent` header value for transports that send one.
    pub user_agent: String,
    /// `RETS-Version` header value for transports that send one.
    pub rets_version: String,
    /// Bound on buffered events per operation.
    pub event_capacity: usize,
    /// Metadata cache directory. `None` uses the process temp directory.
    pub cache_dir: Option<PathBuf>,
}

impl ClientConfig {
    /// Parses `server_url`.
    ///
    /// A URL carrying a path (`https://host/rets/login`) uses that path for
    /// Login; a bare host uses [`DEFAULT_LOGIN_PATH`].
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        let server_url = Url::parse(server_url)
            .map_err(|e| ClientError::Config(format!("invalid server URL {:?}: {}", server_url, e)))?;
        if server_url.host_str().is_none() {
            return Err(ClientError::Config(format!(
                "server URL {} has no host",
                server_url
            )));
        }

        let login_path = match server_url.path() {
            "" | "/" => DEFAULT_LOGIN_PATH.to_string(),
            path => path.to_string(),
        };

        Ok(Self {
            server_url,
            login_path,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            rets_version: RETS_VERSION.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            cache_dir: None,
        })
    }

    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_rets_version(mut self, version: impl Into<String>) -> Self {
        self.rets_version = version.into();
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Cache key derived from the server's host identity (`host[:port]`).
    pub fn cache_key(&self) -> String {
        let host = self.server_url.host_str().unwrap_or_default();
        match self.server_url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }
}
