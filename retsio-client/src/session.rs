//! Negotiated session state.

use retsio_cache::CacheStamp;
use retsio_protocol::{InfoToken, Operation};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use url::Url;

/// Setting carrying the server's metadata version.
pub const METADATA_VERSION: &str = "MetadataVersion";

/// Setting carrying the server's metadata timestamp.
pub const METADATA_TIMESTAMP: &str = "MetadataTimestamp";

/// Login state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    Negotiating,
    Ready,
    Failed,
}

/// Settings and capability paths negotiated with one server.
#[derive(Debug, Clone)]
pub struct Session {
    server_url: Url,
    state: SessionState,
    settings: HashMap<String, InfoToken>,
    capabilities: BTreeMap<Operation, String>,
}

impl Session {
    /// Creates a session whose capability table holds only the Login path.
    pub fn new(server_url: Url, login_path: impl Into<String>) -> Self {
        let mut capabilities = BTreeMap::new();
        capabilities.insert(Operation::Login, login_path.into());
        Self {
            server_url,
            state: SessionState::Unauthenticated,
            settings: HashMap::new(),
            capabilities,
        }
    }

    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!("Session {:?} -> {:?}", self.state, state);
        }
        self.state = state;
    }

    /// Records a setting; a later token with the same name replaces it.
    pub fn set_setting(&mut self, token: InfoToken) {
        self.settings.insert(token.name.clone(), token);
    }

    /// Records a capability path; the last advertisement wins.
    pub fn set_capability(&mut self, operation: Operation, path: impl Into<String>) {
        self.capabilities.insert(operation, path.into());
    }

    pub fn capability(&self, operation: Operation) -> Option<&str> {
        self.capabilities.get(&operation).map(String::as_str)
    }

    pub fn capabilities(&self) -> &BTreeMap<Operation, String> {
        &self.capabilities
    }

    /// Looks up a setting by exact name, then case-insensitively.
    pub fn setting(&self, name: &str) -> Option<&InfoToken> {
        self.settings.get(name).or_else(|| {
            self.settings
                .values()
                .find(|token| token.name.eq_ignore_ascii_case(name))
        })
    }

    pub fn settings(&self) -> &HashMap<String, InfoToken> {
        &self.settings
    }

    /// The live metadata (version, timestamp) pair from negotiated settings.
    pub fn metadata_stamp(&self) -> CacheStamp {
        CacheStamp::from_settings(
            self.setting(METADATA_VERSION).map(|t| t.value.as_str()),
            self.setting(METADATA_TIMESTAMP).map(|t| t.value.as_str()),
        )
    }
}
