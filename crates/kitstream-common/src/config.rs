//! Stream configuration.
//!
//! Read from a JSON file in the `stream.config.json` layout used by the web
//! front-end, then overridden from `KITSTREAM_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::helpers::{env_string, normalize_server};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_PROOF_OF_LIFE_INTERVAL_MS: u64 = 3_000;
/// 180 polls at the default interval is half an hour of provisioning.
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 180;
pub const DEFAULT_MAX_POLL_ERRORS: u32 = 3;

pub const DEFAULT_LOCAL_SERVER: &str = "127.0.0.1";
pub const DEFAULT_LOCAL_SIGNALING_PORT: u16 = 49100;
pub const DEFAULT_LOCAL_MEDIA_PORT: u16 = 1024;

/// Where the stream comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceMode {
    /// Identity-gated cloud streaming; the user has to log in first.
    Gfn,
    /// Sessions allocated through the streaming control plane.
    #[default]
    Stream,
    /// Direct connection to a Kit instance, no control plane.
    Local,
    Other(String),
}

impl SourceMode {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gfn" => Self::Gfn,
            "stream" => Self::Stream,
            "local" => Self::Local,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Gfn => "gfn",
            Self::Stream => "stream",
            Self::Local => "local",
            Self::Other(other) => other,
        }
    }

    /// Login callbacks only mean something in this mode.
    pub fn is_identity_gated(&self) -> bool {
        matches!(self, Self::Gfn)
    }
}

impl From<String> for SourceMode {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<SourceMode> for String {
    fn from(value: SourceMode) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for SourceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamServers {
    /// Base URL of the application catalog (`/cfg/apps`).
    #[serde(default)]
    pub app_server: String,
    /// Base URL of the session control plane (`/streaming/stream`).
    #[serde(default)]
    pub stream_server: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GfnConfig {
    #[serde(default)]
    pub catalog_client_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub cms_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalConfig {
    #[serde(default = "default_local_server")]
    pub server: String,
    #[serde(default = "default_local_signaling_port")]
    pub signaling_port: u16,
    #[serde(default = "default_local_media_port")]
    pub media_port: u16,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            server: default_local_server(),
            signaling_port: DEFAULT_LOCAL_SIGNALING_PORT,
            media_port: DEFAULT_LOCAL_MEDIA_PORT,
        }
    }
}

fn default_local_server() -> String {
    DEFAULT_LOCAL_SERVER.to_string()
}

fn default_local_signaling_port() -> u16 {
    DEFAULT_LOCAL_SIGNALING_PORT
}

fn default_local_media_port() -> u16 {
    DEFAULT_LOCAL_MEDIA_PORT
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_proof_of_life_interval_ms() -> u64 {
    DEFAULT_PROOF_OF_LIFE_INTERVAL_MS
}

fn default_max_poll_attempts() -> Option<u32> {
    Some(DEFAULT_MAX_POLL_ATTEMPTS)
}

fn default_max_poll_errors() -> u32 {
    DEFAULT_MAX_POLL_ERRORS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    #[serde(default)]
    pub source: SourceMode,
    #[serde(default)]
    pub stream: StreamServers,
    #[serde(default)]
    pub gfn: GfnConfig,
    #[serde(default)]
    pub local: LocalConfig,
    /// Opaque token handed to the control plane and the streaming client.
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_proof_of_life_interval_ms")]
    pub proof_of_life_interval_ms: u64,
    /// `null` polls forever.
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: Option<u32>,
    #[serde(default = "default_max_poll_errors")]
    pub max_poll_errors: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            source: SourceMode::default(),
            stream: StreamServers::default(),
            gfn: GfnConfig::default(),
            local: LocalConfig::default(),
            access_token: String::new(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            proof_of_life_interval_ms: DEFAULT_PROOF_OF_LIFE_INTERVAL_MS,
            max_poll_attempts: default_max_poll_attempts(),
            max_poll_errors: DEFAULT_MAX_POLL_ERRORS,
        }
    }
}

impl StreamConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(raw)
            .map_err(|e| Error::config(format!("invalid stream config: {e}")))?;
        config.normalize();
        Ok(config)
    }

    /// Load a config file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json_str(&raw)?;
        config.apply_env();
        debug!(path = %path.display(), source = %config.source, "loaded stream config");
        Ok(config)
    }

    /// Apply `KITSTREAM_SOURCE`, `KITSTREAM_STREAM_SERVER`, `KITSTREAM_APP_SERVER`
    /// and `KITSTREAM_ACCESS_TOKEN`.
    pub fn apply_env(&mut self) {
        if let Some(source) = env_string("KITSTREAM_SOURCE") {
            self.source = SourceMode::parse(&source);
        }
        if let Some(server) = env_string("KITSTREAM_STREAM_SERVER") {
            self.stream.stream_server = server;
        }
        if let Some(server) = env_string("KITSTREAM_APP_SERVER") {
            self.stream.app_server = server;
        }
        if let Some(token) = env_string("KITSTREAM_ACCESS_TOKEN") {
            self.access_token = token;
        }
        self.normalize();
    }

    /// Trim server URLs; the catalog falls back to the control plane host.
    pub fn normalize(&mut self) {
        self.stream.stream_server =
            normalize_server(&self.stream.stream_server).unwrap_or_default();
        self.stream.app_server = normalize_server(&self.stream.app_server).unwrap_or_default();
        if self.stream.app_server.is_empty() {
            self.stream.app_server = self.stream.stream_server.clone();
        }
    }

    /// Check that the selected source mode has what it needs.
    pub fn validate(&self) -> Result<()> {
        match self.source {
            SourceMode::Stream if self.stream.stream_server.is_empty() => Err(Error::config(
                "source \"stream\" requires stream.streamServer",
            )),
            SourceMode::Local if self.local.server.trim().is_empty() => {
                Err(Error::config("source \"local\" requires local.server"))
            }
            _ if self.poll_interval_ms == 0 => {
                Err(Error::config("pollIntervalMs must be greater than zero"))
            }
            _ if self.proof_of_life_interval_ms == 0 => Err(Error::config(
                "proofOfLifeIntervalMs must be greater than zero",
            )),
            _ => Ok(()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn proof_of_life_interval(&self) -> Duration {
        Duration::from_millis(self.proof_of_life_interval_ms)
    }
}
