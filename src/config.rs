//! Runtime configuration: endpoint resolution, timeouts and backoff policy.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{BackoffPolicy, RealtimeError, RealtimeResult, WebSocketBufferConfig};

pub const DEFAULT_LOCAL_PORT: u16 = 8766;
pub const DEFAULT_DEPLOYED_PATH: &str = "/ws";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

pub const ENV_WS_URL: &str = "TELEMETRY_WS_URL";
pub const ENV_HOST: &str = "TELEMETRY_HOST";
pub const ENV_SECURE: &str = "TELEMETRY_SECURE";

const LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1", "[::1]"];

fn default_true() -> bool {
    true
}

/// Where the dashboard is running; selects the default endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Environment {
    /// Local development: the telemetry service runs on the same machine.
    #[default]
    Local,
    /// Deployed behind a reverse proxy on `host`.
    Deployed {
        host: String,
        #[serde(default = "default_true")]
        secure: bool,
    },
}

impl Environment {
    /// Classify a host name the way a browser page would classify its own origin.
    pub fn from_host(host: Option<&str>, secure: bool) -> Self {
        match host.map(str::trim) {
            None | Some("") => Environment::Local,
            Some(host) if LOCAL_HOSTS.contains(&host) => Environment::Local,
            Some(host) => Environment::Deployed {
                host: host.to_string(),
                secure,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Explicit endpoint; wins over the environment-derived default.
    pub endpoint_override: Option<String>,
    pub environment: Environment,
    pub local_port: u16,
    pub deployed_path: String,
    pub connect_timeout_ms: u64,
    pub backoff: BackoffPolicy,
    /// Used when no preference has been persisted yet.
    pub auto_reconnect_default: bool,
    /// Disable Nagle's algorithm on the underlying TCP stream.
    pub disable_nagle: bool,
    #[serde(skip)]
    pub buffers: WebSocketBufferConfig,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint_override: None,
            environment: Environment::Local,
            local_port: DEFAULT_LOCAL_PORT,
            deployed_path: DEFAULT_DEPLOYED_PATH.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            backoff: BackoffPolicy::default(),
            auto_reconnect_default: true,
            disable_nagle: true,
            buffers: WebSocketBufferConfig::default(),
        }
    }
}

impl RealtimeConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    pub fn from_toml_str(raw: &str) -> RealtimeResult<Self> {
        let config: RealtimeConfig =
            toml::from_str(raw).map_err(|e| RealtimeError::Config(e.to_string()))?;
        config.validated()
    }

    pub fn load(path: impl AsRef<Path>) -> RealtimeResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RealtimeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Build from the process environment.
    pub fn from_env() -> RealtimeResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` with an injectable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> RealtimeResult<Self> {
        let secure = match lookup(ENV_SECURE) {
            None => true,
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                RealtimeError::Config(format!("{ENV_SECURE} must be true or false, got {raw:?}"))
            })?,
        };
        let host = lookup(ENV_HOST);
        let config = Self {
            endpoint_override: lookup(ENV_WS_URL).filter(|url| !url.trim().is_empty()),
            environment: Environment::from_host(host.as_deref(), secure),
            ..Self::default()
        };
        config.validated()
    }

    /// Override first, then the environment default. No other fallback.
    pub fn resolve_endpoint(&self) -> String {
        if let Some(url) = self.endpoint_override.as_deref() {
            return url.to_string();
        }
        match &self.environment {
            Environment::Local => format!("ws://localhost:{}", self.local_port),
            Environment::Deployed { host, secure } => {
                let scheme = if *secure { "wss" } else { "ws" };
                format!("{scheme}://{host}{}", self.deployed_path)
            }
        }
    }

    /// Reject unusable values and normalize the rest.
    pub fn validated(mut self) -> RealtimeResult<Self> {
        if let Some(url) = self.endpoint_override.as_deref() {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(RealtimeError::Config(format!(
                    "endpoint must use ws:// or wss://, got {url}"
                )));
            }
        }
        if self.connect_timeout_ms == 0 {
            return Err(RealtimeError::Config(
                "connect_timeout_ms must be greater than zero".into(),
            ));
        }
        if !self.deployed_path.starts_with('/') {
            self.deployed_path.insert(0, '/');
        }
        self.backoff = self.backoff.normalized();
        Ok(self)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
