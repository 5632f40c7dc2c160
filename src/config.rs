use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MCP_PORT: u16 = 4401;
pub const DEFAULT_AGENT_PORT: u16 = 4402;
pub const DEFAULT_REPL_PORT: u16 = 4403;
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 30;

/// Top-level config, loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub bridge: BridgeSection,
}

/// Listener addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: IpAddr,
    pub mcp_port: u16,
    pub agent_port: u16,
    pub repl_port: u16,
    pub repl_enabled: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            mcp_port: DEFAULT_MCP_PORT,
            agent_port: DEFAULT_AGENT_PORT,
            repl_port: DEFAULT_REPL_PORT,
            repl_enabled: true,
        }
    }
}

/// Task dispatch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    pub task_timeout_secs: u64,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<IpAddr>,
    pub mcp_port: Option<u16>,
    pub agent_port: Option<u16>,
    pub repl_port: Option<u16>,
    pub task_timeout_secs: Option<u64>,
    pub disable_repl: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", .path.display())]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Load config from a TOML file path. Returns `None` if the file doesn't
    /// exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&contents).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(config))
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Load from `path` (or the default location), apply overrides, and
    /// validate.
    pub fn resolve(path: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).or_else(default_config_path);
        let mut config = match path {
            Some(ref p) => Self::load(p)?.unwrap_or_default(),
            None => Self::default(),
        };
        if let Some(ref p) = path {
            tracing::debug!(path = %p.display(), "config path");
        }
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(host) = overrides.host {
            self.server.host = host;
        }
        if let Some(port) = overrides.mcp_port {
            self.server.mcp_port = port;
        }
        if let Some(port) = overrides.agent_port {
            self.server.agent_port = port;
        }
        if let Some(port) = overrides.repl_port {
            self.server.repl_port = port;
        }
        if let Some(secs) = overrides.task_timeout_secs {
            self.bridge.task_timeout_secs = secs;
        }
        if overrides.disable_repl {
            self.server.repl_enabled = false;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.server;
        let mut ports = vec![("mcp_port", s.mcp_port), ("agent_port", s.agent_port)];
        if s.repl_enabled {
            ports.push(("repl_port", s.repl_port));
        }
        for (name, port) in &ports {
            if *port == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        for (i, (a, pa)) in ports.iter().enumerate() {
            if let Some((b, _)) = ports[i + 1..].iter().find(|(_, pb)| pb == pa) {
                return Err(ConfigError::Invalid(format!("{a} and {b} are both {pa}")));
            }
        }
        if self.bridge.task_timeout_secs == 0 {
            return Err(ConfigError::Invalid("task_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge.task_timeout_secs)
    }

    pub fn mcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.mcp_port)
    }

    pub fn agent_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.agent_port)
    }

    pub fn repl_addr(&self) -> Option<SocketAddr> {
        self.server
            .repl_enabled
            .then(|| SocketAddr::new(self.server.host, self.server.repl_port))
    }
}

/// `<config dir>/agent-bridge/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("agent-bridge").join("config.toml"))
}
