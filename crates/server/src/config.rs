use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tether_mcp::handler::SUPPORTED_PROTOCOL_VERSIONS;
use tether_mcp::{HandlerConfig, McpServer, RegistryConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub mcp: McpConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Identity and version negotiation advertised on `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default = "default_server_name")]
    pub server_name: String,

    #[serde(default = "default_server_version")]
    pub server_version: String,

    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    #[serde(default = "default_supported_versions")]
    pub supported_versions: Vec<String>,

    #[serde(default)]
    pub instructions: Option<String>,
}

fn default_server_name() -> String {
    "tether".to_string()
}

fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_protocol_version() -> String {
    SUPPORTED_PROTOCOL_VERSIONS[0].to_string()
}

fn default_supported_versions() -> Vec<String> {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .map(|v| v.to_string())
        .collect()
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            server_version: default_server_version(),
            protocol_version: default_protocol_version(),
            supported_versions: default_supported_versions(),
            instructions: None,
        }
    }
}

impl McpConfig {
    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            server_name: self.server_name.clone(),
            server_version: self.server_version.clone(),
            protocol_version: self.protocol_version.clone(),
            supported_versions: self.supported_versions.clone(),
            instructions: self.instructions.clone(),
        }
    }
}

/// Session limits, idle reaping and push stream policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// 0 means unbounded
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// 0 disables idle reaping
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_close_on_stream_end")]
    pub close_on_stream_end: bool,
}

fn default_max_sessions() -> usize {
    1024
}

fn default_idle_timeout_secs() -> u64 {
    1800
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_stream_buffer() -> usize {
    64
}

fn default_keep_alive_secs() -> u64 {
    15
}

fn default_close_on_stream_end() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            stream_buffer: default_stream_buffer(),
            keep_alive_secs: default_keep_alive_secs(),
            close_on_stream_end: default_close_on_stream_end(),
        }
    }
}

impl SessionConfig {
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_sessions: self.max_sessions,
            stream_buffer: self.stream_buffer,
            close_on_stream_end: self.close_on_stream_end,
        }
    }

    /// `None` when idle reaping is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        // Load config file if it exists, otherwise use defaults
        let config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session.stream_buffer == 0 {
            bail!("session.stream_buffer must be greater than 0");
        }
        if self.session.idle_timeout_secs > 0 && self.session.sweep_interval_secs == 0 {
            bail!("session.sweep_interval_secs must be greater than 0 when idle_timeout_secs is set");
        }
        if !self
            .mcp
            .supported_versions
            .iter()
            .any(|v| v == &self.mcp.protocol_version)
        {
            bail!(
                "mcp.protocol_version '{}' is not listed in mcp.supported_versions",
                self.mcp.protocol_version
            );
        }
        Ok(())
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub mcp: Arc<McpServer>,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Self {
        let mcp = McpServer::with_builtin_tools(
            config.mcp.handler_config(),
            config.session.registry_config(),
        );
        Self {
            config: Arc::new(config.clone()),
            mcp: Arc::new(mcp),
        }
    }
}
