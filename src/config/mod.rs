//! Configuration loaded from an optional TOML file plus `PATCHPILOT_*`
//! environment overrides

use crate::error::{ErrorCode, PilotError, Result};
use crate::status::WatchdogBounds;
use crate::workflow::steps::GitSettings;
use crate::workflow::RetryPolicy;
use directories::ProjectDirs;
use serde::de::IntoDeserializer;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Data directory for checkpoints when none is configured
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("dev", "patchpilot", "patchpilot")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".patchpilot"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PilotConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub watchdog: WatchdogBounds,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub git: GitSettings,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    /// Terminal runs older than this are purged; kept forever when unset
    #[serde(default, with = "humantime_serde")]
    pub run_ttl: Option<Duration>,
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            run_ttl: None,
            sweep_interval: default_sweep_interval(),
        }
    }
}

fn default_checkpoint_dir() -> PathBuf {
    default_data_dir().join("checkpoints")
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Upper bound for any single command run in a session
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Parent directory for session checkouts; system temp dir when unset
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout: default_command_timeout(),
            workspace_root: None,
        }
    }
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(600)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_program")]
    pub program: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: default_agent_program(),
        }
    }
}

fn default_agent_program() -> String {
    "claude".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NotifyConfig {
    /// Post notifications here as JSON; log them when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn parse_duration(value: &str) -> std::result::Result<Duration, serde::de::value::Error> {
    humantime_serde::deserialize(IntoDeserializer::<serde::de::value::Error>::into_deserializer(
        value,
    ))
}

fn invalid_env(var: &str, value: &str, reason: impl std::fmt::Display) -> PilotError {
    PilotError::config_with_code(
        ErrorCode::CONFIG_INVALID_VALUE,
        format!("{var}={value} is invalid: {reason}"),
    )
}

impl PilotConfig {
    /// Load from `path` (when given), apply environment overrides, validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.merge_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            let code = if e.kind() == std::io::ErrorKind::NotFound {
                ErrorCode::CONFIG_NOT_FOUND
            } else {
                ErrorCode::CONFIG_GENERIC
            };
            PilotError::config_with_code(code, format!("Cannot read {}", path.display()))
                .with_source(e)
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(toml::from_str(&content)?)
    }

    pub fn merge_env_vars(&mut self) -> Result<()> {
        self.merge_env(|var| std::env::var(var).ok())
    }

    /// Apply overrides from any variable source
    pub fn merge_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(bind) = lookup("PATCHPILOT_BIND") {
            self.server.bind = bind;
        }

        if let Some(dir) = lookup("PATCHPILOT_CHECKPOINT_DIR") {
            self.storage.checkpoint_dir = PathBuf::from(dir);
        }

        if let Some(ttl) = lookup("PATCHPILOT_RUN_TTL") {
            let parsed =
                parse_duration(&ttl).map_err(|e| invalid_env("PATCHPILOT_RUN_TTL", &ttl, e))?;
            self.storage.run_ttl = Some(parsed);
        }

        if let Some(attempts) = lookup("PATCHPILOT_MAX_ATTEMPTS") {
            self.retry.max_attempts = attempts
                .parse()
                .map_err(|e| invalid_env("PATCHPILOT_MAX_ATTEMPTS", &attempts, e))?;
        }

        if let Some(api_base) = lookup("PATCHPILOT_API_BASE") {
            self.host.api_base = api_base;
        }

        if let Some(program) = lookup("PATCHPILOT_AGENT_PROGRAM") {
            self.agent.program = program;
        }

        if let Some(url) = lookup("PATCHPILOT_WEBHOOK_URL") {
            self.notify.webhook_url = Some(url).filter(|u| !u.trim().is_empty());
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;

        if self.retry.max_attempts == 0 {
            return Err(PilotError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                "retry.max_attempts must be at least 1",
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(PilotError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                "retry.multiplier must be at least 1.0",
            ));
        }

        url::Url::parse(&self.host.api_base).map_err(|e| {
            PilotError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!("host.api_base '{}' is not a URL", self.host.api_base),
            )
            .with_source(e)
        })?;
        if let Some(webhook) = &self.notify.webhook_url {
            url::Url::parse(webhook).map_err(|e| {
                PilotError::config_with_code(
                    ErrorCode::CONFIG_INVALID_VALUE,
                    format!("notify.webhook_url '{webhook}' is not a URL"),
                )
                .with_source(e)
            })?;
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server.bind.parse().map_err(|e| {
            PilotError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!("server.bind '{}' is not a socket address", self.server.bind),
            )
            .with_source(e)
        })
    }
}
