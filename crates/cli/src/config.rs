use proto::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use agent::BrokerSettings;
use transport::TransportSettings;

const CONFIG_FILE_NAME: &str = "broker.toml";

/// Top-level broker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker process launch and timing.
    pub worker: WorkerConfig,
    /// Turn loop settings.
    pub broker: BrokerConfig,
}

/// How the worker process is launched and talked to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker executable. A bare name is resolved through `PATH`.
    pub path: String,
    /// Arguments passed to the worker.
    pub args: Vec<String>,
    /// Launch attempts at startup.
    pub start_attempts: u32,
    /// Launch attempts when a lost connection is re-established.
    pub reconnect_attempts: u32,
    /// Deadline for a single tool request.
    pub request_timeout_secs: u64,
    /// Deadline for the `initialize` exchange.
    pub handshake_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            path: "rbx-studio-mcp".to_string(),
            args: vec!["--stdio".to_string()],
            start_attempts: 3,
            reconnect_attempts: 5,
            request_timeout_secs: 60,
            handshake_timeout_secs: 10,
        }
    }
}

/// Agent-side knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Tool rounds allowed per user message before the model is told to stop.
    pub max_consecutive_tool_rounds: u32,
    /// Name announced to the worker during `initialize`.
    pub client_name: String,
    /// Model id passed to the LLM provider.
    pub model: String,
    /// Overrides the built-in system prompt when set.
    pub system_prompt: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_tool_rounds: agent::DEFAULT_MAX_CONSECUTIVE_TOOL_ROUNDS,
            client_name: "tool-broker".to_string(),
            model: String::new(),
            system_prompt: None,
        }
    }
}

impl Config {
    /// Loads configuration from explicit path, fallback locations, and env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path.map(Path::to_path_buf).or_else(|| {
            let cwd = std::env::current_dir().ok()?.join(CONFIG_FILE_NAME);
            if cwd.exists() {
                return Some(cwd);
            }
            let home_config = home_dir()?.join(".tool-broker").join(CONFIG_FILE_NAME);
            home_config.exists().then_some(home_config)
        });
        debug!(path = ?config_path, "Config file resolved");

        let mut config = match config_path {
            Some(path) => {
                let content = std::fs::read_to_string(&path).map_err(ConfigError::Io)?;
                Self::from_toml(&content)?
            }
            None => Config::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document; absent sections keep their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Toml(e.to_string()))
    }

    /// Applies `BROKER_*` overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(path) = lookup("BROKER_WORKER_PATH").filter(|p| !p.trim().is_empty()) {
            self.worker.path = path;
        }
        if let Some(raw) = lookup("BROKER_REQUEST_TIMEOUT_SECS") {
            self.worker.request_timeout_secs = parse_number("BROKER_REQUEST_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("BROKER_MAX_TOOL_ROUNDS") {
            self.broker.max_consecutive_tool_rounds =
                parse_number("BROKER_MAX_TOOL_ROUNDS", &raw)?;
        }
        if let Some(model) = lookup("BROKER_MODEL") {
            self.broker.model = model;
        }
        Ok(())
    }

    /// Rejects values the transport cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.path.trim().is_empty() {
            return Err(ConfigError::MissingField("worker.path".to_string()));
        }
        for (field, value) in [
            ("worker.start_attempts", self.worker.start_attempts as u64),
            ("worker.reconnect_attempts", self.worker.reconnect_attempts as u64),
            ("worker.request_timeout_secs", self.worker.request_timeout_secs),
            ("worker.handshake_timeout_secs", self.worker.handshake_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.broker.max_consecutive_tool_rounds == 0 {
            warn!("broker.max_consecutive_tool_rounds is 0; every tool round will be intercepted");
        }
        Ok(())
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            handshake_timeout: Duration::from_secs(self.worker.handshake_timeout_secs),
            client_name: self.broker.client_name.clone(),
            ..TransportSettings::default()
        }
    }

    pub fn broker_settings(&self) -> BrokerSettings {
        let defaults = BrokerSettings::default();
        BrokerSettings {
            model: self.broker.model.clone(),
            system_prompt: self
                .broker
                .system_prompt
                .clone()
                .unwrap_or(defaults.system_prompt),
            request_timeout: Duration::from_secs(self.worker.request_timeout_secs),
            reconnect_attempts: self.worker.reconnect_attempts,
            max_consecutive_tool_rounds: self.broker.max_consecutive_tool_rounds,
            llm_retry: defaults.llm_retry,
        }
    }
}

fn parse_number<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        reason: format!("'{raw}' is not a non-negative integer"),
    })
}

pub fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

/// Directory for rolling debug logs.
pub fn log_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tool-broker")
        .join("logs")
}
