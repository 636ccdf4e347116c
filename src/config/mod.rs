//! Configuration for the coding manager
//!
//! Settings live in `.coding-manager/config.yaml` inside the project directory.
//! Every field has a default so a missing or partial file is always valid.

mod manager;

pub use manager::*;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration from .coding-manager/config.yaml (optional)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Backend connection settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Autonomous loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Learning/history store settings
    #[serde(default)]
    pub learning: LearningSettings,

    /// Mock backend server settings
    #[serde(default)]
    pub server: ServerSettings,
}

/// Where the backend lives and how long to wait for it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// WebSocket URL of the backend message channel
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Base URL for the HTTP analysis and editor endpoints
    #[serde(default = "default_http_url")]
    pub http_url: String,

    /// Per-request response timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How long `connect()` waits for an in-flight attempt
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Poll interval while waiting for an in-flight connection attempt
    #[serde(default = "default_connect_poll_ms")]
    pub connect_poll_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            http_url: default_http_url(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            connect_poll_ms: default_connect_poll_ms(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn connect_poll(&self) -> Duration {
        Duration::from_millis(self.connect_poll_ms)
    }
}

/// Which implementation backs the test and code-analysis steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMode {
    /// Fixed delay, always reports one improvement
    Placeholder,
    /// Delegates to the remote operation client
    Remote,
}

impl Default for StepMode {
    fn default() -> Self {
        Self::Placeholder
    }
}

impl std::str::FromStr for StepMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "placeholder" => Ok(StepMode::Placeholder),
            "remote" => Ok(StepMode::Remote),
            _ => Err(format!("Unknown step mode: {}", s)),
        }
    }
}

/// Autonomous loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Delay before an errored loop flips itself back to running
    #[serde(default = "default_error_recovery_secs")]
    pub error_recovery_secs: u64,

    /// Delay used by the placeholder test and code-analysis steps
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,

    #[serde(default = "default_true")]
    pub preview_analysis: bool,

    #[serde(default = "default_true")]
    pub test_execution: bool,

    #[serde(default = "default_true")]
    pub code_analysis: bool,

    #[serde(default)]
    pub steps: StepMode,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_iterations: default_max_iterations(),
            error_recovery_secs: default_error_recovery_secs(),
            step_delay_ms: default_step_delay_ms(),
            preview_analysis: true,
            test_execution: true,
            code_analysis: true,
            steps: StepMode::default(),
        }
    }
}

/// Learning/history store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningSettings {
    /// Ring buffer size for prompt history
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Record outcomes as a second history entry instead of updating in place
    #[serde(default = "default_true")]
    pub append_on_update: bool,

    /// Directory for the learning files (defaults to ~/.coding-manager/learning)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl Default for LearningSettings {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            append_on_update: true,
            data_dir: None,
        }
    }
}

impl LearningSettings {
    /// Resolve the effective data directory
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(crate::file_storage::default_learning_dir)
    }
}

/// Mock backend server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

fn default_ws_url() -> String {
    "ws://127.0.0.1:3421/ws".to_string()
}

fn default_http_url() -> String {
    "http://127.0.0.1:3421".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_connect_poll_ms() -> u64 {
    100
}

fn default_interval_ms() -> u64 {
    10_000
}

fn default_max_iterations() -> u32 {
    5
}

fn default_error_recovery_secs() -> u64 {
    30
}

fn default_step_delay_ms() -> u64 {
    1000
}

fn default_history_limit() -> usize {
    50
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3421
}

fn default_true() -> bool {
    true
}
