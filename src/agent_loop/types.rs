//! Type definitions for the autonomous improvement loop

use crate::config::{AgentSettings, StepMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle of the loop. Only `Running` (and `Error`, which keeps the timer
/// armed until recovery) has an active timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Running,
    Paused,
    Error,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Running => "running",
            AgentStatus::Paused => "paused",
            AgentStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Counters reset by `start()`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Improvements {
    pub code_improvements: u32,
    pub ui_improvements: u32,
    pub tests_fixed: u32,
    pub errors_fixed: u32,
}

/// Snapshot of the loop's state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub status: AgentStatus,
    pub current_iteration: u32,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub improvements: Improvements,
}

/// Severity of an entry on the loop's log stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Info,
    Success,
    Warning,
    Error,
}

/// Runtime configuration of the loop
#[derive(Debug, Clone, PartialEq)]
pub struct AgentLoopConfig {
    pub interval: Duration,
    pub max_iterations: u32,
    pub error_recovery_delay: Duration,
    /// Delay of the placeholder test and code-analysis steps
    pub step_delay: Duration,
    pub preview_analysis: bool,
    pub test_execution: bool,
    pub code_analysis: bool,
    pub steps: StepMode,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self::from(&AgentSettings::default())
    }
}

impl From<&AgentSettings> for AgentLoopConfig {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            interval: Duration::from_millis(settings.interval_ms.max(1)),
            max_iterations: settings.max_iterations,
            error_recovery_delay: Duration::from_secs(settings.error_recovery_secs),
            step_delay: Duration::from_millis(settings.step_delay_ms),
            preview_analysis: settings.preview_analysis,
            test_execution: settings.test_execution,
            code_analysis: settings.code_analysis,
            steps: settings.steps,
        }
    }
}
