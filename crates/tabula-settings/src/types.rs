//! Settings type definitions.
//!
//! Every section is camelCase on the wire and `#[serde(default)]`, so a
//! partial JSON file only needs the keys it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TabulaSettings {
    /// Agent loop parameters.
    pub agent: AgentSettings,
    /// `OpenAI` Responses endpoint.
    pub openai: OpenAiSettings,
    /// Retry policy for provider calls.
    pub retry: RetrySettings,
    /// Script evaluation limits.
    pub sandbox: SandboxSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl TabulaSettings {
    /// Reject values no agent could run with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.agent.temperature) {
            return Err(SettingsError::InvalidValue(format!(
                "agent.temperature must be within 0..=2, got {}",
                self.agent.temperature
            )));
        }
        if self.agent.max_consecutive_errors == 0 || self.agent.max_consecutive_calls == 0 {
            return Err(SettingsError::InvalidValue(
                "agent caps must be at least 1".into(),
            ));
        }
        if self.agent.event_buffer_size == 0 {
            return Err(SettingsError::InvalidValue(
                "agent.eventBufferSize must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(SettingsError::InvalidValue(format!(
                "retry.jitterFactor must be within 0..=1, got {}",
                self.retry.jitter_factor
            )));
        }
        Ok(())
    }
}

/// Agent loop parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Model id sent with every turn.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Consecutive failed tool calls before the call gives up.
    pub max_consecutive_errors: u32,
    /// Turns per call before the call gives up.
    pub max_consecutive_calls: u32,
    /// Capacity of the event channel between an agent and its consumer.
    pub event_buffer_size: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.1,
            max_consecutive_errors: 5,
            max_consecutive_calls: 10,
            event_buffer_size: 64,
        }
    }
}

/// `OpenAI` endpoint settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OpenAiSettings {
    /// API root, without the `/responses` suffix.
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Whole-request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_ms: 120_000,
        }
    }
}

/// Retry configuration for provider calls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// First backoff delay in milliseconds.
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0) applied to each delay.
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
        }
    }
}

/// Script evaluation limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxSettings {
    /// Expression nodes a script may evaluate.
    pub max_steps: u64,
    /// Rows any produced table may have.
    pub max_rows: usize,
    /// Nesting depth of calls and lists.
    pub max_depth: usize,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            max_steps: 100_000,
            max_rows: 1_000_000,
            max_depth: 64,
        }
    }
}

/// Log output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
