use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

pub const CONFIG_FILE: &str = "relay.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub reporter: ReporterConfig,

    #[serde(default)]
    pub lessons: LessonsConfig,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub slack: SlackConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,

    /// Prompt-source id to text, overriding the built-in prompt library.
    #[serde(default)]
    pub prompts: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterConfig {
    #[serde(default = "default_chunk_limit")]
    pub chunk_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonsConfig {
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,

    #[serde(default = "default_field_budget")]
    pub field_budget: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineSettings {
    /// Whole-pipeline re-runs after a failed attempt. Zero means fail on first error.
    #[serde(default)]
    pub retry_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_endpoint")]
    pub endpoint: String,

    /// Name of the environment variable holding the runtime API key.
    #[serde(default = "default_agent_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,

    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default = "default_slack_token_env")]
    pub bot_token_env: String,

    #[serde(default = "default_slack_secret_env")]
    pub signing_secret_env: String,

    #[serde(default = "default_slack_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub name: String,
    pub cron: String,
    pub prompt: String,
    #[serde(default)]
    pub pipeline: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_schedule_thread")]
    pub thread_id: String,
}

fn default_max_concurrent() -> usize {
    3
}
fn default_chunk_limit() -> usize {
    3000
}
fn default_recall_limit() -> usize {
    10
}
fn default_field_budget() -> usize {
    500
}
fn default_agent_endpoint() -> String {
    "http://127.0.0.1:18080/v1/agent/invoke".to_string()
}
fn default_agent_key_env() -> String {
    "RELAY_AGENT_API_KEY".to_string()
}
fn default_agent_timeout() -> u64 {
    900
}
fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
fn default_api_port() -> u16 {
    17900
}
fn default_slack_token_env() -> String {
    "SLACK_BOT_TOKEN".to_string()
}
fn default_slack_secret_env() -> String {
    "SLACK_SIGNING_SECRET".to_string()
}
fn default_slack_port() -> u16 {
    3001
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_schedule_thread() -> String {
    "scheduled".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            chunk_limit: default_chunk_limit(),
        }
    }
}

impl Default for LessonsConfig {
    fn default() -> Self {
        Self {
            recall_limit: default_recall_limit(),
            field_budget: default_field_budget(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: default_agent_endpoint(),
            api_key_env: default_agent_key_env(),
            timeout_secs: default_agent_timeout(),
            model: None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            token: None,
        }
    }
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            bot_token_env: default_slack_token_env(),
            signing_secret_env: default_slack_secret_env(),
            port: default_slack_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RelayConfig {
    pub async fn load<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let config_path = data_dir.as_ref().join(CONFIG_FILE);
        if !config_path.exists() {
            info!("No {} found, using defaults.", CONFIG_FILE);
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(&config_path).await?;
        let mut config: RelayConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        if config.queue.max_concurrent == 0 {
            info!("queue.max_concurrent = 0 is not usable, falling back to 1");
            config.queue.max_concurrent = 1;
        }
        if config.reporter.chunk_limit == 0 {
            config.reporter.chunk_limit = default_chunk_limit();
        }

        info!(
            "Loaded config: max_concurrent={}, chunk_limit={}, schedules={}",
            config.queue.max_concurrent,
            config.reporter.chunk_limit,
            config.schedules.len()
        );
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Read a secret from the environment variable named by `var`. Empty values count as unset.
pub fn secret_from_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}
