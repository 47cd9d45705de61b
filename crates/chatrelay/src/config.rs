use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use chrono::TimeDelta;
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

use crate::attachment::MAX_ATTACHMENT_SIZE;
use crate::dispatcher::DispatchPolicy;
use crate::relay::{
    DEFAULT_IDLE_TIMEOUT_SECONDS, DEFAULT_REPLY_CHAR_LIMIT, DEFAULT_SUMMARY_PROMPT, RelayConfig,
};
use crate::tenant::{
    DEFAULT_CLEANUP_INTERVAL_SECONDS, DEFAULT_MAX_AGE_SECONDS, DEFAULT_MAX_HISTORY, DEFAULT_MODEL,
    DEFAULT_RATE_LIMIT_MAX, DEFAULT_WINDOW_SECONDS, GuildSettings, MemoryLimits,
};

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub memory: MemorySection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub attachments: AttachmentsSection,
    #[serde(default)]
    pub guild_defaults: GuildDefaultsSection,
    #[serde(default)]
    pub admin: AdminSection,
    #[serde(default)]
    pub discord: DiscordSection,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            admin_user_ids: self.admin.user_ids.iter().cloned().collect::<HashSet<_>>(),
            max_attachment_bytes: self.attachments.max_bytes,
        }
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval_seconds: u64,
    /// Bearer token for the admin API. Admin routes are refused when unset.
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            keep_alive_interval_seconds: default_keep_alive_interval(),
            admin_token: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    300
}

fn default_keep_alive_interval() -> u64 {
    15
}

// ============================================================================
// UpstreamConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            http_timeout_seconds: default_http_timeout(),
        }
    }
}

impl UpstreamConfig {
    /// The API key from the environment, if set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
    }
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_http_timeout() -> u64 {
    300
}

// ============================================================================
// RelaySection
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RelaySection {
    #[serde(default = "default_reply_char_limit")]
    pub reply_char_limit: usize,
    #[serde(default = "default_relay_idle_timeout")]
    pub idle_timeout_seconds: u64,
    #[serde(default = "default_summary_prompt")]
    pub summary_prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            reply_char_limit: default_reply_char_limit(),
            idle_timeout_seconds: default_relay_idle_timeout(),
            summary_prompt: default_summary_prompt(),
            system_prompt: None,
        }
    }
}

impl RelaySection {
    pub fn to_relay_config(&self) -> RelayConfig {
        RelayConfig {
            reply_char_limit: self.reply_char_limit.max(1),
            idle_timeout: Duration::from_secs(self.idle_timeout_seconds.max(1)),
            summary_prompt: self.summary_prompt.clone(),
            system_prompt: self.system_prompt.clone().filter(|p| !p.trim().is_empty()),
        }
    }
}

fn default_reply_char_limit() -> usize {
    DEFAULT_REPLY_CHAR_LIMIT
}

fn default_relay_idle_timeout() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECONDS
}

fn default_summary_prompt() -> String {
    DEFAULT_SUMMARY_PROMPT.to_string()
}

// ============================================================================
// MemorySection
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_max_age")]
    pub max_age_seconds: i64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            max_age_seconds: default_max_age(),
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

impl MemorySection {
    pub fn limits(&self) -> MemoryLimits {
        MemoryLimits {
            max_history: self.max_history.max(1),
            max_age: TimeDelta::seconds(self.max_age_seconds.max(0)),
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds.max(1))
    }
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

fn default_max_age() -> i64 {
    DEFAULT_MAX_AGE_SECONDS
}

fn default_cleanup_interval() -> u64 {
    DEFAULT_CLEANUP_INTERVAL_SECONDS
}

// ============================================================================
// RateLimitSection
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_window")]
    pub window_seconds: i64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            window_seconds: default_window(),
        }
    }
}

fn default_window() -> i64 {
    DEFAULT_WINDOW_SECONDS
}

// ============================================================================
// AttachmentsSection
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AttachmentsSection {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for AttachmentsSection {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_max_bytes() -> u64 {
    MAX_ATTACHMENT_SIZE
}

// ============================================================================
// GuildDefaultsSection
// ============================================================================

/// Settings given to a tenant on first access.
#[derive(Debug, Deserialize)]
pub struct GuildDefaultsSection {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: u32,
    #[serde(default = "default_true")]
    pub memory_share_enabled: bool,
}

impl Default for GuildDefaultsSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            rate_limit_max: default_rate_limit_max(),
            memory_share_enabled: true,
        }
    }
}

impl GuildDefaultsSection {
    pub fn to_settings(&self) -> GuildSettings {
        GuildSettings {
            current_model: self.model.clone(),
            rate_limit_max: self.rate_limit_max,
            memory_share_enabled: self.memory_share_enabled,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_rate_limit_max() -> u32 {
    DEFAULT_RATE_LIMIT_MAX
}

fn default_true() -> bool {
    true
}

// ============================================================================
// AdminSection
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct AdminSection {
    /// Platform user ids that bypass rate limiting.
    #[serde(default)]
    pub user_ids: Vec<String>,
}

// ============================================================================
// DiscordSection
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DiscordSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Environment variable holding the bot token.
    #[serde(default = "default_discord_token_env")]
    pub token_env: String,
}

impl Default for DiscordSection {
    fn default() -> Self {
        Self {
            enabled: true,
            token_env: default_discord_token_env(),
        }
    }
}

impl DiscordSection {
    /// The bot token from the environment, if set and non-empty.
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|token| !token.is_empty())
    }
}

fn default_discord_token_env() -> String {
    "DISCORD_TOKEN".to_string()
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.keep_alive_interval_seconds, 15);
        assert!(config.server.admin_token.is_none());
        assert_eq!(config.upstream.base_url, "https://openrouter.ai/api/v1");
        assert_eq!(config.upstream.api_key_env, "OPENROUTER_API_KEY");
        assert_eq!(config.relay.reply_char_limit, 2000);
        assert_eq!(config.memory.max_history, 10);
        assert_eq!(config.memory.max_age_seconds, 7200);
        assert_eq!(config.memory.cleanup_interval_seconds, 1800);
        assert_eq!(config.rate_limit.window_seconds, 60);
        assert_eq!(config.attachments.max_bytes, 20 * 1024 * 1024);
        assert_eq!(config.guild_defaults.model, "openai/gpt-oss-20b:free");
        assert_eq!(config.guild_defaults.rate_limit_max, 20);
        assert!(config.guild_defaults.memory_share_enabled);
        assert!(config.admin.user_ids.is_empty());
        assert!(config.discord.enabled);
        assert_eq!(config.discord.token_env, "DISCORD_TOKEN");
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_defaults() {
        let tmp_dir = TempDir::new().unwrap();
        let missing_path = tmp_dir.path().join("missing-config.yaml");
        let config = Config::load(&missing_path).await.unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.relay.idle_timeout_seconds, 60);
    }

    #[tokio::test]
    async fn test_load_valid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  host: "127.0.0.1"
  port: 3000
  admin_token: "secret"
upstream:
  base_url: "http://localhost:11434/v1"
relay:
  reply_char_limit: 500
  system_prompt: "Be brief."
memory:
  max_history: 4
rate_limit:
  window_seconds: 30
guild_defaults:
  model: "meta/llama"
  rate_limit_max: 5
  memory_share_enabled: false
admin:
  user_ids: ["42", "43"]
discord:
  enabled: false
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.admin_token.as_deref(), Some("secret"));
        assert_eq!(config.upstream.base_url, "http://localhost:11434/v1");
        assert_eq!(config.upstream.api_key_env, "OPENROUTER_API_KEY");

        let relay = config.relay.to_relay_config();
        assert_eq!(relay.reply_char_limit, 500);
        assert_eq!(relay.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(relay.idle_timeout, Duration::from_secs(60));

        assert_eq!(config.memory.limits().max_history, 4);
        assert_eq!(config.memory.limits().max_age, TimeDelta::hours(2));
        assert_eq!(config.rate_limit.window_seconds, 30);

        let settings = config.guild_defaults.to_settings();
        assert_eq!(settings.current_model, "meta/llama");
        assert_eq!(settings.rate_limit_max, 5);
        assert!(!settings.memory_share_enabled);

        let policy = config.dispatch_policy();
        assert!(policy.admin_user_ids.contains("42"));
        assert_eq!(policy.max_attachment_bytes, MAX_ATTACHMENT_SIZE);
        assert!(!config.discord.enabled);
    }

    #[tokio::test]
    async fn test_load_invalid_yaml_fails() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "server: [not, a, map").unwrap();
        let err = Config::load(file.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_zero_limits_are_raised() {
        let memory = MemorySection {
            max_history: 0,
            max_age_seconds: -5,
            cleanup_interval_seconds: 0,
        };
        assert_eq!(memory.limits().max_history, 1);
        assert_eq!(memory.limits().max_age, TimeDelta::zero());
        assert_eq!(memory.cleanup_interval(), Duration::from_secs(1));
    }
}
