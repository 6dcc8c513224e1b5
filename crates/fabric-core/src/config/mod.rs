//! Configuration for the fabric.
//!
//! Loads typed configuration from `~/.fabric/config.json`. All fields use
//! `serde` for zero-boilerplate deserialization; every section has a
//! `Default` so a missing or partial config file is always usable.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub providers: ProvidersConfig,
    pub agents: AgentsConfig,
    pub tools: ToolsConfig,
    pub channels: ChannelsConfig,
    pub gateway: GatewayConfig,
    pub cron: CronManagerConfig,
    pub heartbeat: HeartbeatDefaultsConfig,
    pub store: StoreConfig,
    pub poller_lock: PollerLockConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: ProvidersConfig::default(),
            agents: AgentsConfig::default(),
            tools: ToolsConfig::default(),
            channels: ChannelsConfig::default(),
            gateway: GatewayConfig::default(),
            cron: CronManagerConfig::default(),
            heartbeat: HeartbeatDefaultsConfig::default(),
            store: StoreConfig::default(),
            poller_lock: PollerLockConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default path (`~/.fabric/config.json`).
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Validate cross-field invariants that serde defaults alone can't
    /// express (at least one LLM provider configured).
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.providers.find_all_active().is_empty() {
            anyhow::bail!(
                "no LLM provider configured — set at least one api key under `providers` in {}",
                Self::default_path().display()
            );
        }
        Ok(())
    }

    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    /// Get the default config directory path.
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".fabric")
    }

    /// Get the resolved workspace path.
    pub fn workspace_path(&self) -> PathBuf {
        let raw = &self.agents.defaults.workspace;
        if let Some(rest) = raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\")) {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(rest)
        } else {
            PathBuf::from(raw)
        }
    }

    /// Get the resolved Store directory, defaulting to a subdirectory of
    /// the config directory when unset.
    pub fn store_dir(&self) -> PathBuf {
        if self.store.dir.is_empty() {
            Self::config_dir().join("store")
        } else {
            PathBuf::from(&self.store.dir)
        }
    }

    /// Write the default config template to disk.
    pub fn write_default_template() -> anyhow::Result<PathBuf> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = serde_json::json!({
            "providers": {
                "openrouter": {
                    "apiKey": "sk-or-v1-YOUR_KEY_HERE"
                }
            },
            "agents": {
                "defaults": {
                    "model": "anthropic/claude-sonnet-4-5"
                }
            }
        });

        std::fs::write(&path, serde_json::to_string_pretty(&template)?)?;
        Ok(path)
    }
}

// ── Provider Configuration ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderEntry {
    pub api_key: String,
    pub api_base: Option<String>,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openrouter: Option<ProviderEntry>,
    pub anthropic: Option<ProviderEntry>,
    pub openai: Option<ProviderEntry>,
    pub deepseek: Option<ProviderEntry>,
    pub groq: Option<ProviderEntry>,
    pub gemini: Option<ProviderEntry>,
    pub vllm: Option<ProviderEntry>,
}

impl ProvidersConfig {
    fn candidates(&self) -> Vec<(&'static str, &Option<ProviderEntry>)> {
        vec![
            ("openrouter", &self.openrouter),
            ("anthropic", &self.anthropic),
            ("openai", &self.openai),
            ("deepseek", &self.deepseek),
            ("groq", &self.groq),
            ("gemini", &self.gemini),
            ("vllm", &self.vllm),
        ]
    }

    /// Find the first configured provider (has a non-empty API key).
    pub fn find_active(&self) -> Option<(&str, &ProviderEntry)> {
        self.candidates()
            .into_iter()
            .find_map(|(name, entry)| match entry {
                Some(e) if !e.api_key.is_empty() => Some((name, e)),
                _ => None,
            })
    }

    /// Every configured provider, in priority order, for building a
    /// [`crate::provider::FallbackProvider`] chain.
    pub fn find_all_active(&self) -> Vec<(&str, &ProviderEntry)> {
        self.candidates()
            .into_iter()
            .filter_map(|(name, entry)| match entry {
                Some(e) if !e.api_key.is_empty() => Some((name, e)),
                _ => None,
            })
            .collect()
    }
}

// ── Agent Configuration ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentDefaults {
    pub workspace: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_tool_iterations: u32,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            workspace: "~/.fabric/workspace".into(),
            model: "anthropic/claude-sonnet-4-5".into(),
            max_tokens: 8192,
            temperature: 0.7,
            max_tool_iterations: 20,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
}

// ── Tools Configuration ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolsConfig {
    pub restrict_to_workspace: bool,
    pub web_search: WebSearchConfig,
    pub exec: ExecConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            restrict_to_workspace: false,
            web_search: WebSearchConfig::default(),
            exec: ExecConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebSearchConfig {
    pub api_key: String,
    pub max_results: u32,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            max_results: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecConfig {
    pub timeout_seconds: u64,
    pub allowed_commands: Vec<String>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            allowed_commands: Vec::new(),
        }
    }
}

// ── Channels Configuration ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub telegram: Option<TelegramConfig>,
    pub discord: Option<DiscordConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelegramConfig {
    pub enabled: bool,
    pub token: String,
    pub allow_from: Vec<String>,
    #[serde(default)]
    pub drop_pending_updates: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: String::new(),
            allow_from: Vec::new(),
            drop_pending_updates: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiscordConfig {
    pub enabled: bool,
    pub token: String,
    pub allow_from: Vec<String>,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: String::new(),
            allow_from: Vec::new(),
        }
    }
}

// ── Gateway Configuration ───────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 18790,
        }
    }
}

// ── Cron Manager Configuration ──────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CronManagerConfig {
    pub tick_ms: u64,
}

impl Default for CronManagerConfig {
    fn default() -> Self {
        Self { tick_ms: 60_000 }
    }
}

// ── Heartbeat Defaults Configuration ────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatDefaultsConfig {
    pub interval_ms: u64,
    pub prompt: String,
}

impl Default for HeartbeatDefaultsConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            prompt: "HEARTBEAT".to_string(),
        }
    }
}

// ── Store Configuration ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Empty means "derive from the config directory" (see
    /// [`Config::store_dir`]).
    pub dir: String,
}

// ── PollerLock Configuration ────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerLockConfig {
    pub stale_window_ms: i64,
}

impl Default for PollerLockConfig {
    fn default() -> Self {
        Self {
            stale_window_ms: 300_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.agents.defaults.model, "anthropic/claude-sonnet-4-5");
        assert_eq!(config.agents.defaults.max_tokens, 8192);
        assert!(!config.tools.restrict_to_workspace);
        assert_eq!(config.cron.tick_ms, 60_000);
        assert_eq!(config.poller_lock.stale_window_ms, 300_000);
    }

    #[test]
    fn test_deserialize_minimal_json() {
        let json = r#"{"providers": {"openrouter": {"apiKey": "test-key"}}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let entry = config.providers.openrouter.unwrap();
        assert_eq!(entry.api_key, "test-key");
    }

    #[test]
    fn test_find_active_provider() {
        let json = r#"{"providers": {"anthropic": {"apiKey": "sk-ant-xxx"}}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let (name, entry) = config.providers.find_active().unwrap();
        assert_eq!(name, "anthropic");
        assert_eq!(entry.api_key, "sk-ant-xxx");
    }

    #[test]
    fn test_find_all_active_preserves_priority_order() {
        let json = r#"{"providers": {"anthropic": {"apiKey": "a"}, "openrouter": {"apiKey": "b"}}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let all = config.providers.find_all_active();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, "openrouter");
        assert_eq!(all[1].0, "anthropic");
    }

    #[test]
    fn test_validate_rejects_no_providers() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }
}
