//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tahecho_agent::RetentionPolicy;

/// Configuration for tahecho
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model provider (openai, groq, openrouter, ollama, custom)
    pub provider: Option<String>,
    /// Model to use
    pub model: Option<String>,
    /// Override the provider's API base URL
    pub base_url: Option<String>,
    /// Sampling temperature for classification and synthesis
    pub temperature: Option<f32>,
    /// Maximum output tokens per model call
    pub max_tokens: Option<u32>,
    /// API keys (alternative to environment variables)
    pub api_keys: ApiKeys,
    pub jira: JiraSettings,
    pub checkpoint: CheckpointSettings,
    pub retention: RetentionSettings,
}

/// API key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub groq: Option<String>,
    pub openrouter: Option<String>,
}

/// Jira connection, used for ticket searches and issue relationships
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraSettings {
    pub instance_url: Option<String>,
    pub username: Option<String>,
    pub api_token: Option<String>,
    /// Jira Cloud (true) or Server/Data Center (false)
    pub cloud: Option<bool>,
}

impl JiraSettings {
    /// Environment variable names of the settings that are not set
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if is_blank(&self.instance_url) {
            missing.push("JIRA_INSTANCE_URL");
        }
        if is_blank(&self.username) {
            missing.push("JIRA_USERNAME");
        }
        if is_blank(&self.api_token) {
            missing.push("JIRA_API_TOKEN");
        }
        missing
    }
}

/// Where conversation checkpoints are kept
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointSettings {
    /// "file" (default) or "memory"
    pub backend: Option<String>,
    /// Directory for the file backend
    pub dir: Option<String>,
}

/// Retention window applied before each checkpoint write
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    /// 0 disables pruning
    pub max_messages: Option<usize>,
    pub max_result_chars: Option<usize>,
}

impl RetentionSettings {
    pub fn policy(&self) -> RetentionPolicy {
        let defaults = RetentionPolicy::default();
        RetentionPolicy {
            max_messages: match self.max_messages {
                Some(0) => None,
                Some(n) => Some(n),
                None => defaults.max_messages,
            },
            max_result_chars: self.max_result_chars.unwrap_or(defaults.max_result_chars),
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tahecho")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for TAHECHO_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("TAHECHO_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location and apply environment overrides
    pub fn load() -> Self {
        let mut config = Self::load_from(&Self::config_path());
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Load config from a file; missing or malformed files yield defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Apply deployment environment variables on top of the file values
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("OPENAI_API_KEY") {
            self.api_keys.openai = Some(v);
        }
        if let Some(v) = get("JIRA_INSTANCE_URL") {
            self.jira.instance_url = Some(v);
        }
        if let Some(v) = get("JIRA_USERNAME") {
            self.jira.username = Some(v);
        }
        if let Some(v) = get("JIRA_API_TOKEN") {
            self.jira.api_token = Some(v);
        }
        if let Some(v) = get("JIRA_CLOUD").and_then(|v| parse_bool(&v)) {
            self.jira.cloud = Some(v);
        }
    }

    /// Save config to a file
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            provider: Some("openai".to_string()),
            model: Some("gpt-4o".to_string()),
            temperature: Some(0.1),
            max_tokens: Some(1000),
            checkpoint: CheckpointSettings {
                backend: Some("file".to_string()),
                dir: None,
            },
            ..Default::default()
        };

        default_config.save_to(&path)?;
        Ok(path)
    }

    /// Get API key for a provider, from config or the provider's env var
    pub fn get_api_key(&self, provider: tahecho_ai::Provider) -> Option<String> {
        let from_config = match provider {
            tahecho_ai::Provider::OpenAI => self.api_keys.openai.clone(),
            tahecho_ai::Provider::Groq => self.api_keys.groq.clone(),
            tahecho_ai::Provider::OpenRouter => self.api_keys.openrouter.clone(),
            _ => None,
        };

        if from_config.as_deref().is_some_and(|k| !k.trim().is_empty()) {
            return from_config;
        }

        provider
            .api_key_env_var()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# tahecho configuration file
# Place at ~/.config/tahecho/config.toml (Linux) or set TAHECHO_CONFIG_PATH

# Model provider (openai, groq, openrouter, ollama, custom)
provider = "openai"
model = "gpt-4o"
# base_url = "http://localhost:11434/v1"
temperature = 0.1
max_tokens = 1000

# API keys (optional - OPENAI_API_KEY etc. are also read from the environment)
[api_keys]
# openai = "sk-..."

# Jira connection (JIRA_INSTANCE_URL, JIRA_USERNAME, JIRA_API_TOKEN, JIRA_CLOUD)
# Ticket searches and issue relationships both read from it
[jira]
# instance_url = "https://your-company.atlassian.net"
# username = "you@your-company.com"
# api_token = "..."
# cloud = true

# Conversation checkpoints: "file" (default) or "memory"
[checkpoint]
backend = "file"
# dir = "~/.local/share/tahecho/conversations"

# Retention window; max_messages = 0 keeps everything
[retention]
max_messages = 200
max_result_chars = 16000
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.model.as_deref(), Some("gpt-4o"));
        assert!(config.jira.cloud.is_none());
        assert_eq!(config.retention.policy(), RetentionPolicy::default());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config: Config = toml::from_str(
            r#"
            [jira]
            instance_url = "https://old.example.com"
            "#,
        )
        .unwrap();

        let env: HashMap<&str, &str> = [
            ("JIRA_INSTANCE_URL", "https://new.example.com"),
            ("JIRA_USERNAME", "jdoe"),
            ("JIRA_API_TOKEN", "  "),
            ("JIRA_CLOUD", "off"),
        ]
        .into_iter()
        .collect();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.jira.instance_url.as_deref(), Some("https://new.example.com"));
        assert_eq!(config.jira.username.as_deref(), Some("jdoe"));
        assert_eq!(config.jira.cloud, Some(false));
        // Blank values don't count
        assert_eq!(config.jira.missing(), vec!["JIRA_API_TOKEN"]);
    }

    #[test]
    fn test_retention_zero_disables_pruning() {
        let settings = RetentionSettings {
            max_messages: Some(0),
            max_result_chars: Some(50),
        };
        let policy = settings.policy();
        assert_eq!(policy.max_messages, None);
        assert_eq!(policy.max_result_chars, 50);
    }

    #[test]
    fn test_malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "model = [not toml").unwrap();
        let config = Config::load_from(&path);
        assert!(config.model.is_none());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            model: Some("gpt-4o-mini".into()),
            jira: JiraSettings {
                instance_url: Some("https://jira.example.com".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path);
        assert_eq!(loaded.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(loaded.jira.missing(), vec!["JIRA_USERNAME", "JIRA_API_TOKEN"]);
    }
}
