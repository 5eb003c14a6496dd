//! Core types for language-model interactions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Providers reachable through the OpenAI-compatible chat API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Groq,
    OpenRouter,
    Ollama,
    Custom,
}

impl Provider {
    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OpenAI",
            Provider::Groq => "Groq",
            Provider::OpenRouter => "OpenRouter",
            Provider::Ollama => "Ollama",
            Provider::Custom => "Custom",
        }
    }

    /// Get the environment variable name for this provider's API key
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAI => Some("OPENAI_API_KEY"),
            Provider::Groq => Some("GROQ_API_KEY"),
            Provider::OpenRouter => Some("OPENROUTER_API_KEY"),
            Provider::Ollama | Provider::Custom => None,
        }
    }

    /// Default API base URL
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
            Provider::Ollama => "http://localhost:11434/v1",
            Provider::Custom => "",
        }
    }

    /// Parse a provider name, falling back to `Custom`
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            "groq" => Provider::Groq,
            "openrouter" => Provider::OpenRouter,
            "ollama" => Provider::Ollama,
            _ => Provider::Custom,
        }
    }
}

/// Model definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier (e.g., "gpt-4o")
    pub id: String,
    /// Provider
    pub provider: Provider,
    /// Base URL for API calls
    pub base_url: String,
    /// Maximum output tokens
    pub max_tokens: u32,
    /// Additional headers for API calls
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Model {
    /// Build a model for a provider using its default endpoint
    pub fn new(provider: Provider, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider,
            base_url: provider.default_base_url().to_string(),
            max_tokens: 1000,
            headers: HashMap::new(),
        }
    }

    /// Override the API base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input: u32,
    pub output: u32,
}

/// Reason why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of response
    Stop,
    /// Maximum tokens reached
    Length,
    /// Content filtered by the provider
    ContentFilter,
}

/// Chat messages sent to or received from a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// User message
    User {
        content: String,
        #[serde(default)]
        timestamp: i64,
    },
}

impl Message {
    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            content: text.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Get the role as a string
    pub fn role(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
        }
    }

    /// Get the text content
    pub fn text(&self) -> &str {
        match self {
            Self::User { content, .. } => content,
        }
    }
}

/// Context for a model request
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// System prompt
    pub system_prompt: Option<String>,
    /// Conversation messages
    pub messages: Vec<Message>,
}

impl Context {
    /// A one-message request: optional system prompt plus the user prompt
    pub fn single_turn(system_prompt: Option<&str>, prompt: impl Into<String>) -> Self {
        let mut context = Self {
            system_prompt: system_prompt.map(str::to_string),
            messages: vec![],
        };
        context.push(Message::user(prompt));
        context
    }

    /// Add a message to the context
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}

/// Options for streaming requests
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Temperature (0.0 - 2.0)
    pub temperature: Option<f32>,
    /// Stop sequences
    pub stop_sequences: Vec<String>,
}
