//! Language-model capability used by the classifier, synthesizer and executors

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tahecho_ai::{
    Context, Model, Result, StreamOptions, collect_text, providers::LlmProvider,
};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Check if an error message looks transient
fn is_retryable_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") {
        return true;
    }
    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("connection") {
        return true;
    }
    ["500", "502", "503", "504"].iter().any(|code| lower.contains(code))
        || lower.contains("overloaded")
}

/// A single prompt-in, text-out request
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system_prompt: Option<String>,
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Opaque language-model capability: given a prompt, returns text or fails.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// [`LanguageModel`] backed by a streaming chat provider
pub struct ProviderModel {
    provider: Arc<dyn LlmProvider>,
    model: Model,
    retry_config: RetryConfig,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LlmProvider>, model: Model) -> Self {
        Self {
            provider,
            model,
            retry_config: RetryConfig::default(),
        }
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    async fn attempt(&self, context: &Context, options: &StreamOptions) -> Result<String> {
        let stream = self.provider.stream(&self.model, context, options).await?;
        collect_text(stream).await
    }
}

#[async_trait]
impl LanguageModel for ProviderModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let context = Context::single_turn(request.system_prompt.as_deref(), request.prompt.clone());

        let options = StreamOptions {
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stop_sequences: vec![],
        };

        let mut attempt = 0u32;
        loop {
            match self.attempt(&context, &options).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    // Typed check + string fallback for wrapped errors
                    let error_msg = e.to_string();
                    let retryable = e.is_retryable() || is_retryable_error(&error_msg);

                    if attempt < self.retry_config.max_retries && retryable {
                        let delay = self.retry_config.delay_for_attempt(attempt);
                        tracing::warn!(
                            "Model request failed (attempt {}/{}): {}. Retrying in {:?}...",
                            attempt + 1,
                            self.retry_config.max_retries + 1,
                            error_msg,
                            delay
                        );
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return Err(e);
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tahecho_ai::{MessageEvent, MessageEventStream, Provider, StopReason, Usage};

    use super::*;

    /// Provider that fails a fixed number of times before answering
    struct FlakyProvider {
        failures: AtomicU32,
        error_status: u16,
        seen: parking_lot::Mutex<Vec<Context>>,
    }

    impl FlakyProvider {
        fn new(failures: u32, error_status: u16) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                error_status,
                seen: parking_lot::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        async fn stream(
            &self,
            _model: &Model,
            context: &Context,
            _options: &StreamOptions,
        ) -> Result<MessageEventStream> {
            self.seen.lock().push(context.clone());
            let remaining = self.failures.load(Ordering::SeqCst);
            let events = if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                vec![MessageEvent::Error {
                    message: "upstream".into(),
                    status: Some(self.error_status),
                }]
            } else {
                vec![MessageEvent::Done {
                    text: "ok".into(),
                    stop_reason: StopReason::Stop,
                    usage: Usage::default(),
                }]
            };
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_for_attempt_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn test_is_retryable_error_strings() {
        assert!(is_retryable_error("HTTP 503 Service Unavailable"));
        assert!(is_retryable_error("Rate limit reached"));
        assert!(is_retryable_error("Connection reset"));
        assert!(!is_retryable_error("Invalid API key"));
    }

    #[tokio::test]
    async fn test_complete_retries_transient_failures() {
        let provider = Arc::new(FlakyProvider::new(2, 503));
        let model = ProviderModel::new(provider.clone(), Model::new(Provider::OpenAI, "gpt-4o"))
            .with_retry_config(fast_retry(2));

        let text = model
            .complete(&CompletionRequest::new("hi").with_system("sys"))
            .await
            .unwrap();
        assert_eq!(text, "ok");

        let seen = provider.seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].system_prompt.as_deref(), Some("sys"));
        assert_eq!(seen[0].messages[0].text(), "hi");
    }

    #[tokio::test]
    async fn test_complete_does_not_retry_auth() {
        let provider = Arc::new(FlakyProvider::new(1, 401));
        let model = ProviderModel::new(provider.clone(), Model::new(Provider::OpenAI, "gpt-4o"))
            .with_retry_config(fast_retry(3));

        let err = model.complete(&CompletionRequest::new("hi")).await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(provider.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_complete_gives_up_after_max_retries() {
        let provider = Arc::new(FlakyProvider::new(5, 502));
        let model = ProviderModel::new(provider.clone(), Model::new(Provider::OpenAI, "gpt-4o"))
            .with_retry_config(fast_retry(1));

        assert!(model.complete(&CompletionRequest::new("hi")).await.is_err());
        assert_eq!(provider.seen.lock().len(), 2);
    }
}
