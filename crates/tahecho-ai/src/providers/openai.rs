//! OpenAI-compatible Chat Completions provider

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use super::LlmProvider;
use crate::{
    error::{Error, Result},
    stream::{MessageEvent, MessageEventStream},
    types::{Context, Model, StopReason, StreamOptions, Usage},
};

/// Client for any endpoint speaking the OpenAI chat completions protocol
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl OpenAIProvider {
    /// Create a new provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: Some(api_key.into()),
        }
    }

    /// Create a provider for local endpoints that take no key (e.g. Ollama)
    pub fn without_key() -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: None,
        }
    }

    fn headers(&self, model: &Model) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(ref key) = self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| Error::InvalidConfig(format!("API key is not a valid header: {}", e)))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        // Add model-specific headers
        for (key, value) in &model.headers {
            if let (Ok(name), Ok(val)) = (key.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
                headers.insert(name, val);
            }
        }
        Ok(headers)
    }

    fn build_request(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> ChatRequest {
        let mut messages = Vec::with_capacity(context.messages.len() + 1);

        if let Some(ref system_prompt) = context.system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system_prompt.clone(),
            });
        }

        for msg in &context.messages {
            messages.push(ChatMessage {
                role: msg.role().to_string(),
                content: msg.text().to_string(),
            });
        }

        ChatRequest {
            model: model.id.clone(),
            messages,
            stream: true,
            max_tokens: Some(options.max_tokens.unwrap_or(model.max_tokens)),
            temperature: options.temperature,
            stop: if options.stop_sequences.is_empty() {
                None
            } else {
                Some(options.stop_sequences.clone())
            },
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<MessageEventStream> {
        if model.base_url.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "no base URL configured for model {}",
                model.id
            )));
        }

        let request = self.build_request(model, context, options);
        let url = format!("{}/chat/completions", model.base_url);
        let request_builder = self
            .client
            .post(&url)
            .headers(self.headers(model)?)
            .json(&request);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source, model.id.clone())))
    }
}

fn create_stream(
    mut event_source: EventSource,
    model_id: String,
) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut accumulated_text = String::new();
        let mut finish_reason: Option<String> = None;
        let mut usage = Usage::default();

        yield MessageEvent::Start { model: model_id.clone() };

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    match serde_json::from_str::<StreamChunk>(&msg.data) {
                        Ok(chunk) => {
                            for choice in &chunk.choices {
                                if let Some(ref content) = choice.delta.content {
                                    accumulated_text.push_str(content);
                                    yield MessageEvent::TextDelta { delta: content.clone() };
                                }
                                if let Some(ref reason) = choice.finish_reason {
                                    finish_reason = Some(reason.clone());
                                }
                            }

                            if let Some(ref stream_usage) = chunk.usage {
                                usage.input = stream_usage.prompt_tokens;
                                usage.output = stream_usage.completion_tokens;
                            }
                        }
                        Err(e) => {
                            event_source.close();
                            yield MessageEvent::Error {
                                message: format!("Failed to parse chunk: {}", e),
                                status: None,
                            };
                            return;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(code, response)) => {
                    event_source.close();
                    let body = response.text().await.unwrap_or_default();
                    yield MessageEvent::Error {
                        message: error_body_message(&body)
                            .unwrap_or_else(|| code.canonical_reason().unwrap_or("request failed").to_string()),
                        status: Some(code.as_u16()),
                    };
                    return;
                }
                Err(e) => {
                    event_source.close();
                    yield MessageEvent::Error {
                        message: format!("SSE error: {}", e),
                        status: None,
                    };
                    return;
                }
            }
        }

        event_source.close();

        let stop_reason = match finish_reason.as_deref() {
            Some("length") => StopReason::Length,
            Some("content_filter") => StopReason::ContentFilter,
            _ => StopReason::Stop,
        };

        tracing::debug!(
            "Completion from {} finished: {} chars, {} in / {} out tokens",
            model_id,
            accumulated_text.len(),
            usage.input,
            usage.output
        );

        yield MessageEvent::Done {
            text: accumulated_text,
            stop_reason,
            usage,
        };
    }
}

/// Pull the human-readable message out of an OpenAI error body
fn error_body_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    Some(parsed.error.message)
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}
