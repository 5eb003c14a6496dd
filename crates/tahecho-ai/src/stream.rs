//! Streaming event types and utilities

use crate::error::{Error, Result};
use crate::types::{StopReason, Usage};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted while a completion streams in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    /// The provider accepted the request
    Start { model: String },
    /// Text content delta
    TextDelta { delta: String },
    /// Completion finished; `text` is the full accumulated text
    Done {
        text: String,
        stop_reason: StopReason,
        usage: Usage,
    },
    /// Error occurred; `status` carries the HTTP status when there was one
    Error {
        message: String,
        #[serde(default)]
        status: Option<u16>,
    },
}

impl MessageEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageEvent::Done { .. } | MessageEvent::Error { .. })
    }
}

/// A stream of message events
pub type MessageEventStream = Pin<Box<dyn Stream<Item = MessageEvent> + Send>>;

/// Drain a stream into the final completion text.
///
/// Deltas are accumulated as a fallback for providers that close the stream
/// without a `Done` event. An `Error` event ends collection immediately.
pub async fn collect_text(mut stream: MessageEventStream) -> Result<String> {
    let mut accumulated = String::new();

    while let Some(event) = stream.next().await {
        match event {
            MessageEvent::Start { model } => {
                tracing::debug!("Completion started for model {}", model);
            }
            MessageEvent::TextDelta { delta } => accumulated.push_str(&delta),
            MessageEvent::Done { text, .. } => {
                if !text.is_empty() {
                    accumulated = text;
                }
                break;
            }
            MessageEvent::Error { message, status } => {
                return Err(match status {
                    Some(code) => Error::from_status(code, message),
                    None => Error::Sse(message),
                });
            }
        }
    }

    if accumulated.trim().is_empty() {
        return Err(Error::EmptyResponse);
    }
    Ok(accumulated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(events: Vec<MessageEvent>) -> MessageEventStream {
        Box::pin(tokio_stream::iter(events))
    }

    #[tokio::test]
    async fn test_collect_text_prefers_done_text() {
        let stream = boxed(vec![
            MessageEvent::Start { model: "m".into() },
            MessageEvent::TextDelta { delta: "Hel".into() },
            MessageEvent::TextDelta { delta: "lo".into() },
            MessageEvent::Done {
                text: "Hello".into(),
                stop_reason: StopReason::Stop,
                usage: Usage::default(),
            },
        ]);
        assert_eq!(collect_text(stream).await.unwrap(), "Hello");
    }

    #[tokio::test]
    async fn test_collect_text_without_done_uses_deltas() {
        let stream = boxed(vec![
            MessageEvent::TextDelta { delta: "a".into() },
            MessageEvent::TextDelta { delta: "b".into() },
        ]);
        assert_eq!(collect_text(stream).await.unwrap(), "ab");
    }

    #[tokio::test]
    async fn test_collect_text_error_with_status_maps_to_auth() {
        let stream = boxed(vec![MessageEvent::Error {
            message: "Unauthorized".into(),
            status: Some(401),
        }]);
        let err = collect_text(stream).await.unwrap_err();
        assert!(err.is_auth(), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_collect_text_error_without_status_is_sse() {
        let stream = boxed(vec![
            MessageEvent::TextDelta { delta: "partial".into() },
            MessageEvent::Error {
                message: "connection reset".into(),
                status: None,
            },
        ]);
        let err = collect_text(stream).await.unwrap_err();
        assert!(matches!(err, Error::Sse(_)));
    }

    #[tokio::test]
    async fn test_collect_text_empty_is_error() {
        let stream = boxed(vec![MessageEvent::Done {
            text: String::new(),
            stop_reason: StopReason::Stop,
            usage: Usage::default(),
        }]);
        assert!(matches!(
            collect_text(stream).await.unwrap_err(),
            Error::EmptyResponse
        ));
    }
}
