//! Final response synthesis
//!
//! Only the result of the executor that ran this turn is considered. Marked
//! failures go to the error normalizer, unavailable capabilities pass their
//! explanation through, and successful results are composed by the model under
//! a pass-through contract: reformat, never add or drop facts.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    executor::{MarkedResult, parse_marked},
    model::{CompletionRequest, LanguageModel},
    state::{ConversationState, Role},
    taxonomy::{self, APOLOGY, ErrorTag},
};

const PASS_THROUGH_PROMPT: &str = "You are the final response generator for a Jira assistant. \
Answer the user's request using ONLY the source material between <<< and >>>. \
You may reformat it for readability, for example turning a raw list into bullet points, \
but never add, remove or alter any fact. \
Do not mention internal components, agents, tools or your own reasoning.";

const CONVERSATIONAL_PROMPT: &str = "You are a friendly assistant for a Jira management system. \
Reply conversationally and concisely. When it helps, mention that you can look up issues, \
projects and assignments in Jira.";

/// How the final answer was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "tag", rename_all = "snake_case")]
pub enum SynthesisKind {
    /// Executor output composed by the model
    Composed,
    /// No executor ran; conversational reply
    Conversational,
    /// Unavailable capability; its explanation is the answer
    Unavailable,
    /// Executor failure mapped to a fixed message
    Normalized(ErrorTag),
    /// The composition call failed
    Apology(ErrorTag),
}

impl SynthesisKind {
    pub fn describe(&self) -> String {
        match self {
            SynthesisKind::Composed => "composed".to_string(),
            SynthesisKind::Conversational => "conversational".to_string(),
            SynthesisKind::Unavailable => "unavailable".to_string(),
            SynthesisKind::Normalized(tag) => format!("normalized ({})", tag),
            SynthesisKind::Apology(tag) => format!("apology ({})", tag),
        }
    }
}

/// Builds the one user-facing answer for a turn
pub struct ResponseSynthesizer {
    model: Arc<dyn LanguageModel>,
    temperature: f32,
    history_window: usize,
    hidden_names: Vec<Regex>,
}

impl ResponseSynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            temperature: 0.1,
            history_window: 6,
            hidden_names: vec![],
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Names scrubbed from composed answers
    pub fn with_hidden_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden_names = names
            .into_iter()
            .map(Into::<String>::into)
            .filter(|name| !name.is_empty())
            .filter_map(|name| Regex::new(&format!(r"[ \t]*{}", regex::escape(&name))).ok())
            .collect();
        self
    }

    /// Produce the final answer. Never fails.
    pub async fn synthesize(&self, state: &ConversationState) -> (String, SynthesisKind) {
        match state.current_result().map(parse_marked) {
            Some(MarkedResult::Unavailable(explanation)) => {
                let text = if explanation.trim().is_empty() {
                    taxonomy::normalize(ErrorTag::Unavailable).to_string()
                } else {
                    explanation.to_string()
                };
                (text, SynthesisKind::Unavailable)
            }
            Some(MarkedResult::Failed { tag, detail }) => {
                let chosen = taxonomy::resolve(tag.into_iter().chain(taxonomy::tags_in(detail)));
                tracing::info!("Executor failure normalized as {}", chosen);
                (
                    taxonomy::normalize(chosen).to_string(),
                    SynthesisKind::Normalized(chosen),
                )
            }
            Some(MarkedResult::Success(source)) => {
                let request = CompletionRequest::new(format!(
                    "User's request: {}\n\nSource material:\n<<<\n{}\n>>>\n\nFinal response:",
                    state.user_input, source
                ))
                .with_system(PASS_THROUGH_PROMPT)
                .with_temperature(self.temperature);
                self.compose(&request, SynthesisKind::Composed).await
            }
            None => {
                let request = CompletionRequest::new(self.conversation_prompt(state))
                    .with_system(CONVERSATIONAL_PROMPT)
                    .with_temperature(self.temperature);
                self.compose(&request, SynthesisKind::Conversational).await
            }
        }
    }

    /// A failed composition answers with the fixed apology; the tag is only
    /// reported through the returned kind and the log.
    async fn compose(
        &self,
        request: &CompletionRequest,
        kind: SynthesisKind,
    ) -> (String, SynthesisKind) {
        match self.model.complete(request).await {
            Ok(text) => (self.scrub(text.trim()), kind),
            Err(e) => {
                let tag = taxonomy::tag_model_error(&e);
                tracing::error!("Response composition failed ({}): {}", tag, e);
                (APOLOGY.to_string(), SynthesisKind::Apology(tag))
            }
        }
    }

    fn conversation_prompt(&self, state: &ConversationState) -> String {
        let recent = state.recent_messages(self.history_window + 1);
        let mut lines: Vec<String> = recent
            .iter()
            .take(recent.len().saturating_sub(1))
            .filter_map(|m| match m.role {
                Role::Human => Some(format!("User: {}", m.content)),
                Role::Assistant => Some(format!("Assistant: {}", m.content)),
                Role::Classification => None,
            })
            .collect();
        lines.push(format!("User: {}", state.user_input));
        lines.push("Assistant:".to_string());
        lines.join("\n")
    }

    /// Remove executor names (and the spaces just before them) from model
    /// output. All other whitespace is left alone.
    fn scrub(&self, text: &str) -> String {
        let mut out = text.to_string();
        for name in &self.hidden_names {
            if name.is_match(&out) {
                out = name.replace_all(&out, "").into_owned();
            }
        }
        out.trim().to_string()
    }
}
