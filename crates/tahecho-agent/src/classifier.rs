//! Hybrid task classifier
//!
//! Decides the task type for a turn without a model call when it can:
//!
//! - keyword fast path
//! - continuation of a domain conversation (short reply to a clarifying question)
//!
//! Otherwise the model is asked for a `{task_type, reasoning}` decision which is
//! decoded through a parser chain. A failed model call falls back to `General`.
//! Input containing a domain keyword always resolves to the primary domain, so
//! the keyword check runs first. Classification never fails outward.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    model::{CompletionRequest, LanguageModel},
    state::{ConversationState, Role, TaskType},
};

/// Phrases in an assistant message that signal an open domain question
const CONTEXT_INDICATORS: &[&str] = &[
    "jira",
    "ticket",
    "assigned",
    "username",
    "email address",
    "project key",
    "issue key",
    "search for tickets",
    "clarification needed",
    "could you please tell me",
    "could you confirm",
];

static DOMAIN_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(jira|tickets?|issues?|assigned|projects?|epics?|stor(?:y|ies)|tasks?|bugs?|sprints?|backlogs?|status)\b",
    )
    .unwrap()
});

/// Shapes of a short reply that only makes sense as an answer to a prior question
static FOLLOW_UP_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // email
        r"^[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9.-]+$",
        // dotted identifier (first.last)
        r"^[a-zA-Z][a-zA-Z0-9_-]*(\.[a-zA-Z0-9_-]+)+$",
        // issue key
        r"^[A-Z][A-Z0-9]+-\d+$",
        // project key
        r"^[A-Z]{2,10}$",
        // username-like
        r"^[a-zA-Z][a-zA-Z0-9._-]{2,20}$",
        // confirmations
        r"(?i)^(yes|y|no|n|ok|okay|sure)$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Pleasantries that fit the reply shapes but never answer a question
const NON_ANSWERS: &[&str] = &["thanks", "thank", "thx", "cheers", "hello", "hi", "hey", "bye", "goodbye"];

static JSON_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```|(\{.*\})")
        .unwrap()
});

/// Whether the text contains primary-domain vocabulary
pub fn has_domain_keyword(text: &str) -> bool {
    DOMAIN_KEYWORDS.is_match(text)
}

/// Whether the text has the shape of a short follow-up answer
pub fn is_follow_up_shape(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() || text.split_whitespace().count() != 1 {
        return false;
    }
    let word = text.trim_end_matches(['!', '.']).to_lowercase();
    if NON_ANSWERS.contains(&word.as_str()) {
        return false;
    }
    FOLLOW_UP_PATTERNS.iter().any(|re| re.is_match(text))
}

/// How a decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    Continuation,
    Keyword,
    Model,
    Fallback,
}

/// The outcome recorded for a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub task_type: TaskType,
    pub reasoning: String,
    pub method: ClassificationMethod,
}

/// Structured decision requested from the model
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Decision {
    pub task_type: String,
    #[serde(default)]
    pub reasoning: String,
}

/// Decoded model reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifierReply {
    Structured(Decision),
    FreeText(String),
}

impl ClassifierReply {
    /// Decode raw model text: whole-text JSON, then a delimited block, then free text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(decision) = serde_json::from_str::<Decision>(trimmed) {
            return ClassifierReply::Structured(decision);
        }

        if let Some(caps) = JSON_BLOCK.captures(trimmed) {
            if let Some(block) = caps.get(1).or_else(|| caps.get(2)) {
                if let Ok(decision) = serde_json::from_str::<Decision>(block.as_str()) {
                    return ClassifierReply::Structured(decision);
                }
            }
        }

        ClassifierReply::FreeText(trimmed.to_string())
    }

    /// Resolve to a task type and the reasoning to record
    pub fn resolve(self) -> (TaskType, String) {
        match self {
            ClassifierReply::Structured(decision) => {
                match TaskType::from_label(&decision.task_type) {
                    Some(task_type) => (task_type, decision.reasoning),
                    None => {
                        tracing::warn!(
                            "Classifier returned unknown task type '{}', using general",
                            decision.task_type
                        );
                        (TaskType::General, decision.reasoning)
                    }
                }
            }
            ClassifierReply::FreeText(text) => {
                let lower = text.to_lowercase();
                let task_type = if ["jira", "issues", "mcp"].iter().any(|k| lower.contains(k)) {
                    TaskType::Issues
                } else if ["relationships", "graph"].iter().any(|k| lower.contains(k)) {
                    TaskType::Relationships
                } else {
                    TaskType::General
                };
                (task_type, text)
            }
        }
    }
}

const CLASSIFICATION_PROMPT: &str = r#"You are a task classifier for a Jira management system. Decide which capability should handle the user's request.

Available task types:
1. "issues": direct Jira operations
   - "What tickets are assigned to me?"
   - "Create a new ticket in project X"
   - "Get details for ticket ABC-123"
   - JQL queries and filtering
2. "relationships": dependency, blocking and change-history analysis across issues
   - "What is blocking PROJ-42?"
   - "How did the scope of this epic change last month?"
3. "general": general conversation or anything unrelated to Jira

Respond with ONLY a JSON object:
```json
{"task_type": "issues|relationships|general", "reasoning": "brief explanation"}
```"#;

/// Hybrid classifier
pub struct TaskClassifier {
    model: Arc<dyn LanguageModel>,
    temperature: f32,
}

impl TaskClassifier {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            temperature: 0.1,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Classify the current turn and record the decision on `state`.
    pub async fn classify(&self, state: &mut ConversationState) -> Classification {
        let classification = self.decide(state).await;
        tracing::info!(
            "Task classified as {} via {:?}",
            classification.task_type,
            classification.method
        );
        state.set_classification(classification.task_type, &classification.reasoning);
        classification
    }

    async fn decide(&self, state: &ConversationState) -> Classification {
        // A keyword settles it; continuation only matters for bare replies
        if has_domain_keyword(&state.user_input) {
            return Classification {
                task_type: TaskType::Issues,
                reasoning: "Detected Jira-related keywords".to_string(),
                method: ClassificationMethod::Keyword,
            };
        }

        if let Some(task_type) = continuation(state) {
            return Classification {
                task_type,
                reasoning: "Continuing previous Jira conversation".to_string(),
                method: ClassificationMethod::Continuation,
            };
        }

        let request = CompletionRequest::new(format!("User request: {}", state.user_input))
            .with_system(CLASSIFICATION_PROMPT)
            .with_temperature(self.temperature)
            .with_max_tokens(200);

        match self.model.complete(&request).await {
            Ok(raw) => {
                let (task_type, reasoning) = ClassifierReply::parse(&raw).resolve();
                Classification {
                    task_type,
                    reasoning,
                    method: ClassificationMethod::Model,
                }
            }
            Err(e) => {
                tracing::error!("Task classification failed: {}", e);
                Classification {
                    task_type: TaskType::General,
                    reasoning: format!("Task classification failed, defaulting to general: {}", e),
                    method: ClassificationMethod::Fallback,
                }
            }
        }
    }
}

/// Continuation heuristic.
///
/// Applies only when the previous turn was a domain turn whose answer left a
/// question open and the current input is a bare short reply. The previous
/// turn's task type is inherited.
pub fn continuation(state: &ConversationState) -> Option<TaskType> {
    if !is_follow_up_shape(&state.user_input) {
        return None;
    }

    let previous = state.previous_turn();
    let task_type = previous
        .iter()
        .rev()
        .find(|m| m.role == Role::Classification)
        .and_then(|m| m.task_type)
        .filter(TaskType::is_domain)?;

    let asked = previous
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .is_some_and(|m| {
            let lower = m.content.to_lowercase();
            CONTEXT_INDICATORS.iter().any(|ind| lower.contains(ind))
        });

    asked.then_some(task_type)
}
