//! Executor contract, result markers and the routing table

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    model::{CompletionRequest, LanguageModel},
    state::{ConversationState, Role, TaskType},
    taxonomy::{ErrorTag, tag_model_error},
};

/// Prefix of a stored result that records a failure
pub const ERROR_MARKER: &str = "Error: ";
/// Prefix of a stored result that explains a missing dependency
pub const UNAVAILABLE_MARKER: &str = "Unavailable: ";

/// Failure reported by an executor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{detail}")]
pub struct ExecutorError {
    pub tag: ErrorTag,
    pub detail: String,
}

impl ExecutorError {
    pub fn new(tag: ErrorTag, detail: impl Into<String>) -> Self {
        Self {
            tag,
            detail: detail.into(),
        }
    }

    /// Tag derived from the text itself, `Unknown` when nothing matches
    pub fn untagged(detail: impl Into<String>) -> Self {
        Self::new(ErrorTag::Unknown, detail)
    }

    /// A required dependency is not configured; `explanation` is shown to the user
    pub fn unavailable(explanation: impl Into<String>) -> Self {
        Self::new(ErrorTag::Unavailable, explanation)
    }

    pub fn from_model(error: &tahecho_ai::Error) -> Self {
        Self::new(tag_model_error(error), error.to_string())
    }
}

/// Encode an executor outcome as the string stored in `agent_results`
pub fn mark(result: Result<String, ExecutorError>) -> String {
    match result {
        Ok(text) => text,
        Err(e) if e.tag == ErrorTag::Unavailable => format!("{}{}", UNAVAILABLE_MARKER, e.detail),
        Err(e) if e.tag == ErrorTag::Unknown => format!("{}{}", ERROR_MARKER, e.detail),
        Err(e) => format!("{}[{}] {}", ERROR_MARKER, e.tag, e.detail),
    }
}

/// A stored result decoded back into its outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkedResult<'a> {
    Success(&'a str),
    Failed {
        tag: Option<ErrorTag>,
        detail: &'a str,
    },
    Unavailable(&'a str),
}

/// Decode a stored result. Tolerates a missing space after the marker.
pub fn parse_marked(result: &str) -> MarkedResult<'_> {
    if let Some(rest) = result.strip_prefix(UNAVAILABLE_MARKER.trim_end()) {
        return MarkedResult::Unavailable(rest.trim_start());
    }
    let Some(rest) = result.strip_prefix(ERROR_MARKER.trim_end()) else {
        return MarkedResult::Success(result);
    };
    let rest = rest.trim_start();

    if let Some(inner) = rest.strip_prefix('[') {
        if let Some((label, detail)) = inner.split_once(']') {
            if let Some(tag) = ErrorTag::parse(label) {
                return MarkedResult::Failed {
                    tag: Some(tag),
                    detail: detail.trim_start(),
                };
            }
        }
    }
    MarkedResult::Failed {
        tag: None,
        detail: rest,
    }
}

/// A capability-named component that performs the work for one task type.
///
/// Implementations report failures through `ExecutorError` and never panic on
/// purpose; the orchestrator still guards against panics.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Stable name, used as the key in `agent_results`
    fn name(&self) -> &str;

    async fn execute(&self, state: &ConversationState) -> Result<String, ExecutorError>;
}

/// Static mapping from task type to exactly one executor
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    routes: HashMap<TaskType, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the executor for a domain task type.
    ///
    /// Non-domain types are ignored: they always route to synthesis.
    pub fn with(mut self, task_type: TaskType, executor: Arc<dyn Executor>) -> Self {
        if task_type.is_domain() {
            self.routes.insert(task_type, executor);
        } else {
            tracing::warn!(
                "Ignoring executor '{}' registered for non-domain task type {}",
                executor.name(),
                task_type
            );
        }
        self
    }

    pub fn get(&self, task_type: TaskType) -> Option<&Arc<dyn Executor>> {
        self.routes.get(&task_type)
    }

    /// Names of every registered executor
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.values().map(|e| e.name()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Executor for a capability whose dependency is not configured
pub struct UnavailableExecutor {
    name: String,
    explanation: String,
}

impl UnavailableExecutor {
    pub fn new(name: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            explanation: explanation.into(),
        }
    }
}

#[async_trait]
impl Executor for UnavailableExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _state: &ConversationState) -> Result<String, ExecutorError> {
        Err(ExecutorError::unavailable(self.explanation.clone()))
    }
}

/// Messages of earlier turns shown to a `ModelExecutor`
const HISTORY_WINDOW: usize = 10;

/// Language-model backed executor with a domain system prompt.
///
/// The recent human/assistant exchange is included so short follow-ups
/// ("PGA", "yes") are read in context.
pub struct ModelExecutor {
    name: String,
    system_prompt: String,
    model: Arc<dyn LanguageModel>,
    temperature: f32,
}

impl ModelExecutor {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            model,
            temperature: 0.1,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn build_prompt(&self, state: &ConversationState) -> String {
        // The last message is the current human turn; exclude it from history
        let recent = state.recent_messages(HISTORY_WINDOW + 1);
        let history: Vec<String> = recent
            .iter()
            .take(recent.len().saturating_sub(1))
            .filter_map(|m| match m.role {
                Role::Human => Some(format!("User: {}", m.content)),
                Role::Assistant => Some(format!("Assistant: {}", m.content)),
                Role::Classification => None,
            })
            .collect();

        if history.is_empty() {
            state.user_input.clone()
        } else {
            format!(
                "Conversation so far:\n{}\n\nCurrent request: {}",
                history.join("\n"),
                state.user_input
            )
        }
    }
}

#[async_trait]
impl Executor for ModelExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, state: &ConversationState) -> Result<String, ExecutorError> {
        let request = CompletionRequest::new(self.build_prompt(state))
            .with_system(self.system_prompt.clone())
            .with_temperature(self.temperature);

        match self.model.complete(&request).await {
            Ok(text) => Ok(text),
            Err(e) => {
                tracing::error!("Executor '{}' model call failed: {}", self.name, e);
                Err(ExecutorError::from_model(&e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::ScriptedModel;

    #[test]
    fn test_mark_and_parse() {
        assert_eq!(parse_marked(&mark(Ok("3 issues".into()))), MarkedResult::Success("3 issues"));

        let marked = mark(Err(ExecutorError::new(ErrorTag::DomainAuth, "401 Unauthorized")));
        assert_eq!(marked, "Error: [domain_auth] 401 Unauthorized");
        assert_eq!(
            parse_marked(&marked),
            MarkedResult::Failed {
                tag: Some(ErrorTag::DomainAuth),
                detail: "401 Unauthorized"
            }
        );

        let marked = mark(Err(ExecutorError::untagged("boom")));
        assert_eq!(
            parse_marked(&marked),
            MarkedResult::Failed {
                tag: None,
                detail: "boom"
            }
        );

        let marked = mark(Err(ExecutorError::unavailable("Jira is not configured.")));
        assert_eq!(
            parse_marked(&marked),
            MarkedResult::Unavailable("Jira is not configured.")
        );
    }

    #[test]
    fn test_parse_marker_without_space_and_unknown_label() {
        assert_eq!(
            parse_marked("Error:timeout"),
            MarkedResult::Failed {
                tag: None,
                detail: "timeout"
            }
        );
        assert_eq!(
            parse_marked("Error: [weird] thing"),
            MarkedResult::Failed {
                tag: None,
                detail: "[weird] thing"
            }
        );
        // Only a prefix counts as a marker
        assert_eq!(
            parse_marked("No Error: here"),
            MarkedResult::Success("No Error: here")
        );
    }

    #[test]
    fn test_registry_ignores_non_domain_routes() {
        let exec: Arc<dyn Executor> = Arc::new(UnavailableExecutor::new("graph", "off"));
        let registry = ExecutorRegistry::new()
            .with(TaskType::General, exec.clone())
            .with(TaskType::Relationships, exec);
        assert!(registry.get(TaskType::General).is_none());
        assert!(registry.get(TaskType::Relationships).is_some());
        assert_eq!(registry.names(), vec!["graph"]);
    }

    #[tokio::test]
    async fn test_unavailable_executor() {
        let exec = UnavailableExecutor::new("issue_relationships", "Jira is not configured.");
        let err = exec.execute(&ConversationState::new(None)).await.unwrap_err();
        assert_eq!(err.tag, ErrorTag::Unavailable);
        assert_eq!(err.detail, "Jira is not configured.");
    }

    #[tokio::test]
    async fn test_model_executor_includes_history() {
        let model = Arc::new(ScriptedModel::constant("PROJ-1: Fix login"));
        let exec = ModelExecutor::new("issue_tracker", "You manage issues.", model.clone());

        let mut state = ConversationState::new(Some("c".into()));
        state.begin_turn("What tickets are assigned to me?");
        state.set_classification(TaskType::Issues, "keyword");
        state.finish("Could you please tell me your username?".into());
        state.begin_turn("wolfgang.ihloff");

        let out = exec.execute(&state).await.unwrap();
        assert_eq!(out, "PROJ-1: Fix login");

        let calls = model.calls.lock();
        let prompt = &calls[0].prompt;
        assert!(prompt.contains("User: What tickets are assigned to me?"));
        assert!(prompt.contains("Assistant: Could you please tell me your username?"));
        assert!(prompt.ends_with("Current request: wolfgang.ihloff"));
        assert!(!prompt.contains("Task classified as"));
        assert_eq!(calls[0].system_prompt.as_deref(), Some("You manage issues."));
    }

    #[tokio::test]
    async fn test_model_executor_tags_model_failure() {
        let exec = ModelExecutor::new("issue_tracker", "sys", Arc::new(ScriptedModel::failing()));
        let mut state = ConversationState::new(None);
        state.begin_turn("list bugs");
        let err = exec.execute(&state).await.unwrap_err();
        assert_eq!(err.tag, ErrorTag::ModelAccess);
    }
}
