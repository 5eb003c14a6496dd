//! Conversation state threaded through every workflow step

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The routing decision made once per turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Direct issue-tracker work (the primary domain)
    Issues,
    /// Dependency and change-history analysis
    Relationships,
    /// Conversational fallback, no executor runs
    General,
    /// Not yet classified this turn
    #[default]
    Unresolved,
}

impl TaskType {
    /// Stable lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Issues => "issues",
            TaskType::Relationships => "relationships",
            TaskType::General => "general",
            TaskType::Unresolved => "unresolved",
        }
    }

    /// Parse a label produced by the classification call.
    ///
    /// Accepts the historical aliases (`jira`, `mcp`, `graph`). Returns `None`
    /// for anything else so the caller can decide how to fall back.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "issues" | "issue" | "jira" | "mcp" => Some(TaskType::Issues),
            "relationships" | "relationship" | "graph" => Some(TaskType::Relationships),
            "general" => Some(TaskType::General),
            _ => None,
        }
    }

    /// Whether this type routes to an executor
    pub fn is_domain(&self) -> bool {
        matches!(self, TaskType::Issues | TaskType::Relationships)
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Human,
    Assistant,
    /// Internal note recording the turn's classification
    Classification,
}

/// A role-tagged entry in the conversation log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// Set on classification notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<TaskType>,
}

impl ConversationMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            task_type: None,
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Role::Human, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// A classification note carrying the resolved type and short reasoning
    pub fn classification(task_type: TaskType, reasoning: &str) -> Self {
        let mut msg = Self::new(
            Role::Classification,
            format!("Task classified as: {} ({})", task_type, reasoning),
        );
        msg.task_type = Some(task_type);
        msg
    }
}

/// The unit of work and the unit of persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    /// Absent for a fresh, non-persisted conversation
    pub conversation_id: Option<String>,
    /// The latest raw turn text
    pub user_input: String,
    /// Chronological, append-only log
    pub messages: Vec<ConversationMessage>,
    pub task_type: TaskType,
    /// Executor that ran this turn
    pub current_agent: Option<String>,
    /// Executor name -> last raw (possibly marked) result
    pub agent_results: BTreeMap<String, String>,
    pub final_answer: Option<String>,
    /// Messages dropped from the front by the retention policy
    #[serde(default)]
    pub pruned_messages: usize,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl ConversationState {
    /// Create a fresh state
    pub fn new(conversation_id: Option<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            conversation_id,
            created_at: now,
            updated_at: now,
            ..Default::default()
        }
    }

    /// Start a new turn: record the input and clear the per-turn fields.
    pub fn begin_turn(&mut self, user_input: &str) {
        self.user_input = user_input.to_string();
        self.messages.push(ConversationMessage::human(user_input));
        self.task_type = TaskType::Unresolved;
        self.current_agent = None;
        self.final_answer = None;
    }

    /// Record the classification decision for this turn
    pub fn set_classification(&mut self, task_type: TaskType, reasoning: &str) {
        self.task_type = task_type;
        self.messages
            .push(ConversationMessage::classification(task_type, reasoning));
    }

    /// Record an executor's raw result and mark it as the current agent
    pub fn record_result(&mut self, executor: &str, result: String) {
        self.agent_results.insert(executor.to_string(), result);
        self.current_agent = Some(executor.to_string());
    }

    /// Set the final answer and log it as an assistant message
    pub fn finish(&mut self, answer: String) {
        self.messages.push(ConversationMessage::assistant(answer.clone()));
        self.final_answer = Some(answer);
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Raw result of the executor that ran this turn
    pub fn current_result(&self) -> Option<&str> {
        self.current_agent
            .as_deref()
            .and_then(|name| self.agent_results.get(name))
            .map(String::as_str)
    }

    /// Messages of the turn before the current one, oldest first.
    ///
    /// The current turn starts at the last human message; the previous turn
    /// runs from the human message before it. Empty when there is none.
    pub fn previous_turn(&self) -> &[ConversationMessage] {
        let mut human = self
            .messages
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, m)| m.role == Role::Human)
            .map(|(i, _)| i);
        match (human.next(), human.next()) {
            (Some(current), Some(previous)) => &self.messages[previous..current],
            _ => &[],
        }
    }

    /// The last `n` messages, oldest first
    pub fn recent_messages(&self, n: usize) -> &[ConversationMessage] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    /// Messages ever recorded, including those pruned by retention
    pub fn total_messages(&self) -> usize {
        self.pruned_messages + self.messages.len()
    }
}
