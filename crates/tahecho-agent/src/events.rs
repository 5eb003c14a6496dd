//! Workflow event types and injectable sinks

use serde::{Deserialize, Serialize};

use crate::{classifier::ClassificationMethod, state::TaskType};

/// Graph nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Classify,
    Route,
    Execute,
    Synthesize,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Classify => "classify",
            Step::Route => "route",
            Step::Execute => "execute",
            Step::Synthesize => "synthesize",
        }
    }
}

/// Events emitted while a turn runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A turn started; `resumed` is true when a checkpoint was loaded
    TurnStart {
        conversation_id: Option<String>,
        resumed: bool,
    },

    StepStart { step: Step },

    /// A node finished; `output` is a short description of what it produced
    StepEnd { step: Step, output: String },

    Classified {
        task_type: TaskType,
        reasoning: String,
        method: ClassificationMethod,
    },

    ExecutorFinished { executor: String, is_error: bool },

    /// Loading or saving the checkpoint failed; the turn continued
    CheckpointFailed { operation: String, message: String },

    TurnEnd {
        conversation_id: Option<String>,
        task_type: TaskType,
    },
}

impl WorkflowEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowEvent::TurnEnd { .. })
    }
}

/// Receiver of workflow events. Emission must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: WorkflowEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: WorkflowEvent) {}
}

/// Logs every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: WorkflowEvent) {
        match &event {
            WorkflowEvent::CheckpointFailed { operation, message } => {
                tracing::warn!("checkpoint {} failed: {}", operation, message)
            }
            WorkflowEvent::ExecutorFinished {
                executor,
                is_error: true,
            } => tracing::warn!("executor {} reported an error", executor),
            other => tracing::debug!(?other, "workflow event"),
        }
    }
}

/// Fan events out to subscribers; having none is not an error.
impl EventSink for tokio::sync::broadcast::Sender<WorkflowEvent> {
    fn emit(&self, event: WorkflowEvent) {
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serde_tag() {
        let event = WorkflowEvent::StepStart {
            step: Step::Classify,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step_start");
        assert_eq!(json["step"], "classify");
    }

    #[tokio::test]
    async fn test_broadcast_sink_delivers() {
        let (tx, mut rx) = tokio::sync::broadcast::channel(8);
        tx.emit(WorkflowEvent::TurnEnd {
            conversation_id: Some("c".into()),
            task_type: TaskType::General,
        });
        let event = rx.recv().await.unwrap();
        assert!(event.is_terminal());
    }

    #[test]
    fn test_broadcast_sink_without_receivers_is_silent() {
        let (tx, rx) = tokio::sync::broadcast::channel::<WorkflowEvent>(1);
        drop(rx);
        tx.emit(WorkflowEvent::StepStart { step: Step::Route });
        NoopSink.emit(WorkflowEvent::StepStart { step: Step::Route });
    }
}
