//! Workflow orchestrator
//!
//! A small directed graph: `classify -> route -> {execute | synthesize} ->
//! synthesize -> end`. Routing is a pure function of the task type. Each turn
//! loads the conversation's checkpoint, runs the graph once and writes the
//! state back. Turns on the same conversation id are queued.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;

use crate::{
    checkpoint::CheckpointStore,
    classifier::{ClassificationMethod, TaskClassifier},
    events::{EventSink, NoopSink, Step, WorkflowEvent},
    executor::{ExecutorError, ExecutorRegistry, mark},
    locks::TurnLocks,
    model::LanguageModel,
    retention::RetentionPolicy,
    state::{ConversationState, TaskType},
    synthesizer::ResponseSynthesizer,
    taxonomy::{self, APOLOGY, ErrorTag},
};

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Sampling temperature for classification and synthesis
    pub temperature: f32,
    /// Applied before each checkpoint write
    pub retention: RetentionPolicy,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            retention: RetentionPolicy::default(),
        }
    }
}

/// Graph nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Classify,
    Route,
    Execute(TaskType),
    Synthesize,
    End,
}

impl Node {
    fn label(&self) -> String {
        match self {
            Node::Classify => "classify".to_string(),
            Node::Route => "route".to_string(),
            Node::Execute(task_type) => format!("execute:{}", task_type),
            Node::Synthesize => "synthesize".to_string(),
            Node::End => "end".to_string(),
        }
    }
}

/// Edge selection after `route`.
///
/// Domain task types go to their executor; everything else, including a domain
/// type with no registered executor, goes straight to synthesis.
pub fn route(task_type: TaskType, registry: &ExecutorRegistry) -> Node {
    match task_type {
        TaskType::Issues | TaskType::Relationships if registry.get(task_type).is_some() => {
            Node::Execute(task_type)
        }
        _ => Node::Synthesize,
    }
}

/// The task-routing workflow engine
pub struct Orchestrator {
    config: WorkflowConfig,
    classifier: TaskClassifier,
    registry: ExecutorRegistry,
    synthesizer: ResponseSynthesizer,
    store: Arc<dyn CheckpointStore>,
    sink: Arc<dyn EventSink>,
    locks: TurnLocks,
}

impl Orchestrator {
    /// Create an orchestrator. The routing table is fixed from here on.
    pub fn new(
        config: WorkflowConfig,
        model: Arc<dyn LanguageModel>,
        registry: ExecutorRegistry,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        let classifier =
            TaskClassifier::new(Arc::clone(&model)).with_temperature(config.temperature);
        let synthesizer = ResponseSynthesizer::new(model)
            .with_temperature(config.temperature)
            .with_hidden_names(registry.names());
        Self {
            config,
            classifier,
            registry,
            synthesizer,
            store,
            sink: Arc::new(NoopSink),
            locks: TurnLocks::new(),
        }
    }

    /// Set the event sink
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Run one turn and return the final answer. Never fails.
    pub async fn run(&self, user_input: &str, conversation_id: Option<&str>) -> String {
        match AssertUnwindSafe(self.run_turn(user_input, conversation_id))
            .catch_unwind()
            .await
        {
            Ok(state) => state
                .final_answer
                .unwrap_or_else(|| APOLOGY.to_string()),
            Err(_) => {
                tracing::error!("Turn aborted by a panic outside the graph nodes");
                APOLOGY.to_string()
            }
        }
    }

    /// Run one turn and return the resulting state
    pub async fn run_turn(
        &self,
        user_input: &str,
        conversation_id: Option<&str>,
    ) -> ConversationState {
        let _turn = match conversation_id {
            Some(id) => Some(self.locks.acquire(id).await),
            None => None,
        };

        let (mut state, resumed) = self.load(conversation_id).await;
        state.begin_turn(user_input);
        self.sink.emit(WorkflowEvent::TurnStart {
            conversation_id: state.conversation_id.clone(),
            resumed,
        });

        let mut node = Node::Classify;
        while node != Node::End {
            tracing::debug!("Entering node {}", node.label());
            node = match node {
                Node::Classify => self.classify_node(&mut state).await,
                Node::Route => self.route_node(&state),
                Node::Execute(task_type) => self.execute_node(&mut state, task_type).await,
                Node::Synthesize => self.synthesize_node(&mut state).await,
                Node::End => Node::End,
            };
        }

        self.config.retention.apply(&mut state);
        if let Some(id) = conversation_id {
            if let Err(e) = self.store.save(id, &state).await {
                tracing::warn!("Failed to save checkpoint for {}: {}", id, e);
                self.sink.emit(WorkflowEvent::CheckpointFailed {
                    operation: "save".to_string(),
                    message: e.to_string(),
                });
            }
        }

        self.sink.emit(WorkflowEvent::TurnEnd {
            conversation_id: state.conversation_id.clone(),
            task_type: state.task_type,
        });
        state
    }

    /// Load the last checkpoint; absent or unreadable means a fresh state
    async fn load(&self, conversation_id: Option<&str>) -> (ConversationState, bool) {
        let Some(id) = conversation_id else {
            return (ConversationState::new(None), false);
        };

        match self.store.load(id).await {
            Ok(Some(mut state)) => {
                state.conversation_id = Some(id.to_string());
                (state, true)
            }
            Ok(None) => (ConversationState::new(Some(id.to_string())), false),
            Err(e) => {
                tracing::warn!("Failed to load checkpoint for {}, starting fresh: {}", id, e);
                self.sink.emit(WorkflowEvent::CheckpointFailed {
                    operation: "load".to_string(),
                    message: e.to_string(),
                });
                (ConversationState::new(Some(id.to_string())), false)
            }
        }
    }

    async fn classify_node(&self, state: &mut ConversationState) -> Node {
        self.sink.emit(WorkflowEvent::StepStart {
            step: Step::Classify,
        });

        let outcome = AssertUnwindSafe(self.classifier.classify(state))
            .catch_unwind()
            .await;
        let classification = match outcome {
            Ok(c) => c,
            Err(_) => {
                tracing::error!("Classifier panicked, defaulting to general");
                let reasoning = "Task classification failed, defaulting to general";
                state.set_classification(TaskType::General, reasoning);
                crate::classifier::Classification {
                    task_type: TaskType::General,
                    reasoning: reasoning.to_string(),
                    method: ClassificationMethod::Fallback,
                }
            }
        };

        self.sink.emit(WorkflowEvent::StepEnd {
            step: Step::Classify,
            output: format!("{} ({:?})", classification.task_type, classification.method),
        });
        self.sink.emit(WorkflowEvent::Classified {
            task_type: classification.task_type,
            reasoning: classification.reasoning,
            method: classification.method,
        });
        Node::Route
    }

    fn route_node(&self, state: &ConversationState) -> Node {
        self.sink.emit(WorkflowEvent::StepStart { step: Step::Route });
        let next = route(state.task_type, &self.registry);
        if state.task_type.is_domain() && next == Node::Synthesize {
            tracing::warn!(
                "No executor registered for {}, answering conversationally",
                state.task_type
            );
        }
        self.sink.emit(WorkflowEvent::StepEnd {
            step: Step::Route,
            output: next.label(),
        });
        next
    }

    async fn execute_node(&self, state: &mut ConversationState, task_type: TaskType) -> Node {
        let Some(executor) = self.registry.get(task_type).cloned() else {
            return Node::Synthesize;
        };
        self.sink.emit(WorkflowEvent::StepStart {
            step: Step::Execute,
        });
        tracing::info!("Dispatching to executor {}", executor.name());

        let outcome = AssertUnwindSafe(executor.execute(state))
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::untagged(format!(
                "executor {} panicked",
                executor.name()
            ))),
        };

        if let Err(ref e) = result {
            tracing::error!("Executor {} failed ({}): {}", executor.name(), e.tag, e.detail);
        }
        let is_error = result.is_err();
        state.record_result(executor.name(), mark(result));

        self.sink.emit(WorkflowEvent::ExecutorFinished {
            executor: executor.name().to_string(),
            is_error,
        });
        self.sink.emit(WorkflowEvent::StepEnd {
            step: Step::Execute,
            output: if is_error { "error" } else { "ok" }.to_string(),
        });
        Node::Synthesize
    }

    async fn synthesize_node(&self, state: &mut ConversationState) -> Node {
        self.sink.emit(WorkflowEvent::StepStart {
            step: Step::Synthesize,
        });

        let outcome = AssertUnwindSafe(self.synthesizer.synthesize(state))
            .catch_unwind()
            .await;
        let (answer, description) = match outcome {
            Ok((answer, kind)) => (answer, kind.describe()),
            Err(_) => {
                tracing::error!("Synthesizer panicked");
                (
                    taxonomy::normalize(ErrorTag::Unknown).to_string(),
                    "panic".to_string(),
                )
            }
        };
        state.finish(answer);

        self.sink.emit(WorkflowEvent::StepEnd {
            step: Step::Synthesize,
            output: description,
        });
        Node::End
    }
}
