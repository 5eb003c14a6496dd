//! tahecho-agent: task-routing workflow engine
//!
//! Each conversational turn is classified, routed to at most one executor and
//! turned into a single user-facing answer. Conversation state is checkpointed
//! per conversation id between turns.

pub mod checkpoint;
pub mod classifier;
pub mod error;
pub mod events;
pub mod executor;
pub mod locks;
pub mod model;
pub mod retention;
pub mod state;
pub mod synthesizer;
pub mod taxonomy;
pub mod workflow;

pub use checkpoint::{CheckpointInfo, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use classifier::{Classification, ClassificationMethod, TaskClassifier};
pub use error::{Error, Result};
pub use events::{EventSink, NoopSink, Step, TracingSink, WorkflowEvent};
pub use executor::{Executor, ExecutorError, ExecutorRegistry, ModelExecutor, UnavailableExecutor};
pub use model::{CompletionRequest, LanguageModel, ProviderModel, RetryConfig};
pub use retention::RetentionPolicy;
pub use state::{ConversationMessage, ConversationState, Role, TaskType};
pub use synthesizer::{ResponseSynthesizer, SynthesisKind};
pub use taxonomy::{ErrorTag, normalize};
pub use workflow::{Orchestrator, WorkflowConfig};
