//! tahecho-ai: language-model plumbing
//!
//! Message and context types, the provider error type, and an
//! OpenAI-compatible streaming chat provider.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use stream::{MessageEvent, MessageEventStream, collect_text};
pub use types::*;
