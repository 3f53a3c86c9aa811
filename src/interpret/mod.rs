//! Interpretation subsystem: chart facts and a question in, streamed text out.

pub mod openai;
pub mod prompt;
pub mod relay;

pub use openai::{FragmentSource, GenerationError, OpenAiChatClient, SseFragments, TextGenerator};
pub use prompt::{InterpretationRequest, DEFAULT_PERSONA};
pub use relay::{Interpretation, InterpretationFailure, InterpretationRelay};
