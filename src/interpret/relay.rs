//! The interpretation relay: one generator call per request, exposed as a
//! lazy, finite, non-restartable sequence of text fragments.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::openai::{FragmentSource, GenerationError, TextGenerator};
use super::prompt::{self, InterpretationRequest, DEFAULT_PERSONA};

#[derive(Debug, Error)]
pub enum InterpretationFailure {
    /// No stream could be established; nothing was produced.
    #[error("interpretation unavailable: {0}")]
    Unavailable(String),
    /// The stream broke; fragments already yielded remain valid.
    #[error("interpretation interrupted: {0}")]
    Interrupted(String),
}

impl From<GenerationError> for InterpretationFailure {
    fn from(e: GenerationError) -> Self {
        match e {
            GenerationError::Unavailable(m) => Self::Unavailable(m),
            GenerationError::Stream(m) => Self::Interrupted(m),
        }
    }
}

pub struct InterpretationRelay {
    generator: Arc<dyn TextGenerator>,
    persona: String,
}

impl InterpretationRelay {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator, persona: DEFAULT_PERSONA.to_string() }
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    /// Open the stream. An `Err` here means no fragment was ever produced,
    /// including a source whose very first item is an error.
    pub fn stream(&self, request: &InterpretationRequest) -> Result<Interpretation, InterpretationFailure> {
        let system = prompt::system_instruction(&self.persona);
        let user = prompt::user_message(request);
        debug!(system_len = system.len(), user_len = user.len(), "interpretation prompt prepared");

        let mut source = self.generator.complete(&system, &user).map_err(|e| {
            warn!(error = %e, "text generation could not start");
            InterpretationFailure::from(e)
        })?;

        match source.next() {
            Some(Ok(head)) => Ok(Interpretation::new(Some(source), Some(head))),
            Some(Err(e)) => {
                warn!(error = %e, "text stream failed before its first fragment");
                Err(InterpretationFailure::Unavailable(e.into_message()))
            }
            None => {
                info!(fragments = 0, chars = 0, "interpretation complete");
                Ok(Interpretation::new(None, None))
            }
        }
    }
}

/// Fragments in arrival order. After the source ends or fails once, the
/// sequence stays exhausted.
pub struct Interpretation {
    head: Option<String>,
    source: Option<FragmentSource>,
    fragments: usize,
    chars: usize,
}

impl Interpretation {
    fn new(source: Option<FragmentSource>, head: Option<String>) -> Self {
        Self { head, source, fragments: 0, chars: 0 }
    }

    pub fn is_finished(&self) -> bool {
        self.head.is_none() && self.source.is_none()
    }

    /// Drain the whole stream into one string. On interruption the partial
    /// text is returned alongside the failure.
    pub fn collect_text(self) -> Result<String, (String, InterpretationFailure)> {
        let mut text = String::new();
        for fragment in self {
            match fragment {
                Ok(f) => text.push_str(&f),
                Err(e) => return Err((text, e)),
            }
        }
        Ok(text)
    }

    fn count(&mut self, fragment: String) -> Option<Result<String, InterpretationFailure>> {
        self.fragments += 1;
        self.chars += fragment.chars().count();
        Some(Ok(fragment))
    }
}

impl Iterator for Interpretation {
    type Item = Result<String, InterpretationFailure>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(head) = self.head.take() {
            return self.count(head);
        }
        let source = self.source.as_mut()?;
        match source.next() {
            Some(Ok(fragment)) => self.count(fragment),
            Some(Err(e)) => {
                self.source = None;
                warn!(fragments = self.fragments, error = %e, "interpretation stream interrupted");
                Some(Err(e.into()))
            }
            None => {
                self.source = None;
                info!(fragments = self.fragments, chars = self.chars, "interpretation complete");
                None
            }
        }
    }
}

impl Drop for Interpretation {
    fn drop(&mut self) {
        if self.source.take().is_some() {
            debug!(fragments = self.fragments, "interpretation dropped early, releasing upstream");
        }
    }
}
