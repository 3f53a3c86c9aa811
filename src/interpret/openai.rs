//! Streaming text generation: the collaborator seam and an
//! OpenAI-compatible chat-completions client speaking server-sent events.

use std::io::{BufRead, BufReader};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Incremental text deltas in arrival order. Dropping it releases the
/// underlying connection.
pub type FragmentSource = Box<dyn Iterator<Item = Result<String, GenerationError>> + Send>;

#[derive(Debug, Error)]
pub enum GenerationError {
    /// The request could not be established: auth, network, quota.
    #[error("text generation unavailable: {0}")]
    Unavailable(String),
    /// The stream broke after it started.
    #[error("text stream interrupted: {0}")]
    Stream(String),
}

impl GenerationError {
    /// The collaborator's diagnostic without the variant prefix.
    pub fn into_message(self) -> String {
        match self {
            Self::Unavailable(m) | Self::Stream(m) => m,
        }
    }
}

pub trait TextGenerator: Send + Sync {
    fn complete(&self, system: &str, user: &str) -> Result<FragmentSource, GenerationError>;
}

// ─── OpenAI-compatible client ───────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

/// Chat-completions client; configuration is fixed at construction.
pub struct OpenAiChatClient {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiChatClient {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_read(read_timeout)
            .build();
        Self {
            agent,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

impl TextGenerator for OpenAiChatClient {
    fn complete(&self, system: &str, user: &str) -> Result<FragmentSource, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            stream: true,
        };

        let response = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .set("Accept", "text/event-stream")
            .send_json(&body)
            .map_err(|e| match e {
                ureq::Error::Status(code, resp) => {
                    let detail = resp.into_string().unwrap_or_default();
                    GenerationError::Unavailable(format!("HTTP {}: {}", code, detail.trim()))
                }
                other => GenerationError::Unavailable(other.to_string()),
            })?;

        debug!(model = %self.model, endpoint = %self.endpoint, "text stream opened");
        Ok(Box::new(SseFragments::new(BufReader::new(response.into_reader()))))
    }
}

// ─── SSE parsing ────────────────────────────────────────────────

/// Yields `choices[0].delta.content` from each `data:` line until `[DONE]`
/// or end of input. Fused after the end or the first error.
pub struct SseFragments<R> {
    reader: R,
    finished: bool,
    line: String,
}

impl<R: BufRead> SseFragments<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, finished: false, line: String::new() }
    }

    fn fail(&mut self, msg: String) -> Option<Result<String, GenerationError>> {
        self.finished = true;
        Some(Err(GenerationError::Stream(msg)))
    }
}

impl<R: BufRead> Iterator for SseFragments<R> {
    type Item = Result<String, GenerationError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => {
                    self.finished = true;
                    return None;
                }
                Ok(_) => {}
                Err(e) => return self.fail(e.to_string()),
            }

            let Some(data) = self.line.trim_end().strip_prefix("data:") else {
                continue; // blank separators, comments, event names
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                self.finished = true;
                return None;
            }

            let chunk: StreamChunk = match serde_json::from_str(data) {
                Ok(c) => c,
                Err(e) => return self.fail(format!("malformed chunk: {}", e)),
            };
            if let Some(err) = chunk.error {
                return self.fail(err.message);
            }
            let content = chunk.choices.into_iter().next().and_then(|c| c.delta.content);
            match content {
                Some(text) if !text.is_empty() => return Some(Ok(text)),
                _ => continue,
            }
        }
        None
    }
}
