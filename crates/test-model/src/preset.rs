use serde::{Deserialize, Serialize};
use serde_json::json;

/// A chunk in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetChunk {
    /// The bytes sent to the caller.
    pub raw: String,
    /// The reply text those bytes carry.
    pub content: String,
}

impl PresetChunk {
    /// Creates a chunk holding one OpenAI-style `delta.content` event.
    pub fn delta(content: &str) -> Self {
        let event = json!({ "choices": [{ "delta": { "content": content } }] });
        Self {
            raw: format!("data: {event}\n\n"),
            content: content.to_owned(),
        }
    }

    /// Creates a chunk that carries no reply text.
    pub fn raw<S: Into<String>>(raw: S) -> Self {
        Self {
            raw: raw.into(),
            content: String::new(),
        }
    }
}

/// How a preset response behaves after its last chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresetEnding {
    /// The stream ends normally.
    #[default]
    Complete,
    /// The connection drops.
    Interrupt,
    /// The upstream goes silent and never ends the stream.
    Stall,
}

/// The preset response for a completion request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Chunks in this response.
    pub chunks: Vec<PresetChunk>,
    /// What happens after the last chunk.
    #[serde(default)]
    pub ending: PresetEnding,
    /// If set, the request is rejected with this status and body.
    pub rejection: Option<(u16, String)>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified chunks.
    #[inline]
    pub fn with_chunks(chunks: impl Into<Vec<PresetChunk>>) -> Self {
        Self {
            chunks: chunks.into(),
            ending: PresetEnding::Complete,
            rejection: None,
        }
    }

    /// Creates a response that is rejected before streaming.
    #[inline]
    pub fn rejected<S: Into<String>>(status: u16, body: S) -> Self {
        Self {
            chunks: vec![],
            ending: PresetEnding::Complete,
            rejection: Some((status, body.into())),
        }
    }

    /// Sets the behavior after the last chunk.
    #[inline]
    pub fn with_ending(mut self, ending: PresetEnding) -> Self {
        self.ending = ending;
        self
    }
}
