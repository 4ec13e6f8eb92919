//! Conversation-related types.

use persona_relay_model::{ChatTurn, CompletionRequest};

/// How many of the most recent history turns are sent upstream.
pub const HISTORY_WINDOW: usize = 10;

/// One inbound chat request.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct ConversationRequest {
    /// The new user message.
    pub message: String,
    /// Prior turns, oldest first.
    pub history: Vec<ChatTurn>,
    /// Groups the exchange into a logged session when present.
    pub session_id: Option<String>,
}

impl ConversationRequest {
    /// Creates a request with no history and no session.
    #[inline]
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Attaches the prior turns.
    #[inline]
    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    /// Attaches a session id. An empty id is treated as absent.
    #[inline]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        let session_id = session_id.into();
        self.session_id = (!session_id.is_empty()).then_some(session_id);
        self
    }
}

/// Builds the upstream turns: the system prompt, at most the last
/// [`HISTORY_WINDOW`] history turns in their original order, then the
/// new user message.
pub fn build_completion_request(
    system_prompt: String,
    history: &[ChatTurn],
    message: &str,
) -> CompletionRequest {
    let window = &history[history.len().saturating_sub(HISTORY_WINDOW)..];
    let mut turns = Vec::with_capacity(window.len() + 2);
    turns.push(ChatTurn::system(system_prompt));
    turns.extend_from_slice(window);
    turns.push(ChatTurn::user(message));
    CompletionRequest { turns }
}
