use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::request::Role;

/// One message of a logged session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatLogEntry {
    /// Who wrote the message.
    pub role: Role,
    /// The message text.
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub ts: i64,
}

/// A completed user/assistant exchange, ready to be logged.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Exchange {
    /// The user message.
    pub user: String,
    /// The full assistant reply.
    pub assistant: String,
    /// Milliseconds since the Unix epoch, shared by both entries.
    pub ts: i64,
}

impl Exchange {
    /// Returns the two log entries of this exchange, user first.
    pub fn entries(&self) -> [ChatLogEntry; 2] {
        [
            ChatLogEntry {
                role: Role::User,
                content: self.user.clone(),
                ts: self.ts,
            },
            ChatLogEntry {
                role: Role::Assistant,
                content: self.assistant.clone(),
                ts: self.ts,
            },
        ]
    }
}

/// An entry of the session recency index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionSummary {
    /// The caller-supplied session identifier.
    pub session_id: String,
    /// Milliseconds since the Unix epoch of the last logged exchange.
    pub last_active_ms: i64,
}

/// The append side of the chat log.
///
/// Logs are append-only: implementations must never rewrite or delete
/// entries, and logged sessions must not expire.
#[async_trait]
pub trait ChatLogStore: Send + Sync {
    /// Appends both entries of `exchange` to the session log, in order,
    /// and bumps the session in the recency index. All of it must be
    /// applied atomically.
    async fn append_exchange(
        &self,
        session_id: &str,
        exchange: &Exchange,
    ) -> Result<(), ServiceError>;
}

/// The read side of the chat log.
#[async_trait]
pub trait ChatLogReader: Send + Sync {
    /// Lists at most `limit` sessions, most recently active first.
    async fn recent_sessions(
        &self,
        limit: usize,
    ) -> Result<Vec<SessionSummary>, ServiceError>;

    /// Returns every message of a session in chronological order. An
    /// unknown session has no messages.
    async fn session_messages(
        &self,
        session_id: &str,
    ) -> Result<Vec<ChatLogEntry>, ServiceError>;
}
