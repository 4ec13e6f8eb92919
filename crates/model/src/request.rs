use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// The author of a chat turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The system instructions.
    System,
    /// The end user.
    User,
    /// The model.
    Assistant,
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A complete chat turn.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Who wrote this turn.
    pub role: Role,
    /// The text of this turn.
    pub content: String,
}

impl ChatTurn {
    /// Creates a system turn.
    #[inline]
    pub fn system<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Creates a user turn.
    #[inline]
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates an assistant turn.
    #[inline]
    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A request to be sent to the completion provider.
///
/// Generation parameters (model, sampling temperature, output bound) are
/// part of the provider configuration, not of the request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CompletionRequest {
    /// The input turns, starting with the system turn.
    pub turns: Vec<ChatTurn>,
}
