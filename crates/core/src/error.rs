use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::time::Duration;

use persona_relay_model::ProviderError;

/// The kind of error that stopped a chat request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request itself is invalid, e.g. the message is empty.
    InvalidInput,
    /// The relay is missing a required credential.
    Configuration,
    /// The upstream provider refused or failed to open the stream.
    Upstream,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidInput => write!(f, "Invalid input"),
            ErrorKind::Configuration => write!(f, "Configuration error"),
            ErrorKind::Upstream => write!(f, "Upstream error"),
        }
    }
}

/// Describes why a chat request failed before streaming started.
///
/// Once the stream is open, failures are never reported as errors.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Error {
    kind: ErrorKind,
    reason: Option<String>,
    detail: Option<String>,
}

impl Error {
    /// Creates a new error with the `InvalidInput` kind.
    #[inline]
    pub fn invalid_input() -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            reason: None,
            detail: None,
        }
    }

    /// Creates a new error with the `Configuration` kind.
    #[inline]
    pub fn configuration() -> Self {
        Self {
            kind: ErrorKind::Configuration,
            reason: None,
            detail: None,
        }
    }

    /// Creates a new error with the `Upstream` kind from a provider error.
    pub fn upstream(err: &dyn ProviderError) -> Self {
        Self {
            kind: ErrorKind::Upstream,
            reason: Some(format!("{err}")),
            detail: err.detail().map(ToOwned::to_owned),
        }
    }

    /// Creates a new error with the `Upstream` kind for an upstream that
    /// did not answer in time.
    pub fn upstream_timeout(limit: Duration) -> Self {
        Self {
            kind: ErrorKind::Upstream,
            reason: Some(format!("upstream did not answer within {limit:?}")),
            detail: None,
        }
    }

    /// Attaches a reason to the error.
    #[inline]
    pub fn with_reason<S: Into<String>>(self, reason: S) -> Self {
        Self {
            reason: Some(reason.into()),
            ..self
        }
    }

    /// Returns the kind of this error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the reason for the error.
    #[inline]
    pub fn reason(&self) -> Cow<'_, str> {
        match self.reason.as_deref() {
            Some(reason) => Cow::Borrowed(reason),
            None => Cow::Owned(format!("{}", self.kind)),
        }
    }

    /// Returns what the upstream sent along with its refusal.
    #[inline]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason())
    }
}

impl StdError for Error {}
