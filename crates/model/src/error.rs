use std::error::Error as StdError;
use std::fmt::{self, Display};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required credential or endpoint is not configured.
    Configuration,
    /// The remote service answered with a non-success status.
    Rejected,
    /// The connection failed or was interrupted.
    Transport,
    /// The remote service did not answer in time.
    Timeout,
    /// The response could not be decoded.
    InvalidPayload,
    /// Any other errors.
    Other,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "Configuration error"),
            ErrorKind::Rejected => write!(f, "Rejected"),
            ErrorKind::Transport => write!(f, "Transport error"),
            ErrorKind::Timeout => write!(f, "Timed out"),
            ErrorKind::InvalidPayload => write!(f, "Invalid payload"),
            ErrorKind::Other => write!(f, "Other error"),
        }
    }
}

/// Error returned by the hosted services (stores, mailer).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceError {
    kind: ErrorKind,
    message: String,
}

impl ServiceError {
    /// Creates a new error of the given kind.
    #[inline]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a new error with the `Configuration` kind.
    #[inline]
    pub fn not_configured(what: &str) -> Self {
        Self::new(ErrorKind::Configuration, format!("{what} is not configured"))
    }

    /// Creates a new error with the `Rejected` kind.
    #[inline]
    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Rejected,
            format!("status {status}: {}", body.into()),
        )
    }

    /// Returns the kind of this error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl StdError for ServiceError {}
