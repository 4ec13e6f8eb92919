//! Core logic of the relay: prompt assembly, retrieval, stream relaying
//! and background logging.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod chat;
pub mod conversation;
mod error;
mod log_sink;
pub mod prompt;
mod relay;
pub mod retrieval;

pub use chat::{ChatService, ChatServiceBuilder};
pub use error::{Error, ErrorKind};
pub use log_sink::{LogFailure, LogSink};
pub use relay::{
    AbortReason, Relay, RelayOptions, RelayOutcome, RelayStream,
    TERMINAL_EVENT,
};
