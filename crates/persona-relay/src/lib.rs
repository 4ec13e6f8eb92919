//! A streaming chat relay that answers as a persona.
//!
//! The crate wires the relay core to its HTTP surface and hosts the
//! companion utilities: exporting chat logs and indexing curated data
//! into the vector store. The `cli` feature builds the binary.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod export;
pub mod index;
pub mod knowledge;
pub mod server;

/// Re-exports of [`persona_relay_core`] crate.
pub mod core {
    pub use persona_relay_core::*;
}
