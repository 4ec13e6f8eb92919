//! An abstraction layer for the hosted services the relay talks to.
//!
//! This crate establishes a unified protocol between the relay and its
//! external collaborators: the streaming chat-completion provider, the
//! vector store used for retrieval and indexing, the key-value store
//! holding chat logs, and the outbound mail provider. The relay can
//! then switch between real HTTP clients and local fakes without
//! modifying the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod log;
mod mail;
mod provider;
mod request;
mod response;
mod vector;

pub use error::*;
pub use log::*;
pub use mail::*;
pub use provider::*;
pub use request::*;
pub use response::*;
pub use vector::*;
