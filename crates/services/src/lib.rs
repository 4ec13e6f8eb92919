//! Clients for the hosted services behind the relay: the chat log store,
//! the vector store and the mail provider.

#[macro_use]
extern crate tracing;

mod http;
mod redis;
mod resend;
mod vector;

pub use http::default_client;
pub use redis::{SESSIONS_KEY, UpstashRedis, session_key};
pub use resend::{ResendMailer, escape_html, render_contact_html};
pub use vector::UpstashVector;
