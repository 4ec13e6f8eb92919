use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

use persona_relay_model::{ErrorKind, ServiceError};
use reqwest::{Client, RequestBuilder, Response, header};

/// A base URL plus bearer token, shared by all REST clients here.
#[derive(Clone)]
pub(crate) struct RestEndpoint {
    client: Client,
    base_url: Arc<str>,
    token: Arc<str>,
}

impl RestEndpoint {
    pub(crate) fn new(client: Client, base_url: &str, token: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').into(),
            token: token.into(),
        }
    }

    pub(crate) fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Debug for RestEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestEndpoint")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Creates an HTTP client with a 10 s connect timeout and a 30 s
/// overall request timeout.
pub fn default_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|err| {
            warn!("falling back to a default http client: {err}");
            Client::new()
        })
}

pub(crate) fn transport_error(err: reqwest::Error) -> ServiceError {
    let kind = if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_decode() {
        ErrorKind::InvalidPayload
    } else {
        ErrorKind::Transport
    };
    ServiceError::new(kind, format!("{err}"))
}

/// Sends the request and turns a non-success status into an error
/// carrying the response body.
pub(crate) async fn send(
    req: RequestBuilder,
) -> Result<Response, ServiceError> {
    let resp = req.send().await.map_err(transport_error)?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ServiceError::rejected(status.as_u16(), body))
}
