use async_trait::async_trait;
use persona_relay_model::{
    ChatLogEntry, ChatLogReader, ChatLogStore, ErrorKind, Exchange,
    ServiceError, SessionSummary,
};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::http::{RestEndpoint, default_client, send, transport_error};

/// The sorted set indexing sessions by last activity.
pub const SESSIONS_KEY: &str = "chat:sessions";

/// Returns the list key holding a session's messages.
#[inline]
pub fn session_key(session_id: &str) -> String {
    format!("chat:{session_id}")
}

#[derive(Deserialize)]
struct Reply<T> {
    result: Option<T>,
    error: Option<String>,
}

impl<T> Reply<T> {
    fn into_result(self, command: &str) -> Result<Option<T>, ServiceError> {
        match self.error {
            Some(err) => Err(ServiceError::new(
                ErrorKind::Rejected,
                format!("{command} failed: {err}"),
            )),
            None => Ok(self.result),
        }
    }
}

/// A chat log backed by the Upstash Redis REST API.
#[derive(Clone, Debug)]
pub struct UpstashRedis {
    endpoint: RestEndpoint,
}

impl UpstashRedis {
    /// Creates a client for the database at `base_url`.
    pub fn new(base_url: &str, token: &str) -> Self {
        Self::with_client(default_client(), base_url, token)
    }

    /// Creates a client sharing an existing HTTP client.
    pub fn with_client(client: Client, base_url: &str, token: &str) -> Self {
        Self {
            endpoint: RestEndpoint::new(client, base_url, token),
        }
    }

    async fn command<T: DeserializeOwned>(
        &self,
        args: &[String],
    ) -> Result<Option<T>, ServiceError> {
        let name = args.first().map(String::as_str).unwrap_or_default();
        trace!("redis command {name} on {}", self.endpoint.base_url());
        let resp = send(self.endpoint.post("").json(args)).await?;
        let reply: Reply<T> = resp.json().await.map_err(transport_error)?;
        reply.into_result(name)
    }
}

#[async_trait]
impl ChatLogStore for UpstashRedis {
    async fn append_exchange(
        &self,
        session_id: &str,
        exchange: &Exchange,
    ) -> Result<(), ServiceError> {
        let key = session_key(session_id);
        let [user, assistant] = exchange.entries().map(|entry| {
            serde_json::to_string(&entry).map_err(|err| {
                ServiceError::new(ErrorKind::InvalidPayload, format!("{err}"))
            })
        });
        let (user, assistant) = (user?, assistant?);
        let commands = json!([
            ["RPUSH", key, user],
            ["RPUSH", key, assistant],
            ["ZADD", SESSIONS_KEY, exchange.ts.to_string(), session_id],
            ["PERSIST", key],
        ]);

        let resp =
            send(self.endpoint.post("/multi-exec").json(&commands)).await?;
        let replies: Vec<Reply<Value>> =
            resp.json().await.map_err(transport_error)?;
        for reply in replies {
            reply.into_result("MULTI-EXEC")?;
        }
        Ok(())
    }
}

#[async_trait]
impl ChatLogReader for UpstashRedis {
    async fn recent_sessions(
        &self,
        limit: usize,
    ) -> Result<Vec<SessionSummary>, ServiceError> {
        if limit == 0 {
            return Ok(vec![]);
        }
        let args = [
            "ZREVRANGE".to_owned(),
            SESSIONS_KEY.to_owned(),
            "0".to_owned(),
            (limit - 1).to_string(),
            "WITHSCORES".to_owned(),
        ];
        let flat: Vec<String> =
            self.command(&args).await?.unwrap_or_default();
        Ok(parse_scored_members(&flat))
    }

    async fn session_messages(
        &self,
        session_id: &str,
    ) -> Result<Vec<ChatLogEntry>, ServiceError> {
        let args = [
            "LRANGE".to_owned(),
            session_key(session_id),
            "0".to_owned(),
            "-1".to_owned(),
        ];
        let raw: Vec<String> = self.command(&args).await?.unwrap_or_default();
        Ok(raw
            .iter()
            .filter_map(|entry| match serde_json::from_str(entry) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!("skipping unreadable log entry: {err}");
                    None
                }
            })
            .collect())
    }
}

/// Pairs up a `WITHSCORES` reply: `[member, score, member, score, ...]`.
fn parse_scored_members(flat: &[String]) -> Vec<SessionSummary> {
    flat.chunks_exact(2)
        .map(|pair| SessionSummary {
            session_id: pair[0].clone(),
            last_active_ms: pair[1].parse::<f64>().unwrap_or_default() as i64,
        })
        .collect()
}
