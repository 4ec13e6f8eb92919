//! Exports the chat logs to one JSON file per session.

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use persona_relay_model::{
    ChatLogEntry, ChatLogReader, ErrorKind, ServiceError, SessionSummary,
};
use persona_relay_services::default_client;
use regex::Regex;
use reqwest::{Client, Url, header};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;

static UNSAFE_FILE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("valid regex"));

/// One exported session, as written to disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionExport {
    /// The session id.
    pub session_id: String,
    /// Last activity, ISO-8601 with millisecond precision.
    pub last_active: String,
    /// Every logged message, oldest first.
    pub messages: Vec<ChatLogEntry>,
}

/// What an export run did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Sessions whose file was written.
    pub written: usize,
    /// Sessions whose file was already up to date.
    pub skipped: usize,
    /// Sessions that could not be fetched.
    pub failed: usize,
    /// Messages across all written and skipped sessions.
    pub messages: usize,
}

/// Error returned by [`export_sessions`].
#[derive(Debug)]
pub enum ExportError {
    /// The session list could not be fetched.
    Fetch(ServiceError),
    /// The output could not be written.
    Io(io::Error),
}

impl Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Fetch(err) => write!(f, "failed to fetch logs: {err}"),
            ExportError::Io(err) => write!(f, "failed to write export: {err}"),
        }
    }
}

impl StdError for ExportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ExportError::Fetch(err) => Some(err),
            ExportError::Io(err) => Some(err),
        }
    }
}

impl From<io::Error> for ExportError {
    fn from(err: io::Error) -> Self {
        ExportError::Io(err)
    }
}

/// Returns the file a session is exported to.
///
/// Ids that are not safe file names are sanitized and suffixed with a
/// hash of the original id, so distinct ids never share a file.
pub fn session_file(out_dir: &Path, session_id: &str) -> PathBuf {
    let sanitized = UNSAFE_FILE_CHARS.replace_all(session_id, "_");
    let name = if sanitized == session_id && !session_id.is_empty() {
        session_id.to_owned()
    } else {
        let digest = Sha256::digest(session_id.as_bytes());
        let hash: String =
            digest[..4].iter().map(|b| format!("{b:02x}")).collect();
        format!("{sanitized}-{hash}")
    };
    out_dir.join(format!("{name}.json"))
}

/// Exports up to `limit` of the most recent sessions into `out_dir`.
///
/// A session whose file already holds the same number of messages is
/// left untouched. `on_progress` is called with `(done, total)` after
/// each session.
pub async fn export_sessions(
    reader: &dyn ChatLogReader,
    out_dir: &Path,
    limit: usize,
    mut on_progress: impl FnMut(usize, usize),
) -> Result<ExportSummary, ExportError> {
    let sessions = reader
        .recent_sessions(limit)
        .await
        .map_err(ExportError::Fetch)?;
    fs::create_dir_all(out_dir).await?;

    let mut summary = ExportSummary::default();
    let total = sessions.len();
    for (idx, session) in sessions.into_iter().enumerate() {
        let fetched = reader.session_messages(&session.session_id).await;
        let messages = match fetched {
            Ok(messages) => messages,
            Err(err) => {
                warn!("failed to fetch session {}: {err}", session.session_id);
                summary.failed += 1;
                on_progress(idx + 1, total);
                continue;
            }
        };

        let path = session_file(out_dir, &session.session_id);
        summary.messages += messages.len();
        if existing_message_count(&path).await == Some(messages.len()) {
            trace!("{} is up to date", path.display());
            summary.skipped += 1;
        } else {
            let export = SessionExport {
                session_id: session.session_id,
                last_active: format_timestamp(session.last_active_ms),
                messages,
            };
            let json = serde_json::to_vec_pretty(&export).map_err(|err| {
                io::Error::new(io::ErrorKind::InvalidData, err)
            })?;
            fs::write(&path, json).await?;
            summary.written += 1;
        }
        on_progress(idx + 1, total);
    }
    Ok(summary)
}

async fn existing_message_count(path: &Path) -> Option<usize> {
    let bytes = fs::read(path).await.ok()?;
    let export: SessionExport = serde_json::from_slice(&bytes).ok()?;
    Some(export.messages.len())
}

fn format_timestamp(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(at: &str) -> i64 {
    DateTime::parse_from_rfc3339(at)
        .map(|at| at.timestamp_millis())
        .unwrap_or_default()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedSession {
    session_id: String,
    last_active: String,
}

#[derive(Deserialize)]
struct SessionListResponse {
    #[serde(default)]
    sessions: Vec<ListedSession>,
}

#[derive(Deserialize)]
struct SessionMessagesResponse {
    #[serde(default)]
    messages: Vec<ChatLogEntry>,
}

/// Reads the chat logs through a running relay's `/logs` endpoint.
#[derive(Clone)]
pub struct HttpLogReader {
    client: Client,
    logs_url: Url,
    secret: String,
}

impl HttpLogReader {
    /// Creates a reader for the relay at `api_base`.
    pub fn new(api_base: &str, secret: &str) -> Result<Self, ServiceError> {
        Self::with_client(default_client(), api_base, secret)
    }

    /// Creates a reader sharing an existing HTTP client.
    pub fn with_client(
        client: Client,
        api_base: &str,
        secret: &str,
    ) -> Result<Self, ServiceError> {
        let logs_url = format!("{}/logs", api_base.trim_end_matches('/'))
            .parse::<Url>()
            .map_err(|err| {
                ServiceError::new(ErrorKind::Configuration, format!("{err}"))
            })?;
        Ok(Self {
            client,
            logs_url,
            secret: secret.to_owned(),
        })
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        query: (&str, &str),
    ) -> Result<T, ServiceError> {
        let mut url = self.logs_url.clone();
        url.query_pairs_mut().append_pair(query.0, query.1);

        let resp = self
            .client
            .get(url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.secret))
            .send()
            .await
            .map_err(|err| {
                let kind = if err.is_timeout() {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::Transport
                };
                ServiceError::new(kind, format!("{err}"))
            })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::rejected(status.as_u16(), body));
        }
        resp.json().await.map_err(|err| {
            ServiceError::new(ErrorKind::InvalidPayload, format!("{err}"))
        })
    }
}

#[async_trait]
impl ChatLogReader for HttpLogReader {
    async fn recent_sessions(
        &self,
        limit: usize,
    ) -> Result<Vec<SessionSummary>, ServiceError> {
        let limit = limit.to_string();
        let resp: SessionListResponse = self.get(("limit", &limit)).await?;
        Ok(resp
            .sessions
            .into_iter()
            .map(|session| SessionSummary {
                last_active_ms: parse_timestamp(&session.last_active),
                session_id: session.session_id,
            })
            .collect())
    }

    async fn session_messages(
        &self,
        session_id: &str,
    ) -> Result<Vec<ChatLogEntry>, ServiceError> {
        let resp: SessionMessagesResponse =
            self.get(("sessionId", session_id)).await?;
        Ok(resp.messages)
    }
}
