use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use persona_relay_model::{
    ChatLogEntry, ChatLogReader, ChatLogStore, ContactMessage, ErrorKind,
    Exchange, IndexItem, Mailer, RetrievedItem, Retriever, ServiceError,
    SessionSummary, VectorIndex,
};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

#[derive(Default)]
struct LogState {
    sessions: HashMap<String, Vec<ChatLogEntry>>,
    last_active: HashMap<String, i64>,
    exchanges: Vec<(String, Exchange)>,
}

/// An in-memory chat log.
#[derive(Clone)]
pub struct MemoryLogStore {
    state: Arc<Mutex<LogState>>,
    attempts: Arc<AtomicUsize>,
    failing: bool,
    attempts_tx: Arc<watch::Sender<usize>>,
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        let (attempts_tx, _) = watch::channel(0);
        Self {
            state: Default::default(),
            attempts: Default::default(),
            failing: false,
            attempts_tx: Arc::new(attempts_tx),
        }
    }
}

impl MemoryLogStore {
    /// Creates a store whose writes always fail.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    /// Returns every logged exchange with its session id, in order.
    pub fn exchanges(&self) -> Vec<(String, Exchange)> {
        self.state
            .lock()
            .map(|state| state.exchanges.clone())
            .unwrap_or_default()
    }

    /// Returns how many writes were attempted, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` writes were attempted.
    pub async fn wait_for_attempts(
        &self,
        count: usize,
        limit: Duration,
    ) -> bool {
        let mut rx = self.attempts_tx.subscribe();
        timeout(limit, rx.wait_for(|attempts| *attempts >= count))
            .await
            .is_ok_and(|res| res.is_ok())
    }

    /// Inserts a session directly, bypassing the write path.
    pub fn insert_session(
        &self,
        session_id: &str,
        messages: Vec<ChatLogEntry>,
        last_active_ms: i64,
    ) {
        if let Ok(mut state) = self.state.lock() {
            state.sessions.insert(session_id.to_owned(), messages);
            state
                .last_active
                .insert(session_id.to_owned(), last_active_ms);
        }
    }
}

#[async_trait]
impl ChatLogStore for MemoryLogStore {
    async fn append_exchange(
        &self,
        session_id: &str,
        exchange: &Exchange,
    ) -> Result<(), ServiceError> {
        let result = if self.failing {
            Err(ServiceError::new(ErrorKind::Transport, "store unreachable"))
        } else {
            let mut state = self.state.lock().map_err(|_| {
                ServiceError::new(ErrorKind::Other, "poisoned")
            })?;
            state
                .sessions
                .entry(session_id.to_owned())
                .or_default()
                .extend(exchange.entries());
            state
                .last_active
                .insert(session_id.to_owned(), exchange.ts);
            state
                .exchanges
                .push((session_id.to_owned(), exchange.clone()));
            Ok(())
        };
        let attempts = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.attempts_tx.send_replace(attempts);
        result
    }
}

#[async_trait]
impl ChatLogReader for MemoryLogStore {
    async fn recent_sessions(
        &self,
        limit: usize,
    ) -> Result<Vec<SessionSummary>, ServiceError> {
        let state = self
            .state
            .lock()
            .map_err(|_| ServiceError::new(ErrorKind::Other, "poisoned"))?;
        let mut sessions: Vec<_> = state
            .last_active
            .iter()
            .map(|(session_id, last_active_ms)| SessionSummary {
                session_id: session_id.clone(),
                last_active_ms: *last_active_ms,
            })
            .collect();
        sessions.sort_by(|a, b| b.last_active_ms.cmp(&a.last_active_ms));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn session_messages(
        &self,
        session_id: &str,
    ) -> Result<Vec<ChatLogEntry>, ServiceError> {
        let state = self
            .state
            .lock()
            .map_err(|_| ServiceError::new(ErrorKind::Other, "poisoned"))?;
        Ok(state.sessions.get(session_id).cloned().unwrap_or_default())
    }
}

/// A retriever answering every query with the same items.
#[derive(Clone, Default)]
pub struct StaticRetriever {
    items: Vec<RetrievedItem>,
    error: Option<ErrorKind>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl StaticRetriever {
    /// Creates a retriever returning `items`.
    pub fn with_items(items: impl Into<Vec<RetrievedItem>>) -> Self {
        Self {
            items: items.into(),
            ..Default::default()
        }
    }

    /// Creates a retriever whose queries always fail.
    pub fn failing(kind: ErrorKind) -> Self {
        Self {
            error: Some(kind),
            ..Default::default()
        }
    }

    /// Delays every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns how many queries were issued.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn query(
        &self,
        _text: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedItem>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }
        if let Some(kind) = self.error {
            return Err(ServiceError::new(kind, "vector store failed"));
        }
        Ok(self.items.iter().take(top_k).cloned().collect())
    }
}

/// A mailer that keeps every message it is asked to send.
#[derive(Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<ContactMessage>>>,
    error: Option<ErrorKind>,
}

impl RecordingMailer {
    /// Creates a mailer whose deliveries always fail.
    pub fn failing(kind: ErrorKind) -> Self {
        Self {
            error: Some(kind),
            ..Default::default()
        }
    }

    /// Returns the delivered messages.
    pub fn sent(&self) -> Vec<ContactMessage> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_contact(
        &self,
        message: &ContactMessage,
    ) -> Result<(), ServiceError> {
        if let Some(kind) = self.error {
            return Err(ServiceError::new(kind, "mail provider failed"));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        Ok(())
    }
}

/// An in-memory vector index keeping every upserted batch.
#[derive(Clone, Default)]
pub struct MemoryVectorIndex {
    batches: Arc<Mutex<Vec<Vec<IndexItem>>>>,
    failing_ids: Arc<Mutex<Vec<String>>>,
}

impl MemoryVectorIndex {
    /// Makes every batch containing `id` fail.
    pub fn fail_on(&self, id: &str) {
        if let Ok(mut failing_ids) = self.failing_ids.lock() {
            failing_ids.push(id.to_owned());
        }
    }

    /// Returns the successfully upserted batches.
    pub fn batches(&self) -> Vec<Vec<IndexItem>> {
        self.batches
            .lock()
            .map(|batches| batches.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, items: &[IndexItem]) -> Result<(), ServiceError> {
        let rejected = self
            .failing_ids
            .lock()
            .map(|ids| items.iter().any(|item| ids.contains(&item.id)))
            .unwrap_or(false);
        if rejected {
            return Err(ServiceError::rejected(400, "rejected batch"));
        }
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(items.to_vec());
        }
        Ok(())
    }
}
