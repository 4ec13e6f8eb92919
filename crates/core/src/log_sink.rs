use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use persona_relay_model::{ChatLogStore, Exchange, ServiceError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// A log write that did not make it to the store.
#[derive(Debug)]
pub struct LogFailure {
    /// The session the exchange belonged to.
    pub session_id: String,
    /// Why the write failed.
    pub error: ServiceError,
}

/// Persists completed exchanges in the background.
///
/// Writes never block or alter the response they belong to. Failures
/// go to the failure reporter when one is attached, and are logged
/// otherwise.
#[derive(Clone, Default)]
pub struct LogSink {
    store: Option<Arc<dyn ChatLogStore>>,
    failures: Option<mpsc::UnboundedSender<LogFailure>>,
}

impl LogSink {
    /// Creates a sink writing to `store`.
    #[inline]
    pub fn new(store: Arc<dyn ChatLogStore>) -> Self {
        Self {
            store: Some(store),
            failures: None,
        }
    }

    /// Creates a sink that drops everything.
    #[inline]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Routes failed writes to `failures`.
    #[inline]
    pub fn with_failure_reporter(
        mut self,
        failures: mpsc::UnboundedSender<LogFailure>,
    ) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Records one exchange.
    ///
    /// Does nothing when `session_id` is absent or empty, or when no
    /// store is configured. Otherwise the write runs on a spawned task
    /// whose handle is returned. Must be called within a Tokio runtime.
    pub fn dispatch(
        &self,
        session_id: Option<&str>,
        user: String,
        assistant: String,
    ) -> Option<JoinHandle<()>> {
        let session_id = session_id.filter(|id| !id.is_empty())?;
        let Some(store) = self.store.clone() else {
            trace!("chat log store not configured, exchange not logged");
            return None;
        };

        let session_id = session_id.to_owned();
        let failures = self.failures.clone();
        let exchange = Exchange {
            user,
            assistant,
            ts: now_millis(),
        };
        let span = debug_span!("log exchange", session_id = %session_id);
        let fut = async move {
            match store.append_exchange(&session_id, &exchange).await {
                Ok(()) => debug!("logged an exchange"),
                Err(error) => match failures {
                    Some(failures) => {
                        failures.send(LogFailure { session_id, error }).ok();
                    }
                    None => {
                        error!("failed to log an exchange: {error}");
                    }
                },
            }
        };
        Some(tokio::spawn(fut.instrument(span)))
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}
