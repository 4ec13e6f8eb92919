//! Local fakes of the relay's collaborators for testing purpose.

mod preset;
mod stores;

use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use bytes::Bytes;
use persona_relay_model::{
    CompletionProvider, CompletionRequest, CompletionResponse, ErrorKind,
    ProviderError, StreamChunk,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;
pub use stores::*;

#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
    detail: Option<String>,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl StdError for Error {}

impl ProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

pub struct TestCompletionResponse {
    preset: PresetResponse,
    chunk_idx: usize,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl CompletionResponse for TestCompletionResponse {
    type Error = crate::Error;

    fn poll_next_chunk(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<StreamChunk>, Self::Error>> {
        // SAFETY: This type does not require to be pinned.
        let this = unsafe { self.get_unchecked_mut() };

        if let Some(sleep) = &mut this.sleep {
            let sleep = sleep.as_mut();
            ready!(sleep.poll(cx));
            this.sleep = None;

            if let Some(preset) = this.preset.chunks.get(this.chunk_idx) {
                this.chunk_idx += 1;
                return Poll::Ready(Ok(Some(StreamChunk {
                    raw: Bytes::from(preset.raw.clone()),
                    content: preset.content.clone(),
                })));
            }

            return match this.preset.ending {
                PresetEnding::Complete => Poll::Ready(Ok(None)),
                PresetEnding::Interrupt => Poll::Ready(Err(Error {
                    message: "connection reset by peer".to_owned(),
                    kind: ErrorKind::Transport,
                    detail: None,
                })),
                // Never woken again.
                PresetEnding::Stall => Poll::Pending,
            };
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_chunk(cx)
    }
}

/// A local fake completion provider for testing purpose.
///
/// Every request is answered with the same preset response. Requests
/// are recorded so tests can inspect the assembled turns.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone)]
pub struct TestCompletionProvider {
    preset: PresetResponse,
    delay: Duration,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl TestCompletionProvider {
    #[inline]
    pub fn new(preset: PresetResponse) -> Self {
        Self {
            preset,
            delay: Duration::from_millis(1),
            requests: Default::default(),
        }
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = duration;
    }

    /// Returns the requests received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl CompletionProvider for TestCompletionProvider {
    type Error = crate::Error;
    type Response = TestCompletionResponse;

    fn send_request(
        &self,
        req: &CompletionRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(req.clone());
        }

        if let Some((status, body)) = &self.preset.rejection {
            return ready(Err(Error {
                message: format!("status {status}"),
                kind: ErrorKind::Rejected,
                detail: Some(body.clone()),
            }));
        }

        let resp = TestCompletionResponse {
            preset: self.preset.clone(),
            chunk_idx: 0,
            delay: self.delay,
            sleep: None,
        };
        ready(Ok(resp))
    }
}
