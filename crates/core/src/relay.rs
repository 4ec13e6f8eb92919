use std::convert::Infallible;
use std::fmt::{self, Debug};
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use persona_relay_model::{
    CompletionProvider, CompletionRequest, CompletionResponse, ProviderError,
    StreamChunk,
};
use pin_project_lite::pin_project;
use tokio::time::timeout;
use tracing::Instrument;

use crate::error::Error;

/// The event the relay appends after the upstream completes.
pub const TERMINAL_EVENT: &[u8] = b"data: [DONE]\n\n";

type UpstreamItem = Result<StreamChunk, Box<dyn ProviderError>>;
type UpstreamStream = Pin<Box<dyn Stream<Item = UpstreamItem> + Send>>;
type OpenResult = Result<UpstreamStream, Box<dyn ProviderError>>;
type BoxedOpenFuture = Pin<Box<dyn Future<Output = OpenResult> + Send>>;
type HandlerFn =
    Arc<dyn Fn(CompletionRequest) -> BoxedOpenFuture + Send + Sync>;
type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type OnFinish = Box<dyn FnOnce(RelayOutcome) + Send>;

/// Time limits applied to the upstream connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayOptions {
    /// Bounds the wait for the upstream to accept the request.
    pub connect_timeout: Duration,
    /// Bounds the silence between two upstream reads.
    pub read_timeout: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// Why a stream ended before the upstream completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortReason {
    /// The upstream connection failed mid-stream.
    Interrupted,
    /// The upstream stayed silent past the read timeout.
    TimedOut,
    /// The client stopped consuming the stream.
    Cancelled,
}

/// How a relayed stream ended, reported exactly once per stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The upstream finished normally. Holds the accumulated reply.
    Completed(String),
    /// The stream was cut short. Holds whatever reply text arrived.
    Aborted {
        /// The reply text received before the abort.
        partial: String,
        /// What cut the stream short.
        reason: AbortReason,
    },
}

/// A wrapper around a completion provider that forwards its stream
/// verbatim while accumulating the reply text.
///
/// The provider type is erased, so `Relay` can be stored without a
/// generic parameter.
#[derive(Clone)]
pub struct Relay {
    handler_fn: HandlerFn,
    options: RelayOptions,
}

impl Relay {
    /// Creates a relay with default time limits.
    pub fn new<P: CompletionProvider + 'static>(provider: P) -> Self {
        let handler_fn: HandlerFn = Arc::new(move |req| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("opening upstream with {} turns", req.turns.len());
                    match fut.await {
                        Ok(resp) => Ok(into_upstream_stream(resp)),
                        Err(err) => {
                            Err(Box::new(err) as Box<dyn ProviderError>)
                        }
                    }
                }
                .instrument(trace_span!("relay open")),
            )
        });
        Self {
            handler_fn,
            options: Default::default(),
        }
    }

    /// Replaces the time limits.
    #[inline]
    pub fn with_options(mut self, options: RelayOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the time limits in use.
    #[inline]
    pub fn options(&self) -> RelayOptions {
        self.options
    }

    /// Opens the upstream stream.
    ///
    /// Fails only before the first byte: when the upstream rejects the
    /// request or does not answer within the connect timeout. After
    /// that, `on_finish` is called exactly once with the outcome.
    ///
    /// # Cancel safety
    ///
    /// Dropping the returned stream stops reading from the upstream and
    /// reports [`AbortReason::Cancelled`].
    pub async fn open(
        &self,
        req: CompletionRequest,
        on_finish: impl FnOnce(RelayOutcome) + Send + 'static,
    ) -> Result<RelayStream, Error> {
        let limit = self.options.connect_timeout;
        let upstream = match timeout(limit, (self.handler_fn)(req)).await {
            Ok(Ok(upstream)) => upstream,
            Ok(Err(err)) => {
                error!("upstream refused the request: {err}");
                return Err(Error::upstream(&*err));
            }
            Err(_) => {
                error!("upstream did not answer within {limit:?}");
                return Err(Error::upstream_timeout(limit));
            }
        };

        let state = RelayState {
            upstream,
            transcript: String::new(),
            read_timeout: self.options.read_timeout,
            forwarded: 0,
            on_finish: Some(Box::new(on_finish)),
        };
        Ok(RelayStream {
            next_fut: Some(Box::pin(next_bytes(state))),
        })
    }
}

fn into_upstream_stream<R: CompletionResponse>(resp: R) -> UpstreamStream {
    let mut resp = Box::pin(resp);
    Box::pin(stream::poll_fn(move |cx| {
        resp.as_mut().poll_next_chunk(cx).map(|res| match res {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => None,
            Err(err) => Some(Err(Box::new(err) as Box<dyn ProviderError>)),
        })
    }))
}

struct RelayState {
    upstream: UpstreamStream,
    transcript: String,
    read_timeout: Duration,
    forwarded: usize,
    on_finish: Option<OnFinish>,
}

impl RelayState {
    fn finish(&mut self, abort_reason: Option<AbortReason>) {
        let transcript = mem::take(&mut self.transcript);
        let outcome = match abort_reason {
            None => RelayOutcome::Completed(transcript),
            Some(reason) => RelayOutcome::Aborted {
                partial: transcript,
                reason,
            },
        };
        if let Some(on_finish) = self.on_finish.take() {
            on_finish(outcome);
        }
    }
}

impl Drop for RelayState {
    fn drop(&mut self) {
        if self.on_finish.is_some() {
            debug!("relay dropped after {} bytes", self.forwarded);
            self.finish(Some(AbortReason::Cancelled));
        }
    }
}

type NextBytes = (Option<Bytes>, Option<RelayState>);

async fn next_bytes(mut state: RelayState) -> NextBytes {
    loop {
        let read = timeout(state.read_timeout, state.upstream.next()).await;
        match read {
            Ok(Some(Ok(chunk))) => {
                state.transcript.push_str(&chunk.content);
                // A flushed tail carries content but nothing to forward.
                if chunk.raw.is_empty() {
                    continue;
                }
                state.forwarded += chunk.raw.len();
                return (Some(chunk.raw), Some(state));
            }
            Ok(None) => {
                debug!(
                    "upstream completed, relayed {} bytes",
                    state.forwarded
                );
                state.finish(None);
                return (Some(Bytes::from_static(TERMINAL_EVENT)), None);
            }
            Ok(Some(Err(err))) => {
                warn!("upstream stream interrupted: {err}");
                state.finish(Some(AbortReason::Interrupted));
                return (None, None);
            }
            Err(_) => {
                warn!("upstream silent for {:?}, closing", state.read_timeout);
                state.finish(Some(AbortReason::TimedOut));
                return (None, None);
            }
        }
    }
}

pin_project! {
    /// The client-facing byte stream of one relayed response.
    ///
    /// Yields upstream bytes in receipt order, then [`TERMINAL_EVENT`]
    /// if the upstream completed. An aborted stream just ends.
    pub struct RelayStream {
        next_fut: Option<PinnedFuture<NextBytes>>,
    }
}

impl Stream for RelayStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let Some(next_fut) = this.next_fut else {
            return Poll::Ready(None);
        };

        let (bytes, state) = ready!(next_fut.as_mut().poll(cx));
        *this.next_fut = state.map(|state| {
            Box::pin(next_bytes(state)) as PinnedFuture<NextBytes>
        });
        Poll::Ready(bytes.map(Ok))
    }
}

impl Debug for RelayStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayStream")
            .field("finished", &self.next_fut.is_none())
            .finish()
    }
}
