use std::pin::Pin;
use std::task::{self, Poll};

use bytes::Bytes;

use crate::provider::ProviderError;

/// A piece of the upstream stream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct StreamChunk {
    /// The bytes exactly as received from the provider. They must be
    /// forwarded to the caller unmodified.
    pub raw: Bytes,
    /// The reply text decoded from the events completed by this chunk.
    ///
    /// An event split across two reads contributes its text to the
    /// chunk that completes it, so this can be empty even if `raw` is
    /// not, and non-empty even if `raw` is empty (when the trailing
    /// partial event is flushed at end of stream).
    pub content: String,
}

/// A streamed response from the completion provider.
pub trait CompletionResponse: Sized + Send + 'static {
    /// The error type that may be returned by the provider.
    type Error: ProviderError;

    /// Attempts to pull out the next chunk from the response.
    ///
    /// # Return value
    ///
    /// There are several possible return values, each indicating a
    /// distinct response state:
    ///
    /// - `Poll::Pending` means that this response is still waiting for
    ///   the next chunk. Implementations will ensure that the current
    ///   task will be notified when the next chunk may be ready.
    /// - `Poll::Ready(Ok(Some(chunk)))` means the response has a chunk
    ///   to deliver, and may produce further chunks on subsequent
    ///   `poll_next_chunk` calls.
    /// - `Poll::Ready(Ok(None))` means the upstream stream has ended.
    /// - `Poll::Ready(Err(error))` means the transport failed while
    ///   reading the response.
    ///
    /// Calling this method after completion should always return `None`.
    fn poll_next_chunk(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<StreamChunk>, Self::Error>>;
}
