use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use persona_relay_model::{CompletionResponse, ErrorKind, StreamChunk};
use pin_project_lite::pin_project;

use crate::Error;
use crate::io::{Chunks, SseLine, SseLines};
use crate::proto::ChatCompletionChunk;

struct ReadState {
    chunks: Chunks,
    lines: SseLines,
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextChunk = Result<(Option<StreamChunk>, ReadState), Error>;

pin_project! {
    /// A streamed chat completion.
    ///
    /// Every chunk read from the connection is handed out unmodified,
    /// together with the reply text decoded from the events it completes.
    pub struct OpenAIResponse {
        next_chunk_fut: Option<PinnedFuture<NextChunk>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub(crate) fn from_chunks(chunks: Chunks) -> Self {
        let state = ReadState {
            chunks,
            lines: SseLines::new(),
        };
        let next_chunk_fut = async move { next_chunk(state).await };
        Self {
            next_chunk_fut: Some(Box::pin(next_chunk_fut)),
        }
    }
}

impl CompletionResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_chunk(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<StreamChunk>, Self::Error>> {
        let this = self.project();
        let Some(next_chunk_fut) = this.next_chunk_fut else {
            return Poll::Ready(Ok(None));
        };
        let (chunk, state) = match ready!(next_chunk_fut.as_mut().poll(cx)) {
            Ok((Some(chunk), state)) => (chunk, state),
            Ok((None, _)) => {
                *this.next_chunk_fut = None;
                return Poll::Ready(Ok(None));
            }
            Err(err) => {
                *this.next_chunk_fut = None;
                return Poll::Ready(Err(err));
            }
        };

        // The stream may still have more data to pull, create a new future for
        // the next chunk.
        let next_chunk_fut = async move { next_chunk(state).await };
        *this.next_chunk_fut = Some(Box::pin(next_chunk_fut));

        Poll::Ready(Ok(Some(chunk)))
    }
}

async fn next_chunk(mut state: ReadState) -> NextChunk {
    let raw = match state.chunks.next_chunk().await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            // The upstream may end without a final line feed.
            let content = extract_content(state.lines.finish());
            if content.is_empty() {
                return Ok((None, state));
            }
            let chunk = StreamChunk {
                raw: Bytes::new(),
                content,
            };
            return Ok((Some(chunk), state));
        }
        Err(err) => {
            return Err(Error::new(
                format!("upstream stream interrupted: {err}"),
                ErrorKind::Transport,
            ));
        }
    };
    trace!("got {} bytes from upstream", raw.len());

    let content = extract_content(state.lines.push(&raw));
    Ok((Some(StreamChunk { raw, content }), state))
}

fn extract_content(lines: impl IntoIterator<Item = SseLine>) -> String {
    let mut content = String::new();
    for line in lines {
        let SseLine::Data(data) = line else {
            // The terminal sentinel carries no content.
            continue;
        };
        match serde_json::from_str::<ChatCompletionChunk>(&data) {
            Ok(chunk) => {
                if let Some(delta) = chunk.delta_content() {
                    content.push_str(delta);
                }
            }
            Err(err) => {
                debug!("skipping undecodable sse payload: {err}");
            }
        }
    }
    content
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use super::*;

    async fn collect(
        chunks: Chunks,
    ) -> (Vec<u8>, String, Result<(), crate::Error>) {
        let mut resp = pin!(OpenAIResponse::from_chunks(chunks));
        let mut raw = Vec::new();
        let mut reply = String::new();
        loop {
            match poll_fn(|cx| resp.as_mut().poll_next_chunk(cx)).await {
                Ok(Some(chunk)) => {
                    raw.extend_from_slice(&chunk.raw);
                    reply.push_str(&chunk.content);
                }
                Ok(None) => return (raw, reply, Ok(())),
                Err(err) => return (raw, reply, Err(err)),
            }
        }
    }

    #[tokio::test]
    async fn test_fixture_stream() {
        let fixture = include_bytes!("../fixtures/deepseek_stream.txt");
        let chunks = Chunks::from_vec_deque(
            vec![Bytes::from_static(fixture)].into(),
        );
        let (raw, reply, result) = collect(chunks).await;
        assert!(result.is_ok());
        assert_eq!(raw, fixture);
        assert_eq!(reply, "Mostly harmless.");
    }

    #[tokio::test]
    async fn test_split_event_is_decoded_once() {
        let chunks = Chunks::from_vec_deque(
            vec![
                Bytes::from_static(
                    b"data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"con",
                ),
                Bytes::from_static(b"tent\":\"llo\"}}]}\n\ndata: [DONE]\n\n"),
            ]
            .into(),
        );
        let (_, reply, result) = collect(chunks).await;
        assert!(result.is_ok());
        assert_eq!(reply, "Hello");
    }

    #[tokio::test]
    async fn test_invalid_payload_is_skipped() {
        let chunks = Chunks::from_vec_deque(
            vec![
                Bytes::from_static(b"data: {not json}\n\n"),
                Bytes::from_static(
                    b"data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
                ),
            ]
            .into(),
        );
        let (raw, reply, result) = collect(chunks).await;
        assert!(result.is_ok());
        assert!(raw.starts_with(b"data: {not json}"));
        assert_eq!(reply, "ok");
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_flushed() {
        let chunks = Chunks::from_vec_deque(
            vec![Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}",
            )]
            .into(),
        );
        let (_, reply, result) = collect(chunks).await;
        assert!(result.is_ok());
        assert_eq!(reply, "end");
    }

    #[tokio::test]
    async fn test_interrupted_stream() {
        let chunks = Chunks::interrupted_after(
            vec![Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n",
            )]
            .into(),
        );
        let (raw, reply, result) = collect(chunks).await;
        assert!(!raw.is_empty());
        assert_eq!(reply, "par");
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transport);
    }
}
