use std::mem;

/// Partial lines longer than this are dropped.
const MAX_PENDING_LINE: usize = 1024 * 1024;

/// A meaningful line of a server-sent event stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SseLine {
    /// The payload of a `data:` field, trimmed.
    Data(String),
    /// The `data: [DONE]` terminal sentinel.
    Done,
}

/// An incremental, line-oriented decoder for server-sent events.
///
/// Bytes after the last line feed of a chunk are kept until the chunk
/// that completes the line arrives, so an event split across network
/// reads (including inside a multi-byte UTF-8 sequence) is decoded
/// exactly once. Lines other than `data:` fields are ignored.
#[derive(Debug, Default)]
pub struct SseLines {
    pending: Vec<u8>,
    // Set after an oversized line was dropped, until its line feed.
    discarding: bool,
}

impl SseLines {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns the lines it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseLine> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(eol_idx) = rest.iter().position(|b| *b == b'\n') {
            let line = &rest[..eol_idx];
            rest = &rest[eol_idx + 1..];
            if mem::take(&mut self.discarding) {
                continue;
            }
            if self.pending.is_empty() {
                lines.extend(parse_line(line));
            } else {
                self.pending.extend_from_slice(line);
                let pending = mem::take(&mut self.pending);
                lines.extend(parse_line(&pending));
            }
        }

        if self.discarding {
            return lines;
        }
        if self.pending.len() + rest.len() > MAX_PENDING_LINE {
            warn!(
                "dropping an unterminated sse line longer than {} bytes",
                MAX_PENDING_LINE
            );
            self.pending.clear();
            self.discarding = true;
        } else {
            self.pending.extend_from_slice(rest);
        }
        lines
    }

    /// Flushes the trailing line that was never terminated.
    pub fn finish(&mut self) -> Option<SseLine> {
        if mem::take(&mut self.discarding) || self.pending.is_empty() {
            return None;
        }
        let pending = mem::take(&mut self.pending);
        parse_line(&pending)
    }

    #[cfg(test)]
    fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

fn parse_line(line: &[u8]) -> Option<SseLine> {
    let Ok(line) = str::from_utf8(line) else {
        trace!("skipping a non utf-8 sse line");
        return None;
    };
    // For `end-of-line`, a trailing carriage return is removed by `trim`.
    let data = line.trim().strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(SseLine::Done);
    }
    Some(SseLine::Data(data.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> SseLine {
        SseLine::Data(s.to_owned())
    }

    #[test]
    fn test_normal_events() {
        let mut sse = SseLines::new();
        assert_eq!(
            sse.push(b"data: hello\n\ndata: bye\n\ndata: [DONE]\n\n"),
            vec![data("hello"), data("bye"), SseLine::Done]
        );
        assert!(!sse.has_pending());
        assert_eq!(sse.finish(), None);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut sse = SseLines::new();
        assert_eq!(sse.push(b"data: {\"choices\":[{\"del"), vec![]);
        assert!(sse.has_pending());
        assert_eq!(
            sse.push(b"ta\":{}}]}\n\ndata:"),
            vec![data("{\"choices\":[{\"delta\":{}}]}")]
        );
        assert_eq!(sse.push(b" bye\n"), vec![data("bye")]);
        assert_eq!(sse.push(b"\n"), vec![]);
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let bytes = "data: 你好\n".as_bytes();
        // Split inside the first CJK character.
        let (head, tail) = bytes.split_at(8);
        let mut sse = SseLines::new();
        assert_eq!(sse.push(head), vec![]);
        assert_eq!(sse.push(tail), vec![data("你好")]);
    }

    #[test]
    fn test_ignored_lines() {
        let mut sse = SseLines::new();
        assert_eq!(
            sse.push(b": keep-alive\nevent: ping\nid: 3\ndata:x\r\n\r\n"),
            vec![data("x")]
        );
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut sse = SseLines::new();
        assert_eq!(sse.push(b"data: tail"), vec![]);
        assert_eq!(sse.finish(), Some(data("tail")));
        assert_eq!(sse.finish(), None);

        assert_eq!(sse.push(b"xxxxxx"), vec![]);
        assert_eq!(sse.finish(), None);
    }

    #[test]
    fn test_oversized_line_is_dropped() {
        let mut sse = SseLines::new();
        let junk = vec![b'a'; MAX_PENDING_LINE + 1];
        assert_eq!(sse.push(&junk), vec![]);
        assert!(!sse.has_pending());
        assert_eq!(sse.push(b"data: ok\n"), vec![]);
        assert_eq!(sse.push(b"data: ok\n"), vec![data("ok")]);
    }

    #[test]
    fn test_oversized_line_tail_is_discarded() {
        let mut sse = SseLines::new();
        let mut junk = b"data: ".to_vec();
        junk.resize(MAX_PENDING_LINE + 1, b'a');
        assert_eq!(sse.push(&junk), vec![]);
        assert_eq!(sse.push(b"aaaa"), vec![]);
        assert_eq!(sse.push(b"aa\ndata: next\n"), vec![data("next")]);

        assert_eq!(sse.push(&junk), vec![]);
        assert_eq!(sse.push(b"data: tail"), vec![]);
        assert_eq!(sse.finish(), None);
        assert_eq!(sse.push(b"data: fresh\n"), vec![data("fresh")]);
    }
}
