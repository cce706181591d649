//! Server-sent-events transport for the per-job event stream.
//!
//! The controller pushes `text/event-stream` frames: optional `retry:`
//! hints, comment lines, and `data: {...}` payloads terminated by a
//! blank line. [`SseDecoder`] does the incremental framing;
//! [`SseConnection`] couples it to a live HTTP response.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};

use crate::identity::{CLIENT_ID_COOKIE, CLIENT_ID_HEADER};

/// One decoded event-stream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, if the server set one.
    pub event: Option<String>,
    /// Joined `data:` lines (multi-line data joins with `\n`).
    pub data: String,
}

/// Errors from the stream transport.
#[derive(Debug, thiserror::Error)]
pub enum SseError {
    /// Could not establish the HTTP connection.
    #[error("Failed to connect to event stream: {0}")]
    Connect(reqwest::Error),

    /// The server refused the stream with a non-2xx status.
    #[error("Event stream returned status {status}: {body}")]
    Status {
        status: u16,
        body: String,
    },

    /// The established stream died mid-read.
    #[error("Event stream read error: {0}")]
    Read(reqwest::Error),
}

// ---------------------------------------------------------------------------
// SseDecoder
// ---------------------------------------------------------------------------

/// Incremental `text/event-stream` decoder.
///
/// Feed raw bytes as they arrive; complete frames come back out. Handles
/// chunk boundaries anywhere, including inside a UTF-8 sequence, and
/// both `\n` and `\r\n` line endings.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
    event_name: Option<String>,
    retry_hint: Option<Duration>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk of bytes, returning every frame it completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop(); // the \n
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Reconnection delay suggested by the server, if any was sent.
    pub fn retry_hint(&self) -> Option<Duration> {
        self.retry_hint
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        // Blank line terminates the pending frame.
        if line.is_empty() {
            let frame = if self.data_lines.is_empty() {
                self.event_name = None;
                None
            } else {
                Some(SseFrame {
                    event: self.event_name.take(),
                    data: self.data_lines.join("\n"),
                })
            };
            self.data_lines.clear();
            return frame;
        }

        // Comment line.
        if let Some(rest) = line.strip_prefix(':') {
            tracing::trace!(comment = rest.trim(), "SSE comment");
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data_lines.push(value.to_string()),
            "event" => self.event_name = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry_hint = Some(Duration::from_millis(ms));
                }
            }
            // `id` and unknown fields are ignored.
            _ => {}
        }
        None
    }
}

// ---------------------------------------------------------------------------
// SseConnection
// ---------------------------------------------------------------------------

/// A live event stream for one job.
pub struct SseConnection {
    decoder: SseDecoder,
    pending: VecDeque<SseFrame>,
    chunks: Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>,
}

impl SseConnection {
    /// Open the stream. The identity rides along as header and cookie,
    /// like every other controller request.
    pub async fn open(
        client: &reqwest::Client,
        url: &str,
        client_id: &str,
    ) -> Result<Self, SseError> {
        let response = client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(CLIENT_ID_HEADER, client_id)
            .header(
                reqwest::header::COOKIE,
                format!("{CLIENT_ID_COOKIE}={client_id}"),
            )
            .send()
            .await
            .map_err(SseError::Connect)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(SseError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chunks = response.bytes_stream().map(|result| result.map(|b| b.to_vec()));
        Ok(Self {
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            chunks: Box::pin(chunks),
        })
    }

    /// Next complete frame.
    ///
    /// `None` means the server closed the stream (it does so after a
    /// terminal event). An `Err` item means the transport died; the
    /// connection is unusable afterwards.
    pub async fn next_frame(&mut self) -> Option<Result<SseFrame, SseError>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(Ok(frame));
            }
            match self.chunks.next().await {
                Some(Ok(chunk)) => self.pending.extend(self.decoder.feed(&chunk)),
                Some(Err(e)) => return Some(Err(SseError::Read(e))),
                None => return None,
            }
        }
    }

    /// Reconnection delay suggested by the server, if seen yet.
    pub fn retry_hint(&self) -> Option<Duration> {
        self.decoder.retry_hint()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_str(decoder: &mut SseDecoder, s: &str) -> Vec<SseFrame> {
        decoder.feed(s.as_bytes())
    }

    #[test]
    fn single_frame() {
        let mut decoder = SseDecoder::new();
        let frames = feed_str(&mut decoder, "data: {\"type\":\"state\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"type\":\"state\"}");
        assert!(frames[0].event.is_none());
    }

    #[test]
    fn frame_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(feed_str(&mut decoder, "data: {\"type\":").is_empty());
        assert!(feed_str(&mut decoder, "\"completed\"}\n").is_empty());
        let frames = feed_str(&mut decoder, "\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"type\":\"completed\"}");
    }

    #[test]
    fn chunk_boundary_inside_utf8_sequence() {
        let mut decoder = SseDecoder::new();
        let payload = "data: {\"message\":\"réussi\"}\n\n".as_bytes();
        // Split inside the two-byte 'é'.
        let split = payload.iter().position(|&b| b == 0xc3).unwrap() + 1;
        assert!(decoder.feed(&payload[..split]).is_empty());
        let frames = decoder.feed(&payload[split..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"message\":\"réussi\"}");
    }

    #[test]
    fn crlf_line_endings() {
        let mut decoder = SseDecoder::new();
        let frames = feed_str(&mut decoder, "data: hello\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "hello");
    }

    #[test]
    fn multiple_frames_in_one_chunk() {
        let mut decoder = SseDecoder::new();
        let frames = feed_str(&mut decoder, "data: one\n\ndata: two\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "one");
        assert_eq!(frames[1].data, "two");
    }

    #[test]
    fn multi_line_data_joins_with_newline() {
        let mut decoder = SseDecoder::new();
        let frames = feed_str(&mut decoder, "data: line1\ndata: line2\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "line1\nline2");
    }

    #[test]
    fn comments_and_blank_lines_produce_nothing() {
        let mut decoder = SseDecoder::new();
        assert!(feed_str(&mut decoder, ": keep-alive\n\n\n").is_empty());
    }

    #[test]
    fn retry_hint_is_captured_not_emitted() {
        let mut decoder = SseDecoder::new();
        let frames = feed_str(&mut decoder, "retry: 1000\n\ndata: x\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x");
        assert_eq!(decoder.retry_hint(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn event_name_attaches_to_its_frame_only() {
        let mut decoder = SseDecoder::new();
        let frames = feed_str(&mut decoder, "event: update\ndata: a\n\ndata: b\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event.as_deref(), Some("update"));
        assert!(frames[1].event.is_none());
    }

    #[test]
    fn data_without_space_after_colon() {
        let mut decoder = SseDecoder::new();
        let frames = feed_str(&mut decoder, "data:tight\n\n");
        assert_eq!(frames[0].data, "tight");
    }

    #[test]
    fn unknown_field_is_ignored() {
        let mut decoder = SseDecoder::new();
        assert!(feed_str(&mut decoder, "ping\nid: 7\n").is_empty());
        let frames = feed_str(&mut decoder, "data: real\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "real");
    }
}
