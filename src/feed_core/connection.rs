//! One streaming connection to the transaction feed.
//!
//! The feed is a server-sent-events endpoint: the response body never ends
//! while the subscription is live and each event's `data:` lines carry one
//! JSON feed message. A [`FeedStream`] ends when the remote closes the
//! body and yields a [`StreamError`] on a transport fault; it is not
//! restartable, reconnecting is the supervisor's job.

use {
    super::{
        decoder::{decode_message, FeedEvent},
        query::FeedQuery,
    },
    async_trait::async_trait,
    futures::{stream, Stream, StreamExt},
    std::{collections::VecDeque, pin::Pin},
    thiserror::Error,
};

pub const DEFAULT_FEED_URL: &str = "https://bitsocket.fountainhead.cash/s/";

/// Longest SSE line accepted before the stream is treated as broken.
pub const MAX_SSE_LINE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("connection failed: {0}")]
    Transport(String),
    #[error("feed rejected subscription with status {0}")]
    Status(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("feed closed the stream")]
    Closed,
    #[error("stream transport error: {0}")]
    Transport(String),
    #[error("feed sent a line longer than {0} bytes")]
    LineTooLong(usize),
}

pub type FeedStream = Pin<Box<dyn Stream<Item = Result<FeedEvent, StreamError>> + Send>>;

/// Opens feed connections for a given query.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn open(&self, query: &FeedQuery) -> Result<FeedStream, ConnectionError>;
}

/// Incremental server-sent-events parser. Feed it raw body chunks, get back
/// the `data` payload of every completed event.
#[derive(Debug)]
pub struct SseParser {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
    max_line: usize,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::with_max_line(MAX_SSE_LINE_BYTES)
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            data_lines: Vec::new(),
            max_line,
        }
    }

    /// Errors once an unterminated line exceeds the cap; the parser is not
    /// usable after that.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, StreamError> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if line.is_empty() {
                if !self.data_lines.is_empty() {
                    events.push(self.data_lines.join("\n"));
                    self.data_lines.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data_lines
                    .push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
            // Comments (":") and event/id/retry fields carry nothing we use.
        }

        if self.buffer.len() > self.max_line {
            self.buffer.clear();
            return Err(StreamError::LineTooLong(self.max_line));
        }
        Ok(events)
    }
}

/// Streaming client for a bitsocket-style SSE feed.
pub struct BitsocketSource {
    base_url: String,
    client: reqwest::Client,
}

impl BitsocketSource {
    /// No request timeout: the stream is expected to sit idle for long
    /// stretches, liveness comes from the transport closing.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ConnectionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }
}

struct SseState {
    body: Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>,
    parser: SseParser,
    ready: VecDeque<String>,
    finished: bool,
}

#[async_trait]
impl FeedSource for BitsocketSource {
    async fn open(&self, query: &FeedQuery) -> Result<FeedStream, ConnectionError> {
        let url = query.url(&self.base_url);
        log::debug!("Opening feed stream: {}", url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConnectionError::Status(response.status().as_u16()));
        }

        let state = SseState {
            body: Box::pin(response.bytes_stream().map(|chunk| chunk.map(|bytes| bytes.to_vec()))),
            parser: SseParser::new(),
            ready: VecDeque::new(),
            finished: false,
        };

        Ok(Box::pin(stream::unfold(state, |mut state| async move {
            loop {
                if let Some(data) = state.ready.pop_front() {
                    return Some((Ok(decode_message(&data)), state));
                }
                if state.finished {
                    return None;
                }
                match state.body.next().await {
                    Some(Ok(chunk)) => match state.parser.push(&chunk) {
                        Ok(events) => state.ready.extend(events),
                        Err(e) => {
                            state.finished = true;
                            return Some((Err(e), state));
                        }
                    },
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(StreamError::Transport(e.to_string())), state));
                    }
                    None => {
                        state.finished = true;
                        return Some((Err(StreamError::Closed), state));
                    }
                }
            }
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_events_across_chunks() {
        let mut parser = SseParser::new();

        assert!(parser.push(b"data: {\"type\":").unwrap().is_empty());
        assert!(parser.push(b"\"open\"}\r\n").unwrap().is_empty());
        let events = parser
            .push(b"\r\n: keep-alive\n\nevent: x\ndata: a\ndata: b\n\n")
            .unwrap();

        assert_eq!(events, vec![r#"{"type":"open"}"#.to_string(), "a\nb".to_string()]);
    }

    #[test]
    fn test_sse_without_space_after_colon() {
        let mut parser = SseParser::new();

        let events = parser.push(b"data:{}\n\n").unwrap();

        assert_eq!(events, vec!["{}".to_string()]);
    }

    #[test]
    fn test_sse_incomplete_event_is_held() {
        let mut parser = SseParser::new();

        assert!(parser.push(b"data: 1\n").unwrap().is_empty());
        assert_eq!(parser.push(b"\n").unwrap(), vec!["1".to_string()]);
    }

    #[test]
    fn test_sse_unterminated_line_over_cap_fails() {
        let mut parser = SseParser::with_max_line(16);

        assert_eq!(parser.push(b"data: 0123456789\n\n").unwrap(), vec!["0123456789".to_string()]);
        assert!(parser.push(b"data: 01234").unwrap().is_empty());
        assert_eq!(parser.push(b"56789abcdef"), Err(StreamError::LineTooLong(16)));
    }
}
