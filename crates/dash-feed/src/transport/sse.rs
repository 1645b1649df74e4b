//! Server-Sent Events transport.
//!
//! Reads `GET {base}/api/stream` as a byte stream and splits it into frames:
//! `event:` names the channel, `data:` lines carry JSON, `:` lines are
//! comments (the backend sends `: heartbeat` every 15 seconds).

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tracing::{debug, info, warn};

use super::{FeedError, Frame, Transport};

/// A parsed SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Event { event: String, data: String },
    Comment(String),
}

/// Incremental SSE parser. Chunks may split lines (and UTF-8 sequences)
/// anywhere; bytes are buffered until a full line arrives.
#[derive(Debug, Default)]
pub struct SseParser {
    line: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                self.handle_line(&line, &mut frames);
            } else {
                self.line.push(byte);
            }
        }
        frames
    }

    /// Drop any partially received frame.
    pub fn clear(&mut self) {
        self.line.clear();
        self.event = None;
        self.data.clear();
    }

    fn handle_line(&mut self, raw: &[u8], frames: &mut Vec<SseFrame>) {
        let line = String::from_utf8_lossy(raw);

        if line.is_empty() {
            let event = self.event.take();
            if !self.data.is_empty() {
                frames.push(SseFrame::Event {
                    event: event.unwrap_or_else(|| "message".to_string()),
                    data: self.data.join("\n"),
                });
                self.data.clear();
            }
            return;
        }

        if let Some(comment) = line.strip_prefix(':') {
            frames.push(SseFrame::Comment(comment.trim().to_string()));
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id / retry are not used by the backend
            _ => {}
        }
    }
}

/// Persistent SSE push transport.
pub struct SseTransport {
    http: Client,
    url: String,
    stream: Option<BoxStream<'static, Result<Vec<u8>, reqwest::Error>>>,
    parser: SseParser,
    pending: VecDeque<Frame>,
}

impl SseTransport {
    /// Create a transport for `{base_url}{stream_path}`.
    ///
    /// Only the connect phase is bounded; the response body stays open
    /// indefinitely.
    pub fn new(base_url: &str, stream_path: &str, connect_timeout: Duration) -> Result<Self, FeedError> {
        let http = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self {
            http,
            url: format!("{}{}", base_url.trim_end_matches('/'), stream_path),
            stream: None,
            parser: SseParser::new(),
            pending: VecDeque::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn to_frame(frame: SseFrame) -> Frame {
        match frame {
            SseFrame::Comment(_) => Frame::Heartbeat,
            SseFrame::Event { event, data } => match serde_json::from_str(&data) {
                Ok(payload) => Frame::Channel {
                    channel: event,
                    payload,
                },
                Err(e) => {
                    warn!(channel = %event, "Dropping SSE frame with invalid JSON: {e}");
                    Frame::Heartbeat
                }
            },
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn open(&mut self) -> Result<(), FeedError> {
        self.close().await;

        info!("Opening SSE stream at {}", self.url);
        let response = self
            .http
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FeedError::Status(response.status().as_u16()));
        }

        self.stream = Some(response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())).boxed());
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, FeedError> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }

            let Some(stream) = self.stream.as_mut() else {
                return Err(FeedError::NotOpen);
            };

            match stream.next().await {
                Some(Ok(chunk)) => {
                    for frame in self.parser.push(&chunk) {
                        self.pending.push_back(Self::to_frame(frame));
                    }
                }
                Some(Err(e)) => return Err(FeedError::Http(e)),
                None => {
                    debug!("SSE stream closed by server");
                    return Ok(None);
                }
            }
        }
    }

    async fn close(&mut self) {
        self.stream = None;
        self.parser.clear();
        self.pending.clear();
    }

    fn kind(&self) -> &'static str {
        "sse"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use serde_json::json;

    fn transport(base_url: &str) -> SseTransport {
        SseTransport::new(base_url, "/api/stream", Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_parse_named_event() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"event: risk\ndata: {\"daily_loss_pct\": -1.5}\n\n");
        assert_eq!(
            frames,
            vec![SseFrame::Event {
                event: "risk".to_string(),
                data: "{\"daily_loss_pct\": -1.5}".to_string(),
            }]
        );
    }

    #[test]
    fn test_parse_split_chunks_and_crlf() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"event: sta").is_empty());
        assert!(parser.push(b"tus\r\ndata: {\"running\"").is_empty());
        let frames = parser.push(b": true}\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0],
            SseFrame::Event {
                event: "status".to_string(),
                data: "{\"running\": true}".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_heartbeat_comment() {
        let mut parser = SseParser::new();
        let frames = parser.push(b": heartbeat\n\n");
        assert_eq!(frames, vec![SseFrame::Comment("heartbeat".to_string())]);
    }

    #[test]
    fn test_multiline_data_is_joined() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"event: events\ndata: [1,\ndata: 2]\n\n");
        assert_eq!(
            frames,
            vec![SseFrame::Event {
                event: "events".to_string(),
                data: "[1,\n2]".to_string(),
            }]
        );
    }

    #[test]
    fn test_event_without_name_is_message() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"data: {}\n\n");
        assert_eq!(
            frames,
            vec![SseFrame::Event {
                event: "message".to_string(),
                data: "{}".to_string(),
            }]
        );
    }

    #[test]
    fn test_event_name_without_data_is_discarded() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"event: risk\n\ndata: {}\n\n").iter().all(|f| matches!(
            f,
            SseFrame::Event { event, .. } if event == "message"
        )));
    }

    #[test]
    fn test_invalid_json_becomes_heartbeat() {
        let frame = SseTransport::to_frame(SseFrame::Event {
            event: "positions".to_string(),
            data: "[{".to_string(),
        });
        assert_eq!(frame, Frame::Heartbeat);
    }

    #[tokio::test]
    async fn test_open_and_read_served_stream() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/stream").header("accept", "text/event-stream");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body("event: risk\ndata: {\"daily_loss_pct\": -1.5}\n\n: heartbeat\n\n");
            })
            .await;

        let mut t = transport(&server.base_url());
        t.open().await.unwrap();

        assert_eq!(
            t.next_frame().await.unwrap(),
            Some(Frame::channel("risk", json!({"daily_loss_pct": -1.5})))
        );
        assert_eq!(t.next_frame().await.unwrap(), Some(Frame::Heartbeat));
        assert_eq!(t.next_frame().await.unwrap(), None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_open_rejects_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/stream");
                then.status(503);
            })
            .await;

        let mut t = transport(&server.base_url());
        let err = t.open().await.unwrap_err();
        assert!(matches!(err, FeedError::Status(503)));
        assert!(matches!(t.next_frame().await, Err(FeedError::NotOpen)));
    }

    #[tokio::test]
    async fn test_next_frame_before_open() {
        let mut t = transport("http://127.0.0.1:9");
        assert!(matches!(t.next_frame().await, Err(FeedError::NotOpen)));
    }
}
