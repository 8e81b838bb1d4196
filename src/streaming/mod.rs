pub mod entities;

use async_channel::Sender;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use tokio::task::JoinHandle;

use crate::model::ChannelStopped;
use crate::rest::endpoint_url;
use crate::rest::entities::Endpoint;
use crate::rest::error::GatewayError;
use entities::{Event, Frame};

/// Opens the login-scoped push stream for one client.
pub trait EventSource: Send + Sync {
    fn listen(&self, client_name: &str, sender: Sender<Event>) -> JoinHandle<()>;
}

pub struct Streaming {
    client: reqwest::Client,
    url: String,
}

impl Streaming {
    pub fn new(base_url: &str) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, url: endpoint_url(base_url, Endpoint::Login) })
    }
}

impl EventSource for Streaming {
    fn listen(&self, client_name: &str, sender: Sender<Event>) -> JoinHandle<()> {
        let request = self
            .client
            .get(&self.url)
            .query(&[("client_name", client_name)])
            .header(ACCEPT, "text/event-stream");
        tokio::spawn(async move {
            let last = hold(request, &sender).await;
            log::info!("event stream finished: {:?}", last);
            let _ = sender.send(last).await;
        })
    }
}

async fn hold(request: reqwest::RequestBuilder, sender: &Sender<Event>) -> Event {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => return Event::Lost(e.to_string()),
    };
    let status = response.status();
    if status.is_server_error() {
        return Event::Lost(format!("login answered with {}", status));
    }
    if !status.is_success() {
        return Event::Refused(status.as_u16());
    }
    let mut stream = response.bytes_stream();
    let mut frames = FrameBuffer::default();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return Event::Lost(e.to_string()),
        };
        for data in frames.push(&chunk) {
            if route(&data, sender).await.is_err() {
                return Event::Ended;
            }
        }
    }
    Event::Ended
}

/// Decodes one payload and forwards it; undecodable payloads are logged and dropped.
pub async fn route(data: &str, sender: &Sender<Event>) -> Result<(), ChannelStopped> {
    match data.parse::<Frame>() {
        Ok(frame) => sender.send(Event::Frame(frame)).await?,
        Err(e) => log::warn!("dropped event: {}", e),
    }
    Ok(())
}

/// Largest event block kept while waiting for its terminating blank line.
pub const MAX_BLOCK: usize = 1 << 20;

/// Splits the raw stream into event blocks and returns the `data:` payload of each.
///
/// A block that outgrows the limit is discarded up to its blank line. Blocks that are not
/// UTF-8 are logged and dropped.
pub struct FrameBuffer {
    buf: Vec<u8>,
    limit: usize,
    skipping: bool,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_BLOCK)
    }
}

impl FrameBuffer {
    pub fn with_limit(limit: usize) -> Self {
        Self { buf: Vec::new(), limit, skipping: false }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend(chunk.iter().copied().filter(|&b| b != b'\r'));
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buf.drain(..pos + 2).collect();
            if self.skipping {
                self.skipping = false;
                continue;
            }
            match std::str::from_utf8(&block) {
                Ok(text) => payloads.extend(data_of(text)),
                Err(e) => log::warn!("dropped event that is not UTF-8: {}", e),
            }
        }
        if self.buf.len() > self.limit {
            log::warn!("dropped event larger than {} bytes", self.limit);
            let trailing_newline = self.buf.last() == Some(&b'\n');
            self.buf.clear();
            if trailing_newline {
                self.buf.push(b'\n');
            }
            self.skipping = true;
        }
        payloads
    }
}

fn data_of(block: &str) -> Option<String> {
    let lines: Vec<&str> = block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}


#[cfg(test)]
mod test {
    use super::entities::Notice;
    use super::*;

    #[test]
    fn test_frame_buffer() {
        let mut frames = FrameBuffer::default();
        assert!(frames.push(b"data: 0\r\n").is_empty());
        assert_eq!(frames.push(b"\r\n"), vec!["0".to_owned()]);

        let payloads = frames.push(b"event: x\r\ndata: {\"a\":\r\ndata: 1}\r\n\r\ndata:2\n\n: comment\n\ndata: 3");
        assert_eq!(payloads, vec!["{\"a\":\n1}".to_owned(), "2".to_owned()]);
        assert_eq!(frames.push(b"\n\n"), vec!["3".to_owned()]);
    }

    #[test]
    fn test_frame_buffer_drops_invalid_utf8() {
        let mut frames = FrameBuffer::default();
        assert_eq!(frames.push(b"data: {\"ticker\": \"P\xffTR4\"}\n\ndata: 2\n\n"), vec!["2".to_owned()]);
    }

    #[test]
    fn test_frame_buffer_limit() {
        let mut frames = FrameBuffer::with_limit(16);
        assert!(frames.push(b"data: 0123456789abcdefghij").is_empty());
        assert!(frames.push(b"klmnop\n").is_empty());
        assert_eq!(frames.push(b"\ndata: 1\n\n"), vec!["1".to_owned()]);
        assert_eq!(frames.push(b"data: 2\n\n"), vec!["2".to_owned()]);
    }

    #[test]
    fn test_frame_buffer_split_utf8() {
        let mut frames = FrameBuffer::default();
        let bytes = "data: {\"event\": \"limit\", \"ticker\": \"AÇÃO3\", \"current_quote\": 1}\n\n".as_bytes();
        let (head, tail) = bytes.split_at(40);
        assert!(frames.push(head).is_empty());
        let payloads = frames.push(tail);
        assert!(matches!(payloads[0].parse::<Frame>(), Ok(Frame::Notice(Notice::Limit { .. }))));
    }

    #[tokio::test]
    async fn test_route_drops_garbage() {
        let (sender, receiver) = async_channel::bounded(10);
        route("not json", &sender).await.unwrap();
        route("0", &sender).await.unwrap();
        route(r#"{"event": "unknown"}"#, &sender).await.unwrap();
        route(r#"{"event": "limit", "ticker": "PETR4", "current_quote": 10}"#, &sender).await.unwrap();
        assert_eq!(receiver.recv().await.unwrap(), Event::Frame(Frame::Status(0)));
        assert!(matches!(receiver.recv().await.unwrap(), Event::Frame(Frame::Notice(Notice::Limit { .. }))));
        assert!(receiver.is_empty());
    }
}
