//! Pushed terminal events: an SSE reader for `/stream` and a channel source.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use forgecrm_events::{JOB_FINISHED_TOPIC, JobTerminalEvent};

use crate::api::{ClientError, HttpJobApi};

/// A stream of terminal events. `None` means the source is closed; the
/// tracker then relies on polling alone.
#[async_trait]
pub trait PushSource: Send {
    async fn next_event(&mut self) -> Option<JobTerminalEvent>;
}

/// In-process push source fed by an unbounded channel.
pub struct ChannelPushSource {
    rx: mpsc::UnboundedReceiver<JobTerminalEvent>,
}

impl ChannelPushSource {
    pub fn channel() -> (mpsc::UnboundedSender<JobTerminalEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl PushSource for ChannelPushSource {
    async fn next_event(&mut self) -> Option<JobTerminalEvent> {
        self.rx.recv().await
    }
}

/// One dispatched SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` parser. Chunks may split lines anywhere,
/// including inside a multi-byte character; only complete lines are decoded.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every frame completed by them.
    pub fn feed(&mut self, chunk: impl AsRef<[u8]>) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk.as_ref());
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    frames.push(SseFrame {
                        event: self.event.take(),
                        data: self.data.join("\n"),
                    });
                }
                self.event = None;
                self.data.clear();
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        frames
    }
}

/// Reads `bulk_email.job_finished` events from the API's `/stream`.
pub struct SseEventSource {
    response: Option<reqwest::Response>,
    parser: SseParser,
    pending: VecDeque<JobTerminalEvent>,
}

impl SseEventSource {
    pub async fn connect(api: &HttpJobApi) -> Result<Self, ClientError> {
        let response = api
            .request(reqwest::Method::GET, "/stream")
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ClientError::Api {
                status: response.status().as_u16(),
                code: "stream_unavailable".to_string(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(Self {
            response: Some(response),
            parser: SseParser::new(),
            pending: VecDeque::new(),
        })
    }

    fn accept(&mut self, frames: Vec<SseFrame>) {
        for frame in frames {
            if frame.event.as_deref() != Some(JOB_FINISHED_TOPIC) {
                continue;
            }
            match serde_json::from_str::<JobTerminalEvent>(&frame.data) {
                Ok(event) => self.pending.push_back(event),
                Err(e) => debug!(error = %e, "ignoring malformed terminal event"),
            }
        }
    }
}

#[async_trait]
impl PushSource for SseEventSource {
    async fn next_event(&mut self) -> Option<JobTerminalEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let response = self.response.as_mut()?;
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    let frames = self.parser.feed(&bytes);
                    self.accept(frames);
                }
                Ok(None) => {
                    debug!("event stream closed");
                    self.response = None;
                }
                Err(e) => {
                    warn!(error = %e, "event stream failed");
                    self.response = None;
                }
            }
        }
    }
}
