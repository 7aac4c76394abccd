//! Server-Sent Events decoding
//!
//! [`SseCodec`] turns a byte stream into events; [`EventStream`] runs the
//! read loop on a background task and hands decoded payloads to a single
//! consumer. Dropping the stream aborts the task, which drops the HTTP
//! response and closes the connection.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, BytesMut};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tokio_util::codec::Decoder;

use crate::error::{Error, Result};

/// Payload that ends a stream
pub const DONE_MARKER: &str = "[DONE]";

/// Decoded events buffered ahead of the consumer
const CHANNEL_CAPACITY: usize = 32;

/// One dispatched event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

/// Line-oriented SSE decoder.
///
/// `data:` lines accumulate until a blank line dispatches the event. Events
/// with no data are dropped, as are comment lines.
#[derive(Debug, Default)]
pub struct SseCodec {
    data: Vec<String>,
    event: Option<String>,
    id: Option<String>,
}

impl SseCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one line; returns an event when the line completes one.
    fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // `retry` and unknown fields carry nothing we act on
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event, id, data })
    }
}

impl Decoder for SseCodec {
    type Item = SseEvent;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<SseEvent>, Self::Error> {
        while let Some(newline) = src.iter().position(|b| *b == b'\n') {
            let raw = src.split_to(newline + 1);
            let text = String::from_utf8_lossy(&raw[..newline]);
            let line = text.strip_suffix('\r').unwrap_or(text.as_ref());

            if let Some(event) = self.feed_line(line) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> std::result::Result<Option<SseEvent>, Self::Error> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        if !src.is_empty() {
            let line = String::from_utf8_lossy(&src[..]).into_owned();
            src.advance(src.len());
            if let Some(event) = self.feed_line(line.trim_end_matches('\r')) {
                return Ok(Some(event));
            }
        }
        Ok(self.dispatch())
    }
}

/// Lazy, finite sequence of decoded stream events.
///
/// Yields `Ok(T)` per event until the relay sends `[DONE]`. Malformed events
/// are logged and skipped. A connection that ends early yields one final
/// `Err(Error::StreamInterrupted)`.
pub struct EventStream<T> {
    events: ReceiverStream<Result<T>>,
    reader: JoinHandle<()>,
}

impl<T> EventStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Start reading `response` on a background task.
    pub fn spawn(response: reqwest::Response) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let reader = tokio::spawn(pump::<T>(response, tx));
        Self {
            events: ReceiverStream::new(rx),
            reader,
        }
    }
}

impl<T> EventStream<T> {
    /// Stop reading and close the connection.
    pub fn close(self) {
        drop(self)
    }
}

impl<T> Unpin for EventStream<T> {}

impl<T> Stream for EventStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl<T> Drop for EventStream<T> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

struct Pump<T> {
    codec: SseCodec,
    tx: mpsc::Sender<Result<T>>,
}

/// Whether the read loop should keep going
enum Flow {
    Continue,
    Finished,
}

impl<T: DeserializeOwned> Pump<T> {
    async fn deliver(&mut self, event: SseEvent) -> Flow {
        if event.data == DONE_MARKER {
            tracing::debug!("stream finished");
            return Flow::Finished;
        }

        match serde_json::from_str::<T>(&event.data) {
            Ok(item) => {
                if self.tx.send(Ok(item)).await.is_err() {
                    tracing::debug!("stream consumer went away");
                    return Flow::Finished;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed stream event");
            }
        }
        Flow::Continue
    }

    async fn drain(&mut self, buffer: &mut BytesMut, at_eof: bool) -> Flow {
        loop {
            let next = if at_eof {
                self.codec.decode_eof(buffer)
            } else {
                self.codec.decode(buffer)
            };
            match next {
                Ok(Some(event)) => {
                    if let Flow::Finished = self.deliver(event).await {
                        return Flow::Finished;
                    }
                }
                Ok(None) => return Flow::Continue,
                Err(e) => {
                    tracing::warn!(error = %e, "stream decode failed");
                    return Flow::Continue;
                }
            }
        }
    }

    async fn interrupted(&self) {
        let _ = self.tx.send(Err(Error::StreamInterrupted)).await;
    }
}

async fn pump<T: DeserializeOwned>(mut response: reqwest::Response, tx: mpsc::Sender<Result<T>>) {
    let mut pump = Pump {
        codec: SseCodec::new(),
        tx,
    };
    let mut buffer = BytesMut::new();

    loop {
        let chunk = tokio::select! {
            _ = pump.tx.closed() => {
                tracing::debug!("stream consumer went away");
                return;
            }
            chunk = response.chunk() => chunk,
        };

        match chunk {
            Ok(Some(bytes)) => {
                buffer.extend_from_slice(&bytes);
                if let Flow::Finished = pump.drain(&mut buffer, false).await {
                    return;
                }
            }
            Ok(None) => {
                if let Flow::Finished = pump.drain(&mut buffer, true).await {
                    return;
                }
                tracing::warn!("stream ended without completion marker");
                pump.interrupted().await;
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "stream connection failed");
                pump.interrupted().await;
                return;
            }
        }
    }
}
