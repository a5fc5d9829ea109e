//! # Server-Sent Events
//!
//! The browser-facing half of a live session is a single long-lived
//! `text/event-stream` response. Every event is one frame:
//!
//! ```text
//! data: {"type":"text","text":"Halo"}\n\n
//! ```
//!
//! ## Event types:
//! - `connected`: the upstream session is open
//! - `text`: a transcript or text fragment
//! - `audioChunk`: base64 PCM audio with its mime type
//! - `functionCalls`: a batch of actions for the map
//! - `complete`: the turn finished (terminal)
//! - `error`: the session failed (terminal)
//!
//! Once a terminal event is written the emitter drops everything after it.
//!
//! ## Disconnect detection:
//! The response body owns a [`DisconnectGuard`]. When actix drops the body
//! (client went away), the guard cancels the session's token and any later
//! `emit` is dropped silently.

use crate::live::messages::FunctionCall;
use actix_web::http::header;
use actix_web::HttpResponse;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One event on the browser stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "connected")]
    Connected,

    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "audioChunk")]
    AudioChunk {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    #[serde(rename = "functionCalls")]
    FunctionCalls {
        #[serde(rename = "functionCalls")]
        function_calls: Vec<FunctionCall>,
    },

    #[serde(rename = "complete")]
    Complete,

    #[serde(rename = "error")]
    Error { error: String },
}

impl StreamEvent {
    pub fn error(err: impl Display) -> Self {
        StreamEvent::Error {
            error: err.to_string(),
        }
    }

    /// `complete` and `error` end the stream from the browser's point of view.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete | StreamEvent::Error { .. })
    }

    pub fn to_frame(&self) -> Result<Bytes, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(Bytes::from(format!("data: {}\n\n", json)))
    }
}

/// Write side of one browser stream. Cheap to clone; all clones feed the same response.
#[derive(Clone)]
pub struct SseEmitter {
    tx: mpsc::UnboundedSender<Bytes>,
    session_id: Arc<str>,
    peer_gone: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
}

impl SseEmitter {
    /// Create an emitter and the receiver that becomes the response body.
    pub fn channel(session_id: &str) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = Self {
            tx,
            session_id: Arc::from(session_id),
            peer_gone: Arc::new(AtomicBool::new(false)),
            ended: Arc::new(AtomicBool::new(false)),
        };
        (emitter, rx)
    }

    /// Queue one event. Returns `false` if the event was dropped because the
    /// client is gone or a terminal event has already been sent.
    pub fn emit(&self, event: &StreamEvent) -> bool {
        let already_ended = if event.is_terminal() {
            self.ended.swap(true, Ordering::SeqCst)
        } else {
            self.ended.load(Ordering::SeqCst)
        };
        if already_ended {
            debug!(session_id = %self.session_id, event = ?event, "Stream already ended; dropping event");
            return false;
        }

        if self.tx.is_closed() {
            if !self.peer_gone.swap(true, Ordering::SeqCst) {
                debug!(session_id = %self.session_id, "Client disconnected; dropping events");
            }
            return false;
        }

        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "Failed to serialize stream event");
                return false;
            }
        };

        self.tx.send(frame).is_ok()
    }
}

/// Cancels the session token when the response body is dropped.
pub struct DisconnectGuard {
    token: CancellationToken,
}

impl DisconnectGuard {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Build the streaming response around the emitter's receiver.
pub fn event_stream_response(
    rx: mpsc::UnboundedReceiver<Bytes>,
    guard: DisconnectGuard,
) -> HttpResponse {
    let body = UnboundedReceiverStream::new(rx).map(move |frame| {
        let _held = &guard;
        Ok::<_, actix_web::Error>(frame)
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(body)
}
