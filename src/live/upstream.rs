//! # Upstream Live Session
//!
//! The upstream AI service is reached through two traits:
//!
//! - [`LiveConnector`] opens a session and returns a [`LiveTransport`] for
//!   sending content, tool responses and closing.
//! - [`UpstreamHandler`] receives the asynchronous open/message/error/close
//!   callbacks. Handlers must not block: they run on the socket reader task.
//!
//! [`GeminiLiveConnector`] implements both sides over a websocket using the
//! bidirectional generate-content protocol.

use crate::config::LiveConfig;
use crate::error::SessionError;
use crate::live::messages::{
    parse_server_frame, tool_response_frame, FrameNotice, FunctionResponse, ServerMessage,
    SessionSetup, TurnContent,
};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

pub trait UpstreamHandler: Send + Sync + 'static {
    fn on_open(&self);
    fn on_message(&self, message: ServerMessage);
    fn on_error(&self, reason: String);
    fn on_close(&self, reason: Option<String>);
}

#[async_trait]
pub trait LiveTransport: Send + Sync {
    async fn send_content(&self, content: &TurnContent) -> Result<(), SessionError>;
    async fn send_tool_response(&self, responses: &[FunctionResponse]) -> Result<(), SessionError>;
    /// Close the session. Calling it more than once is a no-op.
    async fn close(&self);
}

#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(
        &self,
        setup: &SessionSetup,
        handler: Arc<dyn UpstreamHandler>,
    ) -> Result<Arc<dyn LiveTransport>, SessionError>;
}

/// Route one parsed upstream frame to the handler callbacks.
pub fn dispatch_frame(text: &str, handler: &dyn UpstreamHandler) {
    let parsed = match parse_server_frame(text) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(error = %err, len = text.len(), "Ignoring unparseable upstream frame");
            return;
        }
    };

    for notice in parsed.notices {
        match notice {
            FrameNotice::Interrupted => debug!("Upstream reported the turn was interrupted"),
            FrameNotice::GoAway(detail) => warn!(detail = %detail, "Upstream announced go-away"),
            FrameNotice::ToolCallCancelled(ids) => {
                info!(ids = ?ids, "Upstream cancelled tool calls")
            }
        }
    }

    for message in parsed.messages {
        match message {
            ServerMessage::ConnectionOpened => handler.on_open(),
            ServerMessage::ConnectionError { reason } => handler.on_error(reason),
            other => handler.on_message(other),
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct GeminiLiveConnector {
    endpoint: String,
    api_key: String,
}

impl GeminiLiveConnector {
    pub fn new(config: &LiveConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(
        &self,
        setup: &SessionSetup,
        handler: Arc<dyn UpstreamHandler>,
    ) -> Result<Arc<dyn LiveTransport>, SessionError> {
        if self.api_key.is_empty() {
            return Err(SessionError::UpstreamConnect(
                "no API key configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let (socket, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| SessionError::UpstreamConnect(e.to_string()))?;
        let (mut writer, reader) = socket.split();

        writer
            .send(Message::Text(setup.to_frame().to_string()))
            .await
            .map_err(|e| SessionError::UpstreamConnect(e.to_string()))?;
        debug!(model = %setup.model, "Sent live session setup");

        let reader_task = tokio::spawn(read_frames(reader, handler));

        Ok(Arc::new(GeminiLiveTransport {
            writer: Mutex::new(writer),
            reader_task,
            closed: AtomicBool::new(false),
        }))
    }
}

async fn read_frames(mut reader: SplitStream<WsStream>, handler: Arc<dyn UpstreamHandler>) {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => dispatch_frame(&text, handler.as_ref()),
            // The service also delivers JSON in binary frames.
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => dispatch_frame(text, handler.as_ref()),
                Err(_) => warn!(len = bytes.len(), "Ignoring non-UTF-8 binary frame"),
            },
            Ok(Message::Close(frame)) => {
                let (code, reason) = match frame {
                    Some(frame) => (frame.code, frame.reason.to_string()),
                    None => (CloseCode::Normal, String::new()),
                };
                if code != CloseCode::Normal && !reason.is_empty() {
                    handler.on_error(reason.clone());
                }
                handler.on_close(Some(reason).filter(|r| !r.is_empty()));
                return;
            }
            Ok(_) => {}
            Err(err) => {
                handler.on_error(err.to_string());
                return;
            }
        }
    }

    handler.on_close(None);
}

pub struct GeminiLiveTransport {
    writer: Mutex<SplitSink<WsStream, Message>>,
    reader_task: JoinHandle<()>,
    closed: AtomicBool,
}

impl GeminiLiveTransport {
    async fn send_frame(&self, frame: Value) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::UpstreamStream("session already closed".to_string()));
        }

        self.writer
            .lock()
            .await
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| SessionError::UpstreamStream(e.to_string()))
    }
}

#[async_trait]
impl LiveTransport for GeminiLiveTransport {
    async fn send_content(&self, content: &TurnContent) -> Result<(), SessionError> {
        self.send_frame(content.to_frame()).await
    }

    async fn send_tool_response(&self, responses: &[FunctionResponse]) -> Result<(), SessionError> {
        self.send_frame(tool_response_frame(responses)).await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(err) = self.writer.lock().await.close().await {
            debug!(error = %err, "Upstream close handshake failed");
        }
        // Dropping the reader releases the handler and everything it holds.
        self.reader_task.abort();
    }
}

impl Drop for GeminiLiveTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
