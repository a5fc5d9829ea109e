//! # Live Client
//!
//! HTTP side of a consumer: POSTs the query, then reads the server-sent
//! event stream back as typed [`StreamEvent`]s.

use crate::models::{CreateSessionRequest, CreateSessionResponse};
use crate::sse::StreamEvent;
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

const MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;

pub struct LiveClient {
    http: reqwest::Client,
    base_url: String,
}

impl LiveClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn session_url(&self, session_id: &str) -> String {
        format!("{}/sessions/{}", self.base_url, session_id)
    }

    pub async fn create_session(
        &self,
        session_id: &str,
        body: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse> {
        let response = self
            .http
            .post(self.session_url(session_id))
            .json(body)
            .send()
            .await
            .context("Failed to reach the session endpoint")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Session creation failed ({}): {}", status, text));
        }

        response
            .json::<CreateSessionResponse>()
            .await
            .context("Malformed session creation response")
    }

    pub async fn open_stream(&self, session_id: &str) -> Result<EventStream> {
        let response = self
            .http
            .get(self.session_url(session_id))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .context("Failed to open the event stream")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Event stream rejected ({})", status));
        }

        let bytes = response
            .bytes_stream()
            .map(|r| r.map_err(std::io::Error::other));
        Ok(EventStream::new(bytes))
    }
}

/// Parse one line of an event stream. Blank lines, comments and non-data
/// fields yield `None`.
pub fn parse_line(line: &str) -> Option<serde_json::Result<StreamEvent>> {
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.is_empty() {
        return None;
    }
    Some(serde_json::from_str(data))
}

pub struct EventStream {
    lines: FramedRead<StreamReader<BoxStream<'static, std::io::Result<Bytes>>, Bytes>, LinesCodec>,
}

impl EventStream {
    pub fn new<S>(bytes: S) -> Self
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        Self {
            lines: FramedRead::new(
                StreamReader::new(bytes.boxed()),
                LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
            ),
        }
    }

    /// Next event, or `None` when the server closed the stream.
    /// Frames that do not parse are logged and skipped.
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>> {
        while let Some(line) = self.lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!("Skipping oversized event line");
                    continue;
                }
                Err(LinesCodecError::Io(e)) => return Err(e).context("Event stream read failed"),
            };

            match parse_line(&line) {
                Some(Ok(event)) => return Ok(Some(event)),
                Some(Err(e)) => warn!(error = %e, "Unparseable event frame"),
                None => {
                    if !line.is_empty() {
                        debug!(line = %line, "Ignoring non-data line");
                    }
                }
            }
        }
        Ok(None)
    }
}
