//! # Turn Processor
//!
//! Drains a session's response queue and turns upstream messages into
//! browser events until the turn ends.
//!
//! ## Per message:
//! - tool call batch (non-empty): emit `functionCalls`, then acknowledge every
//!   call upstream with a generic success response
//! - content: each audio part with data becomes `audioChunk`, each text part `text`
//! - turn complete: stop, outcome `Completed`
//! - connection error: emit `error` and stop, outcome `Failed`. Content queued
//!   before the error has already gone out, so `error` is the last event
//!
//! If no message arrives within the per-message timeout the turn ends as
//! `TimedOut`, which the caller treats like a normal completion.

use crate::error::SessionError;
use crate::live::broker::LiveSession;
use crate::live::messages::{ContentPart, FunctionCall, FunctionResponse, ServerMessage};
use crate::sse::{SseEmitter, StreamEvent};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed,
    TimedOut,
    Failed(String),
}

impl TurnOutcome {
    /// A failed turn ends with its `error` event; the others end with `complete`.
    pub fn emits_complete(&self) -> bool {
        !matches!(self, TurnOutcome::Failed(_))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct TurnStats {
    pub messages: u64,
    pub text_fragments: u64,
    pub audio_chunks: u64,
    pub function_calls: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    pub stats: TurnStats,
}

pub struct TurnProcessor {
    message_timeout: Duration,
}

impl TurnProcessor {
    pub fn new(message_timeout: Duration) -> Self {
        Self { message_timeout }
    }

    /// Run the turn loop. At most one loop may run per session at a time.
    pub async fn run(
        &self,
        session: &LiveSession,
        responses: &mut mpsc::UnboundedReceiver<ServerMessage>,
        emitter: &SseEmitter,
    ) -> Result<TurnReport, SessionError> {
        let _processing = session.begin_processing()?;
        let mut stats = TurnStats::default();

        let outcome = loop {
            let message = match tokio::time::timeout(self.message_timeout, responses.recv()).await {
                Ok(Some(message)) => message,
                Ok(None) => break TurnOutcome::Failed("response queue closed".to_string()),
                Err(_) => {
                    info!(
                        session_id = %session.session_id,
                        timeout_ms = self.message_timeout.as_millis() as u64,
                        "No upstream message in time; ending turn"
                    );
                    break TurnOutcome::TimedOut;
                }
            };
            stats.messages += 1;

            match message {
                ServerMessage::ToolCallBatch { calls } => {
                    if calls.is_empty() {
                        continue;
                    }
                    stats.function_calls += calls.len() as u64;
                    emitter.emit(&StreamEvent::FunctionCalls {
                        function_calls: calls.clone(),
                    });
                    acknowledge(session, &calls).await;
                }
                ServerMessage::Content { parts } => {
                    for part in parts {
                        match part {
                            ContentPart::Audio { data, mime_type } => {
                                if data.is_empty() {
                                    continue;
                                }
                                stats.audio_chunks += 1;
                                emitter.emit(&StreamEvent::AudioChunk { data, mime_type });
                            }
                            ContentPart::Text(text) => {
                                stats.text_fragments += 1;
                                emitter.emit(&StreamEvent::Text { text });
                            }
                        }
                    }
                }
                ServerMessage::TurnComplete => break TurnOutcome::Completed,
                ServerMessage::ConnectionError { reason } => {
                    emitter.emit(&StreamEvent::error(SessionError::UpstreamStream(reason.clone())));
                    break TurnOutcome::Failed(reason);
                }
                ServerMessage::ConnectionOpened => {}
            }
        };

        debug!(session_id = %session.session_id, outcome = ?outcome, stats = ?stats, "Turn finished");
        Ok(TurnReport { outcome, stats })
    }
}

async fn acknowledge(session: &LiveSession, calls: &[FunctionCall]) {
    let Some(transport) = session.transport() else {
        warn!(session_id = %session.session_id, "No transport to acknowledge function calls");
        return;
    };

    let responses: Vec<FunctionResponse> = calls.iter().map(FunctionResponse::acknowledged).collect();
    match transport.send_tool_response(&responses).await {
        Ok(()) => debug!(session_id = %session.session_id, count = responses.len(), "Acknowledged function calls"),
        Err(err) => warn!(session_id = %session.session_id, error = %err, "Failed to acknowledge function calls"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::live::broker::SessionBroker;
    use crate::live::testing::{ScriptStep, ScriptedConnector};
    use crate::models::{CreateSessionRequest, PendingRequest};
    use crate::sse::StreamEvent;
    use serde_json::json;
    use std::sync::Arc;

    fn request() -> PendingRequest {
        PendingRequest::from_body(
            "s1",
            CreateSessionRequest {
                query: "cari kopi".into(),
                ..Default::default()
            },
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<bytes::Bytes>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let text = String::from_utf8(frame.to_vec()).unwrap();
            let json = text.trim_start_matches("data: ").trim_end();
            events.push(serde_json::from_str(json).unwrap());
        }
        events
    }

    fn call(id: &str, name: &str, args: serde_json::Value) -> FunctionCall {
        FunctionCall {
            name: name.into(),
            args,
            id: id.into(),
        }
    }

    #[tokio::test]
    async fn test_full_turn_in_order() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            ScriptStep::Open,
            ScriptStep::Message(ServerMessage::ToolCallBatch {
                calls: vec![call("c1", "show_umkm_details", json!({"umkm_id": "u1"}))],
            }),
            ScriptStep::Message(ServerMessage::Content {
                parts: vec![
                    ContentPart::Audio {
                        data: "AAA=".into(),
                        mime_type: "audio/pcm;rate=24000".into(),
                    },
                    ContentPart::Audio {
                        data: String::new(),
                        mime_type: "audio/pcm".into(),
                    },
                    ContentPart::Text("Kopi Senja".into()),
                ],
            }),
            ScriptStep::Message(ServerMessage::TurnComplete),
        ]));
        let broker = SessionBroker::new(connector.clone(), AppConfig::default().live);
        let (emitter, mut events) = SseEmitter::channel("s1");
        let mut opened = broker.open(&request(), emitter.clone(), 10).await.unwrap();

        let report = TurnProcessor::new(Duration::from_secs(10))
            .run(&opened.session, &mut opened.responses, &emitter)
            .await
            .unwrap();

        assert_eq!(report.outcome, TurnOutcome::Completed);
        assert_eq!(report.stats.audio_chunks, 1);
        assert_eq!(report.stats.function_calls, 1);

        let events = drain(&mut events);
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], StreamEvent::Connected);
        assert!(matches!(&events[1], StreamEvent::FunctionCalls { function_calls } if function_calls[0].id == "c1"));
        assert!(matches!(&events[2], StreamEvent::AudioChunk { data, .. } if data == "AAA="));
        assert_eq!(events[3], StreamEvent::Text { text: "Kopi Senja".into() });

        let sent = connector.sent_frames();
        let acks = &sent[1]["toolResponse"]["functionResponses"];
        assert_eq!(acks[0]["id"], "c1");
        assert_eq!(acks[0]["name"], "show_umkm_details");
        assert_eq!(acks[0]["response"]["result"], "success");
    }

    #[tokio::test]
    async fn test_empty_tool_batch_is_skipped() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            ScriptStep::Open,
            ScriptStep::Message(ServerMessage::ToolCallBatch { calls: vec![] }),
            ScriptStep::Message(ServerMessage::TurnComplete),
        ]));
        let broker = SessionBroker::new(connector.clone(), AppConfig::default().live);
        let (emitter, mut events) = SseEmitter::channel("s1");
        let mut opened = broker.open(&request(), emitter.clone(), 10).await.unwrap();

        let report = TurnProcessor::new(Duration::from_secs(10))
            .run(&opened.session, &mut opened.responses, &emitter)
            .await
            .unwrap();

        assert_eq!(report.outcome, TurnOutcome::Completed);
        assert_eq!(drain(&mut events), vec![StreamEvent::Connected]);
        assert_eq!(connector.sent_frames().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_times_out() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            ScriptStep::Open,
            ScriptStep::Message(ServerMessage::Content {
                parts: vec![ContentPart::Text("Halo".into())],
            }),
        ]));
        let broker = SessionBroker::new(connector, AppConfig::default().live);
        let (emitter, _events) = SseEmitter::channel("s1");
        let mut opened = broker.open(&request(), emitter.clone(), 10).await.unwrap();
        let started = tokio::time::Instant::now();

        let report = TurnProcessor::new(Duration::from_secs(10))
            .run(&opened.session, &mut opened.responses, &emitter)
            .await
            .unwrap();

        assert_eq!(report.outcome, TurnOutcome::TimedOut);
        assert!(report.outcome.emits_complete());
        assert_eq!(report.stats.text_fragments, 1);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_messages_reset_the_timeout() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            ScriptStep::Open,
            ScriptStep::Delay(Duration::from_secs(8)),
            ScriptStep::Message(ServerMessage::Content {
                parts: vec![ContentPart::Text("satu".into())],
            }),
            ScriptStep::Delay(Duration::from_secs(8)),
            ScriptStep::Message(ServerMessage::TurnComplete),
        ]));
        let broker = SessionBroker::new(connector, AppConfig::default().live);
        let (emitter, _events) = SseEmitter::channel("s1");
        let mut opened = broker.open(&request(), emitter.clone(), 10).await.unwrap();

        let report = TurnProcessor::new(Duration::from_secs(10))
            .run(&opened.session, &mut opened.responses, &emitter)
            .await
            .unwrap();

        assert_eq!(report.outcome, TurnOutcome::Completed);
    }

    #[tokio::test]
    async fn test_connection_error_fails_turn() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            ScriptStep::Open,
            ScriptStep::Frame(r#"{"error":{"message":"invalid argument"}}"#.into()),
        ]));
        let broker = SessionBroker::new(connector, AppConfig::default().live);
        let (emitter, mut events) = SseEmitter::channel("s1");
        let mut opened = broker.open(&request(), emitter.clone(), 10).await.unwrap();

        let report = TurnProcessor::new(Duration::from_secs(10))
            .run(&opened.session, &mut opened.responses, &emitter)
            .await
            .unwrap();

        assert_eq!(report.outcome, TurnOutcome::Failed("invalid argument".into()));
        assert!(!report.outcome.emits_complete());
        let events = drain(&mut events);
        assert!(matches!(events.last(), Some(StreamEvent::Error { error }) if error.contains("invalid argument")));
    }

    #[tokio::test]
    async fn test_error_follows_queued_content() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            ScriptStep::Open,
            ScriptStep::Message(ServerMessage::Content {
                parts: vec![ContentPart::Text("late".into())],
            }),
            ScriptStep::Error("boom".into()),
        ]));
        let broker = SessionBroker::new(connector, AppConfig::default().live);
        let (emitter, mut events) = SseEmitter::channel("s1");
        let mut opened = broker.open(&request(), emitter.clone(), 10).await.unwrap();

        let report = TurnProcessor::new(Duration::from_secs(10))
            .run(&opened.session, &mut opened.responses, &emitter)
            .await
            .unwrap();

        assert_eq!(report.outcome, TurnOutcome::Failed("boom".into()));
        assert_eq!(
            drain(&mut events),
            vec![
                StreamEvent::Connected,
                StreamEvent::Text { text: "late".into() },
                StreamEvent::error(SessionError::UpstreamStream("boom".into())),
            ]
        );
    }

    #[tokio::test]
    async fn test_second_loop_is_rejected() {
        let connector = Arc::new(ScriptedConnector::new(vec![ScriptStep::Open]));
        let broker = SessionBroker::new(connector, AppConfig::default().live);
        let (emitter, _events) = SseEmitter::channel("s1");
        let mut opened = broker.open(&request(), emitter.clone(), 10).await.unwrap();

        let _guard = opened.session.begin_processing().unwrap();
        let result = TurnProcessor::new(Duration::from_millis(10))
            .run(&opened.session, &mut opened.responses, &emitter)
            .await;
        assert!(matches!(result, Err(SessionError::AlreadyProcessing(_))));
    }
}
