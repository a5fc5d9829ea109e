//! # Session Broker
//!
//! Owns every upstream live session, keyed by session id.
//!
//! ## Lifecycle:
//! ```text
//! Idle -> Connecting -> Open -> Closed
//!            \________________/
//!              (error / teardown)
//! ```
//! `Closed` is terminal. Callbacks that arrive after teardown cannot reopen a
//! session.
//!
//! ## Callbacks:
//! - open: state becomes `Open`, a `connected` event is emitted
//! - message: appended to the session's response queue in arrival order
//! - error: state becomes `Closed` and a `ConnectionError` is queued behind
//!   any content still waiting; the turn loop reports it in order
//! - close: the reason is recorded and nothing else happens; cleanup belongs to the caller

use crate::config::LiveConfig;
use crate::error::SessionError;
use crate::live::capabilities::function_declarations;
use crate::live::messages::{ServerMessage, SessionSetup, TurnContent};
use crate::live::prompt::build_system_prompt;
use crate::live::upstream::{LiveConnector, LiveTransport, UpstreamHandler};
use crate::models::PendingRequest;
use crate::sse::{SseEmitter, StreamEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// One upstream live session and its response queue.
pub struct LiveSession {
    pub session_id: String,
    /// Distinguishes this session from a later one reusing the same id.
    pub token: Uuid,
    pub created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    transport: OnceLock<Arc<dyn LiveTransport>>,
    responses: mpsc::UnboundedSender<ServerMessage>,
    processing: AtomicBool,
    torn_down: AtomicBool,
    close_reason: Mutex<Option<String>>,
}

impl LiveSession {
    fn new(session_id: &str, responses: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            session_id: session_id.to_string(),
            token: Uuid::new_v4(),
            created_at: Utc::now(),
            state: Mutex::new(SessionState::Idle),
            transport: OnceLock::new(),
            responses,
            processing: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            close_reason: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Move to `next` unless the session is already closed.
    fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if *state == SessionState::Closed {
            return false;
        }
        debug!(session_id = %self.session_id, from = ?*state, to = ?next, "Session state change");
        *state = next;
        true
    }

    pub fn transport(&self) -> Option<Arc<dyn LiveTransport>> {
        self.transport.get().cloned()
    }

    pub fn close_reason(&self) -> Option<String> {
        self.close_reason.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Mark the session as running a turn loop. Released when the guard drops.
    pub fn begin_processing(&self) -> Result<ProcessingGuard<'_>, SessionError> {
        if self.processing.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyProcessing(self.session_id.clone()));
        }
        Ok(ProcessingGuard { session: self })
    }

    fn enqueue(&self, message: ServerMessage) {
        // The receiver only goes away once the turn is over.
        if self.responses.send(message).is_err() {
            debug!(session_id = %self.session_id, "Response arrived after the turn ended");
        }
    }

    /// Close the upstream side. Safe to call repeatedly and from any task.
    pub async fn shutdown(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
        self.transition(SessionState::Closed);
        if let Some(transport) = self.transport() {
            transport.close().await;
        }
    }
}

pub struct ProcessingGuard<'a> {
    session: &'a LiveSession,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.session.processing.store(false, Ordering::SeqCst);
    }
}

struct SessionCallbacks {
    session: Arc<LiveSession>,
    emitter: SseEmitter,
}

impl UpstreamHandler for SessionCallbacks {
    fn on_open(&self) {
        if self.session.transition(SessionState::Open) {
            info!(session_id = %self.session.session_id, "Live session open");
            self.emitter.emit(&StreamEvent::Connected);
        }
    }

    fn on_message(&self, message: ServerMessage) {
        self.session.enqueue(message);
    }

    fn on_error(&self, reason: String) {
        warn!(session_id = %self.session.session_id, reason = %reason, "Live session error");
        self.session.transition(SessionState::Closed);
        self.session.enqueue(ServerMessage::ConnectionError { reason });
    }

    fn on_close(&self, reason: Option<String>) {
        info!(
            session_id = %self.session.session_id,
            reason = reason.as_deref().unwrap_or("none"),
            "Live session closed by upstream"
        );
        *self
            .session
            .close_reason
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = reason;
    }
}

/// A freshly opened session and the receiving end of its response queue.
pub struct OpenedSession {
    pub session: Arc<LiveSession>,
    pub responses: mpsc::UnboundedReceiver<ServerMessage>,
}

/// Summary row for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub state: SessionState,
    pub processing: bool,
    pub created_at: DateTime<Utc>,
}

pub struct SessionBroker {
    sessions: RwLock<HashMap<String, Arc<LiveSession>>>,
    connector: Arc<dyn LiveConnector>,
    live: LiveConfig,
}

impl SessionBroker {
    pub fn new(connector: Arc<dyn LiveConnector>, live: LiveConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            connector,
            live,
        }
    }

    /// Open an upstream session for `request` and send the user's turn.
    ///
    /// Any existing session under the same id is torn down first. Events produced
    /// by the upstream callbacks go to `emitter`; content goes to the returned queue.
    pub async fn open(
        &self,
        request: &PendingRequest,
        emitter: SseEmitter,
        max_sessions: usize,
    ) -> Result<OpenedSession, SessionError> {
        let session_id = request.session_id.as_str();
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(LiveSession::new(session_id, tx));

        let replaced = {
            let mut sessions = self.sessions.write().unwrap_or_else(|p| p.into_inner());
            if !sessions.contains_key(session_id) && sessions.len() >= max_sessions {
                return Err(SessionError::CapacityReached(max_sessions));
            }
            sessions.insert(session_id.to_string(), session.clone())
        };
        if let Some(previous) = replaced {
            warn!(session_id, "Replacing existing live session");
            previous.shutdown().await;
        }

        session.transition(SessionState::Connecting);
        let setup = SessionSetup {
            model: self.live.model.clone(),
            voice: self.live.voice.clone(),
            system_instruction: build_system_prompt(request, self.live.max_context_results),
            function_declarations: function_declarations(),
        };
        let handler = Arc::new(SessionCallbacks {
            session: session.clone(),
            emitter,
        });

        let transport = match self.connector.connect(&setup, handler).await {
            Ok(transport) => transport,
            Err(err) => {
                session.transition(SessionState::Closed);
                self.remove_if_current(&session);
                return Err(err);
            }
        };
        let _ = session.transport.set(transport.clone());

        // A teardown that ran while we were connecting saw no transport to close.
        if session.torn_down.load(Ordering::SeqCst) {
            transport.close().await;
            return Err(SessionError::UpstreamStream(
                "session was closed while connecting".to_string(),
            ));
        }

        let content = TurnContent {
            text: request.query.clone(),
            image: request.image.clone(),
        };
        if let Err(err) = transport.send_content(&content).await {
            session.shutdown().await;
            self.remove_if_current(&session);
            return Err(err);
        }
        debug!(session_id, has_image = content.image.is_some(), "Sent user turn");

        Ok(OpenedSession {
            session,
            responses: rx,
        })
    }

    fn remove_if_current(&self, session: &Arc<LiveSession>) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(|p| p.into_inner());
        match sessions.get(&session.session_id) {
            Some(current) if current.token == session.token => {
                sessions.remove(&session.session_id);
                true
            }
            _ => false,
        }
    }

    /// Close and forget the session under `session_id`.
    ///
    /// With `token`, only the session carrying that token is removed, so a
    /// finished bridge cannot tear down a newer session that reused the id.
    pub async fn teardown(&self, session_id: &str, token: Option<Uuid>) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().unwrap_or_else(|p| p.into_inner());
            let matches = match (sessions.get(session_id), token) {
                (Some(current), Some(token)) => current.token == token,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if matches {
                sessions.remove(session_id)
            } else {
                None
            }
        };

        match removed {
            Some(session) => {
                session.shutdown().await;
                info!(session_id, "Live session torn down");
                true
            }
            None => false,
        }
    }

    /// Close every session. Used on server shutdown.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Arc<LiveSession>> = {
            let mut sessions = self.sessions.write().unwrap_or_else(|p| p.into_inner());
            sessions.drain().map(|(_, session)| session).collect()
        };
        for session in &drained {
            session.shutdown().await;
        }
        if !drained.is_empty() {
            info!(closed = drained.len(), "Closed all live sessions");
        }
        drained.len()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().unwrap_or_else(|p| p.into_inner());
        let mut rows: Vec<SessionSummary> = sessions
            .values()
            .map(|s| SessionSummary {
                session_id: s.session_id.clone(),
                state: s.state(),
                processing: s.is_processing(),
                created_at: s.created_at,
            })
            .collect();
        rows.sort_by_key(|row| row.created_at);
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::live::testing::{ScriptStep, ScriptedConnector};
    use crate::models::CreateSessionRequest;
    use std::time::Duration;

    fn request(session_id: &str) -> PendingRequest {
        PendingRequest::from_body(
            session_id,
            CreateSessionRequest {
                query: "cari kopi".into(),
                ..Default::default()
            },
        )
    }

    fn broker(connector: Arc<ScriptedConnector>) -> SessionBroker {
        SessionBroker::new(connector, AppConfig::default().live)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<bytes::Bytes>) -> String {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event timed out")
            .expect("stream closed");
        String::from_utf8(frame.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_open_sends_setup_and_turn() {
        let connector = Arc::new(ScriptedConnector::new(vec![ScriptStep::Open]));
        let broker = broker(connector.clone());
        let (emitter, mut events) = SseEmitter::channel("s1");

        let opened = broker.open(&request("s1"), emitter, 10).await.unwrap();

        assert!(next_event(&mut events).await.contains("\"connected\""));
        assert_eq!(opened.session.state(), SessionState::Open);
        assert_eq!(broker.active_count(), 1);

        let setup = connector.last_setup().unwrap();
        assert!(setup.system_instruction.contains("No businesses matched"));
        assert_eq!(setup.function_declarations.len(), 14);

        let sent = connector.sent_frames();
        assert_eq!(sent[0]["clientContent"]["turns"][0]["parts"][0]["text"], "cari kopi");
    }

    #[tokio::test]
    async fn test_error_callback_queues_without_emitting() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            ScriptStep::Open,
            ScriptStep::Error("quota exceeded".into()),
        ]));
        let broker = broker(connector);
        let (emitter, mut events) = SseEmitter::channel("s1");

        let mut opened = broker.open(&request("s1"), emitter, 10).await.unwrap();

        assert!(next_event(&mut events).await.contains("connected"));
        assert!(events.try_recv().is_err());
        assert_eq!(
            opened.responses.recv().await,
            Some(ServerMessage::ConnectionError {
                reason: "quota exceeded".into()
            })
        );
        assert_eq!(opened.session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_no_session() {
        let connector = Arc::new(ScriptedConnector::failing("unreachable"));
        let broker = broker(connector);
        let (emitter, _events) = SseEmitter::channel("s1");

        let result = broker.open(&request("s1"), emitter, 10).await;

        assert!(matches!(result, Err(SessionError::UpstreamConnect(_))));
        assert_eq!(broker.active_count(), 0);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let connector = Arc::new(ScriptedConnector::new(vec![ScriptStep::Open]));
        let broker = broker(connector);

        let (first, _e1) = SseEmitter::channel("s1");
        broker.open(&request("s1"), first, 1).await.unwrap();

        let (second, _e2) = SseEmitter::channel("s2");
        let result = broker.open(&request("s2"), second, 1).await;
        assert_eq!(result.err(), Some(SessionError::CapacityReached(1)));
    }

    #[tokio::test]
    async fn test_reopen_replaces_previous_session() {
        let connector = Arc::new(ScriptedConnector::new(vec![ScriptStep::Open]));
        let broker = broker(connector.clone());

        let (first, _e1) = SseEmitter::channel("s1");
        let old = broker.open(&request("s1"), first, 10).await.unwrap();
        let (second, _e2) = SseEmitter::channel("s1");
        let new = broker.open(&request("s1"), second, 10).await.unwrap();

        assert_eq!(old.session.state(), SessionState::Closed);
        assert_eq!(broker.active_count(), 1);

        // A stale token cannot remove the newer session.
        assert!(!broker.teardown("s1", Some(old.session.token)).await);
        assert!(broker.teardown("s1", Some(new.session.token)).await);
        assert_eq!(broker.active_count(), 0);
        assert_eq!(connector.closed_count(), 2);
    }

    #[tokio::test]
    async fn test_processing_flag_is_exclusive() {
        let connector = Arc::new(ScriptedConnector::new(vec![ScriptStep::Open]));
        let broker = broker(connector);
        let (emitter, _events) = SseEmitter::channel("s1");
        let opened = broker.open(&request("s1"), emitter, 10).await.unwrap();

        let guard = opened.session.begin_processing().unwrap();
        assert!(matches!(
            opened.session.begin_processing(),
            Err(SessionError::AlreadyProcessing(_))
        ));
        drop(guard);
        assert!(opened.session.begin_processing().is_ok());
    }

    #[tokio::test]
    async fn test_close_callback_records_reason_only() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            ScriptStep::Open,
            ScriptStep::Close(Some("session expired".into())),
        ]));
        let broker = broker(connector);
        let (emitter, _events) = SseEmitter::channel("s1");
        let opened = broker.open(&request("s1"), emitter, 10).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(opened.session.close_reason().as_deref(), Some("session expired"));
        assert_eq!(opened.session.state(), SessionState::Open);
        assert_eq!(broker.active_count(), 1);
    }

    #[tokio::test]
    async fn test_close_all() {
        let connector = Arc::new(ScriptedConnector::new(vec![ScriptStep::Open]));
        let broker = broker(connector.clone());
        for id in ["a", "b"] {
            let (emitter, _events) = SseEmitter::channel(id);
            broker.open(&request(id), emitter, 10).await.unwrap();
        }

        assert_eq!(broker.summaries().len(), 2);
        assert_eq!(broker.close_all().await, 2);
        assert_eq!(broker.active_count(), 0);
        assert_eq!(connector.closed_count(), 2);
    }
}
