//! In-process stand-in for the upstream service, used by unit tests.
//!
//! A [`ScriptedConnector`] replays a fixed list of callbacks for every
//! session it opens. Steps up to the first `Delay` run before `connect`
//! returns; the rest run on a spawned task.

use crate::error::SessionError;
use crate::live::messages::{tool_response_frame, FunctionResponse, ServerMessage, SessionSetup, TurnContent};
use crate::live::upstream::{dispatch_frame, LiveConnector, LiveTransport, UpstreamHandler};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Open,
    Message(ServerMessage),
    /// A raw upstream frame, routed through the frame parser.
    Frame(String),
    Error(String),
    Close(Option<String>),
    Delay(Duration),
}

#[derive(Default)]
struct Recorded {
    setups: Vec<SessionSetup>,
    sent: Vec<Value>,
    closed: usize,
}

pub struct ScriptedConnector {
    script: Vec<ScriptStep>,
    fail_with: Option<String>,
    recorded: Arc<Mutex<Recorded>>,
}

impl ScriptedConnector {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script,
            fail_with: None,
            recorded: Arc::default(),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            fail_with: Some(reason.to_string()),
            ..Self::new(vec![])
        }
    }

    pub fn last_setup(&self) -> Option<SessionSetup> {
        self.recorded.lock().unwrap().setups.last().cloned()
    }

    pub fn sent_frames(&self) -> Vec<Value> {
        self.recorded.lock().unwrap().sent.clone()
    }

    pub fn closed_count(&self) -> usize {
        self.recorded.lock().unwrap().closed
    }
}

fn play(step: ScriptStep, handler: &dyn UpstreamHandler) {
    match step {
        ScriptStep::Open => handler.on_open(),
        ScriptStep::Message(message) => handler.on_message(message),
        ScriptStep::Frame(text) => dispatch_frame(&text, handler),
        ScriptStep::Error(reason) => handler.on_error(reason),
        ScriptStep::Close(reason) => handler.on_close(reason),
        ScriptStep::Delay(_) => {}
    }
}

#[async_trait]
impl LiveConnector for ScriptedConnector {
    async fn connect(
        &self,
        setup: &SessionSetup,
        handler: Arc<dyn UpstreamHandler>,
    ) -> Result<Arc<dyn LiveTransport>, SessionError> {
        self.recorded.lock().unwrap().setups.push(setup.clone());
        if let Some(reason) = &self.fail_with {
            return Err(SessionError::UpstreamConnect(reason.clone()));
        }

        let split = self
            .script
            .iter()
            .position(|step| matches!(step, ScriptStep::Delay(_)))
            .unwrap_or(self.script.len());
        for step in self.script[..split].iter().cloned() {
            play(step, handler.as_ref());
        }

        let rest: Vec<ScriptStep> = self.script[split..].to_vec();
        let task = (!rest.is_empty()).then(|| {
            tokio::spawn(async move {
                for step in rest {
                    if let ScriptStep::Delay(duration) = step {
                        tokio::time::sleep(duration).await;
                    } else {
                        play(step, handler.as_ref());
                    }
                }
            })
        });

        Ok(Arc::new(ScriptedTransport {
            recorded: self.recorded.clone(),
            closed: AtomicBool::new(false),
            task,
        }))
    }
}

struct ScriptedTransport {
    recorded: Arc<Mutex<Recorded>>,
    closed: AtomicBool,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl LiveTransport for ScriptedTransport {
    async fn send_content(&self, content: &TurnContent) -> Result<(), SessionError> {
        self.recorded.lock().unwrap().sent.push(content.to_frame());
        Ok(())
    }

    async fn send_tool_response(&self, responses: &[FunctionResponse]) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::UpstreamStream("session already closed".into()));
        }
        self.recorded
            .lock()
            .unwrap()
            .sent
            .push(tool_response_frame(responses));
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.recorded.lock().unwrap().closed += 1;
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}
