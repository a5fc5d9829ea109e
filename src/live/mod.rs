//! # Live Session Bridge
//!
//! Everything between a claimed request and the upstream real-time AI service:
//!
//! - `messages`: wire frames to and from the upstream
//! - `capabilities`: the function declarations the model may call
//! - `prompt`: the system instruction built from retrieval results
//! - `upstream`: the connector/transport seam and the websocket implementation
//! - `broker`: session ownership, state machine and callbacks
//! - `turn`: the loop that turns queued messages into browser events

pub mod broker;
pub mod capabilities;
pub mod messages;
pub mod prompt;
pub mod turn;
pub mod upstream;

#[cfg(test)]
pub mod testing;

pub use broker::{LiveSession, OpenedSession, SessionBroker, SessionState};
pub use messages::{ContentPart, FunctionCall, ServerMessage};
pub use turn::{TurnOutcome, TurnProcessor, TurnReport};
pub use upstream::{GeminiLiveConnector, LiveConnector, LiveTransport, UpstreamHandler};
