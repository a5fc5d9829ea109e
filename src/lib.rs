//! # UMKM Live Backend
//!
//! Bridges a browser to a real-time multimodal AI session. The browser POSTs a
//! query with ranked local-business results, then opens a server-sent event
//! stream; the server opens an upstream live session, streams audio, text and
//! function calls back, and cleans up when the turn ends.
//!
//! ## Server side:
//! - **config / error / state / health / middleware**: service plumbing
//! - **models / registry**: request payloads and the POST-to-GET pairing store
//! - **live**: upstream session broker and turn processing
//! - **sse**: the browser event stream
//! - **handlers**: HTTP routes
//!
//! ## Consumer side:
//! - **audio**: PCM decoding and gapless playback scheduling
//! - **dispatch**: function calls to map actions
//! - **client**: HTTP/SSE client used by the `live-client` binary

pub mod audio;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod health;
pub mod live;
pub mod middleware;
pub mod models;
pub mod registry;
pub mod sse;
pub mod state;
