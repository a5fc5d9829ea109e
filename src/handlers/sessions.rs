//! # Session Endpoints
//!
//! A live session is opened with two independent HTTP calls:
//!
//! 1. `POST /sessions/{session_id}` parks the query and retrieval context
//! 2. `GET /sessions/{session_id}` opens the event stream and claims it
//!
//! The GET returns its streaming response immediately. A spawned bridge task
//! then pairs it with the POST, opens the upstream session, runs the turn and
//! cleans up. Whatever happens, the bridge ends with both the registry entry
//! and the broker session for that id removed.

use crate::error::{AppError, AppResult, SessionError};
use crate::live::{OpenedSession, TurnProcessor};
use crate::models::{is_valid_session_id, CreateSessionRequest, CreateSessionResponse, PendingRequest};
use crate::sse::{event_stream_response, DisconnectGuard, SseEmitter, StreamEvent};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn checked_session_id(raw: String) -> AppResult<String> {
    if is_valid_session_id(&raw) {
        Ok(raw)
    } else {
        Err(AppError::ValidationError(
            "session id must be 1-128 characters of letters, digits, '-' or '_'".to_string(),
        ))
    }
}

pub async fn create_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<CreateSessionRequest>,
) -> AppResult<HttpResponse> {
    let session_id = checked_session_id(path.into_inner())?;
    let pending = PendingRequest::from_body(&session_id, body.into_inner());

    if pending.query.is_empty() && pending.image.is_none() {
        return Err(AppError::ValidationError(
            "query must not be empty".to_string(),
        ));
    }

    info!(
        session_id = %session_id,
        results = pending.rag_results.len(),
        has_image = pending.image.is_some(),
        has_location = pending.user_location.is_some(),
        "Session request received"
    );
    state.requests.put(pending);

    Ok(HttpResponse::Ok().json(CreateSessionResponse {
        success: true,
        session_id,
        message: "Session request stored; open the event stream to start".to_string(),
    }))
}

pub async fn stream_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let session_id = checked_session_id(path.into_inner())?;
    let (emitter, frames) = SseEmitter::channel(&session_id);
    let cancel = CancellationToken::new();

    tokio::spawn(drive_session(
        state.get_ref().clone(),
        session_id,
        emitter,
        cancel.clone(),
    ));

    Ok(event_stream_response(frames, DisconnectGuard::new(cancel)))
}

/// Pair, open, run one turn and clean up.
async fn drive_session(
    state: AppState,
    session_id: String,
    emitter: SseEmitter,
    cancel: CancellationToken,
) {
    let config = state.get_config();

    let claimed = tokio::select! {
        claimed = state.requests.take(&session_id, config.sessions.pairing_timeout()) => claimed,
        _ = cancel.cancelled() => {
            info!(session_id = %session_id, "Client left before the session was paired");
            state.requests.remove(&session_id);
            state.record_cancelled();
            return;
        }
    };

    let Some(pending) = claimed else {
        warn!(session_id = %session_id, "No session request arrived within the pairing timeout");
        emitter.emit(&StreamEvent::error(SessionError::RequestNotFound(session_id.clone())));
        state.record_unpaired();
        return;
    };

    let opened = state
        .broker
        .open(&pending, emitter.clone(), config.performance.max_concurrent_sessions)
        .await;
    let OpenedSession {
        session,
        mut responses,
    } = match opened {
        Ok(opened) => opened,
        Err(err) => {
            error!(session_id = %session_id, error = %err, "Failed to open live session");
            emitter.emit(&StreamEvent::error(&err));
            state.record_session_failure();
            state.requests.remove(&session_id);
            return;
        }
    };

    let processor = TurnProcessor::new(config.sessions.message_timeout());
    let report = tokio::select! {
        report = processor.run(&session, &mut responses, &emitter) => Some(report),
        _ = cancel.cancelled() => None,
    };

    match report {
        Some(Ok(report)) => {
            if report.outcome.emits_complete() {
                emitter.emit(&StreamEvent::Complete);
            }
            info!(
                session_id = %session_id,
                outcome = ?report.outcome,
                audio_chunks = report.stats.audio_chunks,
                function_calls = report.stats.function_calls,
                "Turn finished"
            );
            state.record_turn(&report);
        }
        Some(Err(err)) => {
            warn!(session_id = %session_id, error = %err, "Turn could not start");
            emitter.emit(&StreamEvent::error(&err));
            state.record_session_failure();
        }
        None => {
            info!(session_id = %session_id, "Client disconnected mid-turn");
            state.record_cancelled();
        }
    }

    state.broker.teardown(&session_id, Some(session.token)).await;
    state.requests.remove(&session_id);
}
