//! Per-route request metrics.
//!
//! Routes are keyed by pattern (`GET /sessions/{session_id}`), so every
//! session id lands in the same bucket. For the event stream the recorded
//! duration ends when headers are sent.

use crate::state::AppState;
use actix_web::{
    body::MessageBody,
    dev::{ServiceRequest, ServiceResponse},
    middleware::Next,
    web, Error,
};
use std::time::Instant;

/// Use with `actix_web::middleware::from_fn`.
pub async fn track_metrics(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let started = Instant::now();
    let Some(state) = req.app_data::<web::Data<AppState>>().cloned() else {
        return next.call(req).await;
    };
    state.increment_request_count();

    let method = req.method().clone();
    let path = req.path().to_string();
    let outcome = next.call(req).await;

    let (route, failed) = match &outcome {
        Ok(res) => (
            res.request().match_pattern().unwrap_or(path),
            res.status().is_client_error() || res.status().is_server_error(),
        ),
        Err(_) => (path, true),
    };
    state.record_endpoint_request(
        &format!("{} {}", method, route),
        started.elapsed().as_millis() as u64,
        failed,
    );
    if failed {
        state.increment_error_count();
    }

    outcome
}
