//! Access log lines carrying the matched route and, for session routes, the
//! session id.

use actix_web::{
    body::MessageBody,
    dev::{ServiceRequest, ServiceResponse},
    middleware::Next,
    Error,
};
use std::time::Instant;
use tracing::{debug, error, info};

/// Use with `actix_web::middleware::from_fn`.
pub async fn log_requests(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.path().to_string();
    debug!(
        %method,
        %path,
        peer = req.connection_info().realip_remote_addr().unwrap_or("unknown"),
        "Request started"
    );

    let outcome = next.call(req).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match &outcome {
        Ok(res) => {
            // Path parameters are only known once routing has run.
            let routed = res.request();
            let route = routed.match_pattern().unwrap_or_else(|| path.clone());
            info!(
                %method,
                %route,
                session_id = routed.match_info().get("session_id").unwrap_or("-"),
                status = res.status().as_u16(),
                elapsed_ms,
                "Request handled"
            );
        }
        Err(err) => error!(%method, %path, elapsed_ms, error = %err, "Request failed"),
    }

    outcome
}
