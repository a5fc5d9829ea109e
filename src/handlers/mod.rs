pub mod config;
pub mod sessions;

pub use config::*;
pub use sessions::*;

use crate::health;
use actix_web::web;

/// Route table shared by the server binary and the HTTP tests.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/sessions/{session_id}")
            .route(web::post().to(create_session))
            .route(web::get().to(stream_session)),
    )
    .service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/config", web::get().to(get_config))
            .route("/config", web::put().to(update_config)),
    )
    .route("/health", web::get().to(health::health_check));
}
