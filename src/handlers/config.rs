use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Sections read once at startup. Changes to them are stored but only take
/// effect after a restart.
const RESTART_SECTIONS: [&str; 2] = ["server", "live"];

/// Current configuration with the API key masked.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config().redacted();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config
    })))
}

/// Apply a partial update. `sessions` and `performance` apply to sessions
/// opened afterwards; `server` and `live` are listed under `restart_required`.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let restart_required: Vec<&str> = RESTART_SECTIONS
        .into_iter()
        .filter(|section| body.get(*section).is_some())
        .collect();

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&serde_json::to_string(&body)?)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    let message = if restart_required.is_empty() {
        "Configuration updated successfully".to_string()
    } else {
        format!(
            "Configuration updated; changes to {} take effect after a restart",
            restart_required.join(", ")
        )
    };

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": message,
        "restart_required": restart_required,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": current_config.redacted()
    })))
}
