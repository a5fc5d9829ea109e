//! # Session Payload Models
//!
//! Data exchanged between the browser (or the live client), the HTTP layer and
//! the live session bridge. Field names follow the JSON contract of the
//! `/sessions/{session_id}` endpoints (camelCase on the wire).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Caller position reported by the browser's geolocation API.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserLocation {
    pub lat: f64,
    #[serde(alias = "lng")]
    pub lon: f64,
}

/// One entry of the ranked retrieval result set.
///
/// The retrieval service owns this shape; only the fields the bridge and the
/// dispatcher read are typed; everything else is carried through in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagResult {
    pub umkm_id: String,
    pub name: String,
    pub lat: f64,
    #[serde(alias = "lng")]
    pub lon: f64,
    #[serde(default, alias = "score", skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of `POST /sessions/{session_id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag_results: Option<Vec<RagResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_location: Option<UserLocation>,
}

/// Response of `POST /sessions/{session_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub success: bool,
    pub session_id: String,
    pub message: String,
}

/// Caller context parked between the POST and the matching GET.
///
/// ## Lifecycle:
/// Created by the POST handler, consumed exactly once by the GET that opens
/// the event stream, and deleted as it is read.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub session_id: String,
    pub query: String,
    pub image: Option<InlineImage>,
    pub rag_results: Vec<RagResult>,
    pub user_location: Option<UserLocation>,
    pub created_at: DateTime<Utc>,
}

/// Image attached to a query, already split into mime type and base64 payload.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

impl InlineImage {
    /// Accepts either raw base64 or a `data:<mime>;base64,<payload>` URL.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if let Some(rest) = raw.strip_prefix("data:") {
            let (header, data) = rest.split_once(',')?;
            let mime_type = header
                .split(';')
                .next()
                .filter(|m| !m.is_empty())
                .unwrap_or("image/jpeg");
            if data.is_empty() {
                return None;
            }
            return Some(Self {
                mime_type: mime_type.to_string(),
                data: data.to_string(),
            });
        }

        Some(Self {
            mime_type: "image/jpeg".to_string(),
            data: raw.to_string(),
        })
    }
}

impl PendingRequest {
    pub fn from_body(session_id: &str, body: CreateSessionRequest) -> Self {
        Self {
            session_id: session_id.to_string(),
            query: body.query.trim().to_string(),
            image: body.image_base64.as_deref().and_then(InlineImage::parse),
            rag_results: body.rag_results.unwrap_or_default(),
            user_location: body.user_location,
            created_at: Utc::now(),
        }
    }
}

/// Session ids come from the browser and end up in log fields and map keys.
pub fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
