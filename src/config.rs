//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - Default values (the `Default` impl below)
//! - An optional `config.toml` next to the binary
//! - Environment variables prefixed with `APP_`, nested keys separated by `__`
//!   (`APP_SESSIONS__PAIRING_TIMEOUT_MS=3000`)
//! - Platform variables `HOST`, `PORT` and `GEMINI_API_KEY`
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Platform variables
//! 2. `APP_` environment variables
//! 3. Configuration file
//! 4. Defaults

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub live: LiveConfig,
    pub sessions: SessionConfig,
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Upstream live AI service settings.
///
/// ## Fields:
/// - `endpoint`: websocket URL of the bidirectional generate-content service
/// - `api_key`: appended as the `key` query parameter when connecting
/// - `model`: model name advertised in the session setup frame
/// - `voice`: prebuilt voice used for spoken responses
/// - `max_context_results`: how many ranked results are written into the system prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub max_context_results: usize,
}

/// Bounded waits and retention for session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a GET waits for its matching POST
    pub pairing_timeout_ms: u64,
    /// How long the turn loop waits for each upstream message
    pub message_timeout_ms: u64,
    /// Age after which an unclaimed pending request is evicted
    pub pending_ttl_secs: u64,
    /// How often the eviction sweep runs
    pub eviction_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            live: LiveConfig {
                endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
                api_key: String::new(),
                model: "gemini-2.0-flash-live-001".to_string(),
                voice: "Puck".to_string(),
                max_context_results: 10,
            },
            sessions: SessionConfig {
                pairing_timeout_ms: 5_000,
                message_timeout_ms: 10_000,
                pending_ttl_secs: 60,
                eviction_interval_secs: 30,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 50,
            },
        }
    }
}

impl SessionConfig {
    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_millis(self.pairing_timeout_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(api_key) = env::var("GEMINI_API_KEY") {
            settings = settings.set_override("live.api_key", api_key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.live.endpoint.is_empty() {
            return Err(anyhow::anyhow!("Live endpoint must be set"));
        }

        if self.sessions.pairing_timeout_ms == 0 || self.sessions.message_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Session timeouts must be greater than 0"));
        }

        if self.sessions.pending_ttl_secs == 0 || self.sessions.eviction_interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "Pending request TTL and eviction interval must be greater than 0"
            ));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!(
                "Max concurrent sessions must be greater than 0"
            ));
        }

        Ok(())
    }

    /// Apply a partial JSON update, e.g. `{"sessions": {"pairing_timeout_ms": 3000}}`.
    ///
    /// Only the fields present are changed; the result is validated before returning.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Port {} is out of range", port))?;
            }
        }

        if let Some(live) = partial_config.get("live") {
            if let Some(model) = live.get("model").and_then(|v| v.as_str()) {
                self.live.model = model.to_string();
            }
            if let Some(voice) = live.get("voice").and_then(|v| v.as_str()) {
                self.live.voice = voice.to_string();
            }
            if let Some(max) = live.get("max_context_results").and_then(|v| v.as_u64()) {
                self.live.max_context_results = max as usize;
            }
        }

        if let Some(sessions) = partial_config.get("sessions") {
            if let Some(ms) = sessions.get("pairing_timeout_ms").and_then(|v| v.as_u64()) {
                self.sessions.pairing_timeout_ms = ms;
            }
            if let Some(ms) = sessions.get("message_timeout_ms").and_then(|v| v.as_u64()) {
                self.sessions.message_timeout_ms = ms;
            }
            if let Some(secs) = sessions.get("pending_ttl_secs").and_then(|v| v.as_u64()) {
                self.sessions.pending_ttl_secs = secs;
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance
                .get("max_concurrent_sessions")
                .and_then(|v| v.as_u64())
            {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
        }

        self.validate()?;
        Ok(())
    }

    /// Copy safe to return from the config endpoint.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.live.api_key.is_empty() {
            copy.live.api_key = "********".to_string();
        }
        copy
    }
}
