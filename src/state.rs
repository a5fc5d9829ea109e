//! # Application State Management
//!
//! Shared state handed to every HTTP handler through `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: runtime-updatable configuration (`Arc<RwLock<AppConfig>>`)
//! - **metrics**: request counters and per-turn counters for the live bridge
//! - **requests**: the pending-request registry that pairs POST with GET
//! - **broker**: the owner of every upstream live session
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: every worker thread's `App` holds a clone of the same state
//! - **RwLock**: many concurrent readers, one writer at a time
//!
//! A poisoned lock only means another thread panicked mid-update. Counters
//! and config stay usable, so locks are recovered instead of propagating the panic.

use crate::config::AppConfig;
use crate::live::{SessionBroker, TurnOutcome, TurnReport};
use crate::registry::RequestRegistry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// State shared across all HTTP handlers and bridge tasks.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request and session counters
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Requests parked by POST, waiting for their event stream
    pub requests: Arc<RequestRegistry>,

    /// Live upstream sessions
    pub broker: Arc<SessionBroker>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected since server start.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Detailed metrics per route pattern (e.g. "GET /sessions/{session_id}")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
    pub turns: TurnMetrics,
}

/// Outcome counters for the live bridge.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct TurnMetrics {
    pub completed: u64,
    pub timed_out: u64,
    pub failed: u64,
    /// GET arrived but no POST was found in time
    pub unpaired: u64,
    /// Client went away before the turn ended
    pub cancelled: u64,
    pub text_fragments: u64,
    pub audio_chunks: u64,
    pub function_calls: u64,
}

/// Detailed performance metrics for a specific API endpoint.
///
/// ## Performance calculations:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    /// For streaming endpoints this is the time until headers were sent.
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, broker: SessionBroker) -> Self {
        let requests = RequestRegistry::new(config.sessions.pending_ttl());
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            requests: Arc::new(requests),
            broker: Arc::new(broker),
            start_time: Instant::now(),
        }
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|p| p.into_inner())
    }

    fn metrics_ref(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so a long-running session never
    /// blocks a config update.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap_or_else(|p| p.into_inner()) = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Fold a finished turn into the bridge counters.
    pub fn record_turn(&self, report: &TurnReport) {
        let mut metrics = self.metrics_mut();
        let turns = &mut metrics.turns;
        match report.outcome {
            TurnOutcome::Completed => turns.completed += 1,
            TurnOutcome::TimedOut => turns.timed_out += 1,
            TurnOutcome::Failed(_) => turns.failed += 1,
        }
        turns.text_fragments += report.stats.text_fragments;
        turns.audio_chunks += report.stats.audio_chunks;
        turns.function_calls += report.stats.function_calls;
    }

    pub fn record_unpaired(&self) {
        self.metrics_mut().turns.unpaired += 1;
    }

    /// A session that failed before its turn loop started.
    pub fn record_session_failure(&self) {
        self.metrics_mut().turns.failed += 1;
    }

    pub fn record_cancelled(&self) {
        self.metrics_mut().turns.cancelled += 1;
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_ref().clone()
    }

    pub fn active_sessions(&self) -> usize {
        self.broker.active_count()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate as a fraction (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
