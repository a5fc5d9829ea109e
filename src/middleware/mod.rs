pub mod logging;
pub mod metrics;

pub use logging::log_requests;
pub use metrics::track_metrics;
