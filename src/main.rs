//! # UMKM Live Backend - Server Entry Point
//!
//! Starts the actix-web server that bridges browsers to upstream live AI sessions.
//!
//! ## Startup:
//! 1. Load `.env`, initialise tracing
//! 2. Load and validate configuration
//! 3. Build shared state (registry, broker with the websocket connector)
//! 4. Spawn the pending-request eviction sweep
//! 5. Serve until SIGINT/SIGTERM, then close every live session

use actix_cors::Cors;
use actix_web::{middleware::from_fn, web, App, HttpServer};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use umkm_live_backend::config::AppConfig;
use umkm_live_backend::live::{GeminiLiveConnector, SessionBroker};
use umkm_live_backend::state::AppState;
use umkm_live_backend::{handlers, middleware};

/// Set once a shutdown signal has been received.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{} (model {})",
        config.server.host, config.server.port, config.live.model
    );
    if config.live.api_key.is_empty() {
        warn!("No API key configured (GEMINI_API_KEY); live sessions will fail to connect");
    }

    let connector = Arc::new(GeminiLiveConnector::new(&config.live));
    let broker = SessionBroker::new(connector, config.live.clone());
    let app_state = AppState::new(config.clone(), broker);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    spawn_eviction_sweep(app_state.clone());
    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Middleware executes in reverse order of registration for requests
        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(from_fn(middleware::track_metrics))
            .wrap(from_fn(middleware::log_requests))
            .configure(handlers::configure_routes)
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    let closed = app_state.broker.close_all().await;
    info!(closed_sessions = closed, "Server stopped gracefully");
    Ok(())
}

/// Initialize tracing. `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "umkm_live_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Periodically drop pending requests that were never claimed.
fn spawn_eviction_sweep(state: AppState) {
    tokio::spawn(async move {
        let period = state.get_config().sessions.eviction_interval();
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;

        while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
            ticker.tick().await;
            state.requests.evict_expired();
        }
    });
}

fn setup_signal_handlers() {
    tokio::spawn(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let (mut sigterm, mut sigint) =
                match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                    (Ok(term), Ok(int)) => (term, int),
                    (Err(e), _) | (_, Err(e)) => {
                        error!("Failed to install signal handlers: {}", e);
                        return;
                    }
                };

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C");
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
