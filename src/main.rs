//! # Repair Desk Assistant - Main Application Entry Point
//!
//! HTTP + WebSocket server for the repair shop's live voice/text assistant.
//! Each browser tab connects to `/ws/assistant`; the server bridges the tab's
//! microphone and speakers to the hosted live speech service and runs the
//! assistant's tools (lead capture, repair booking).
//!
//! ## Application Architecture:
//! - **config**: application configuration (config.toml + environment variables)
//! - **state**: shared state, metrics and the call-slot counter
//! - **ledger**: captured leads and appointments
//! - **health**: health and metrics endpoints
//! - **middleware**: request logging and per-endpoint metrics
//! - **handlers**: REST handlers (config, leads, appointments)
//! - **websocket**: the per-connection session actor
//! - **session**: call state machine, transcript, tools, setup prompt
//! - **audio**: PCM codec, capture framing, playback scheduling
//! - **device**: audio device abstractions and the browser bridge
//! - **live**: wire protocol and client for the live speech service
//! - **error**: HTTP and session error types

mod audio;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod ledger;
mod live;
mod middleware;
mod session;
mod state;
mod websocket;

use crate::config::AppConfig;
use crate::state::AppState;
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        business = %config.business.name,
        model = %config.live.model,
        voice = %config.live.voice,
        max_calls = config.performance.max_concurrent_sessions,
        "Assistant configured"
    );
    if config.live.api_key.is_empty() {
        warn!("No live service API key configured; callers will be offered the phone number instead");
    }

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Middleware runs in reverse registration order on the way in
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/leads", web::get().to(handlers::list_leads))
                    .route("/leads/{id}", web::get().to(handlers::get_lead))
                    .route("/appointments", web::get().to(handlers::list_appointments))
                    .route("/appointments/{id}", web::get().to(handlers::get_appointment)),
            )
            .route("/ws/assistant", web::get().to(websocket::assistant_websocket))
            .route("/health", web::get().to(health::health_check))
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
            // Stopping the workers drops every session actor, which tears down its call
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Logging from `RUST_LOG`, defaulting to debug for this crate.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "repair_desk_assistant=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Flip [`SHUTDOWN_SIGNAL`] on SIGTERM or SIGINT.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                return;
            }
        };
        let mut sigint = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()) {
            Ok(signal) => signal,
            Err(e) => {
                error!("Failed to install SIGINT handler: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
