//! MT5 Gateway - an HTTP front for the MT5 Web API.
//!
//! The gateway logs in to the MT5 server as a manager, keeps that session
//! alive, and exposes cached lookups and an operation passthrough over a
//! small JSON API.

mod app;
mod auth;
mod error;
mod routes;

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mt5_gateway_core::api::HttpTransport;
use mt5_gateway_core::auth::CredentialStore;
use mt5_gateway_core::{CacheManager, Config, GatewayClient, SessionManager};

use app::AppState;

/// Log file name prefix inside `LOG_DIR`
const LOG_FILE_PREFIX: &str = "mt5-gateway.log";

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g., RUST_LOG=debug). When a log
/// directory is configured a daily-rolling file is written as well; the
/// returned guard must live until exit so buffered lines get flushed.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::load_unvalidated().context("Invalid configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    // Check for CLI commands
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1] == "--store-password" {
        return store_password(&config);
    }

    config.validate().context("Invalid configuration")?;

    info!(
        server = config.server.as_deref().unwrap_or_default(),
        login = config.login.as_deref().unwrap_or_default(),
        "MT5 gateway starting"
    );

    let credentials = config.credentials()?;
    let transport = Arc::new(HttpTransport::new(&credentials.server, config.request_timeout()));
    let session = SessionManager::new(transport, credentials, config.session_options());

    let cache = Arc::new(CacheManager::connect(config.redis_url.as_deref()).await);
    info!(backend = %cache.backend(), "Cache ready");

    let client = GatewayClient::new(session.clone(), cache);

    match client.authenticate().await {
        Ok(_) => info!("Initial MT5 authentication successful"),
        Err(e) => warn!(error = %e, "Initial authentication failed (will retry on first request)"),
    }

    let state = Arc::new(AppState::new(client, config.api_key(), config.test_login.clone()));
    if !state.api_keys.is_configured() {
        warn!("API_KEY not set, API key check disabled");
    }
    let router = app::router(state, &config.cors_origins);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    session.shutdown().await;
    info!("MT5 gateway shutting down");
    Ok(())
}

/// Read the manager password from stdin and save it in the OS keychain,
/// so MT5_PASSWORD can be left unset.
fn store_password(config: &Config) -> Result<()> {
    let login = config.manager_login()?;

    let mut password = String::new();
    io::stdin()
        .read_line(&mut password)
        .context("Failed to read password from stdin")?;
    let password = password.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        anyhow::bail!("Empty password");
    }

    CredentialStore::store(login, password)?;
    info!(login, "Password stored in OS keychain");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix (container stop).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
