mod api;
mod auth;
mod bootstrap;
mod health;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use cashpoint_core::config::{AppConfig, LoadOptions};
use cashpoint_core::workflow::engine::WorkflowEngine;
use cashpoint_db::{SqlRefillStore, SqlUserRepository};

use crate::api::ApiState;
use crate::auth::SessionManager;

fn init_logging(config: &AppConfig) {
    use cashpoint_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let state = ApiState {
        engine: Arc::new(WorkflowEngine::new(SqlRefillStore::new(app.db_pool.clone()))),
        users: Arc::new(SqlUserRepository::new(app.db_pool.clone())),
        sessions: SessionManager::new(Duration::from_secs(app.config.auth.session_ttl_secs)),
    };

    let router = api::router(state).merge(health::router(app.db_pool.clone()));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        bind_address = %address,
        "cashpoint-server started"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(event_name = "system.server.stopping", "cashpoint-server stopping");
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
