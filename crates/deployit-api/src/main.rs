//! DeployIt API Server

use deployit_api::{AppState, routes};
use deployit_config::{ProcessEnv, SystemConfig};
use deployit_core::status::{DeploymentStatusStore, InMemoryStatusStore};
use deployit_core::versions::VersionStore;
use deployit_db::{PgStatusStore, PgVersionStore, create_pool, run_migrations};
use deployit_deployer::InMemoryVersionStore;
use deployit_scheduler::{PollSettingsHandle, VersionRefreshScheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("DEPLOYIT_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config_path = std::env::var_os("DEPLOYIT_CONFIG").map(PathBuf::from);
    let config = SystemConfig::load(config_path.as_deref())?;
    if config.uses_dev_secret_key() {
        warn!("No secret key configured, sensitive variables use the development key");
    }

    let (store, version_store): (Arc<dyn DeploymentStatusStore>, Arc<dyn VersionStore>) =
        match &config.database_url {
            Some(url) => {
                info!("Connecting to database...");
                let pool = create_pool(url).await?;
                run_migrations(&pool).await?;
                info!("Database connected");
                (
                    Arc::new(PgStatusStore::new(pool.clone())),
                    Arc::new(PgVersionStore::new(pool)),
                )
            }
            None => {
                warn!("No database configured, deployment status is kept in memory");
                (
                    Arc::new(InMemoryStatusStore::new()),
                    Arc::new(InMemoryVersionStore::new()),
                )
            }
        };

    let state = AppState::from_config(&config, store, version_store, Arc::new(ProcessEnv))?;
    state.versions.warm_up().await;

    let mut scheduler = VersionRefreshScheduler::new(state.versions.clone(), config.version_refresh);
    scheduler.start();

    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(config_path, state.poll_settings.clone()));

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", config.bind_address);
    let listener = TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    Ok(())
}

/// Re-read the config file on SIGHUP and publish the new poll settings.
#[cfg(unix)]
async fn reload_on_hangup(path: Option<PathBuf>, poll: PollSettingsHandle) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(signal) => signal,
        Err(e) => {
            error!(error = %e, "failed to install SIGHUP handler");
            return;
        }
    };
    while hangup.recv().await.is_some() {
        match SystemConfig::load(path.as_deref()) {
            Ok(config) => {
                info!(interval = ?config.poll.interval, max_wait = ?config.poll.max_wait, "Reloaded poll settings");
                poll.publish(config.poll);
            }
            Err(e) => warn!(error = %e, "Config reload failed, keeping current settings"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
