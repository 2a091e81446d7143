mod builder;
mod config;
mod error;
mod handlers;
mod lifecycle;
mod runner;
mod scheduler;
mod stager;
mod state;
mod store;
#[cfg(test)]
mod testing;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("server=debug,tower_http=info,axum=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env();
    for dir in [config.uploads_dir(), config.builds_dir(), config.temp_dir()] {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creando {}", dir.display()))?;
    }

    let port = config.port;
    let environment = config.environment.clone();
    let state = AppState::new(config).await;

    // router HTTP
    let app = handlers::build_router(state.clone());

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("no se pudo escuchar en el puerto {port}"))?;
    info!(
        "apk builder escuchando en {} (entorno: {})",
        listener.local_addr()?,
        environment
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // las limpiezas pendientes se pierden con el proceso
    state.manager.scheduler().shutdown();
    info!("servidor detenido");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("no se pudo escuchar ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("no se pudo escuchar SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl-c recibido, apagando"),
        _ = terminate => info!("SIGTERM recibido, apagando"),
    }
}
