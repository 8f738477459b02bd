use std::env;
use std::net::SocketAddr;

use attach_gateway::config::Backend;
use attach_gateway::{build_router, AppState, GatewayConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    if env_flag("LOG_JSON") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = GatewayConfig::from_env()?;
    tracing::info!(
        issuer = %config.oidc_issuer,
        engine_url = %config.engine_url,
        cache_backend = ?config.cache_backend,
        queue_backend = ?config.queue_backend,
        "loaded gateway configuration"
    );

    let state = AppState::build(config).await?;
    let worker_shutdown = CancellationToken::new();

    if state.config.queue_backend == Backend::Shared {
        let worker_count = env::var("WORKER_COUNT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(1)
            .max(1);
        for worker_id in 0..worker_count {
            let worker_state = state.clone();
            let worker_shutdown = worker_shutdown.clone();
            tokio::spawn(async move {
                attach_gateway::worker::run(worker_state, worker_id, worker_shutdown).await
            });
        }
        tracing::info!(worker_count, "background worker(s) started");
    }

    let app = build_router(state);

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
    let ip: std::net::IpAddr = host.parse()?;
    let addr = SocketAddr::from((ip, port));

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "attach-gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    worker_shutdown.cancel();
    Ok(())
}

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).unwrap_or_default().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
