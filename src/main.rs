use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::{cors::CorsLayer, trace::TraceLayer};

use tutor_backend_rust::cache::RedisCache;
use tutor_backend_rust::config::Config;
use tutor_backend_rust::db;
use tutor_backend_rust::routes;
use tutor_backend_rust::state::AppState;
use tutor_backend_rust::workers::WorkerManager;
use tutor_backend_rust::{build_engine, logging};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config.log_level);

    let db_proxy = match db::DatabaseProxy::from_env().await {
        Ok(proxy) => {
            if let Err(err) = db::migrate::run_migrations(proxy.pool()).await {
                tracing::error!(error = %err, "migration failed, continuing with existing schema");
            }
            Some(proxy)
        }
        Err(err) => {
            tracing::warn!(error = %err, "database proxy not initialized, running in-memory only");
            None
        }
    };

    let cache = match std::env::var("REDIS_URL") {
        Ok(url) if !url.trim().is_empty() => match RedisCache::connect(&url).await {
            Ok(cache) => Some(Arc::new(cache)),
            Err(err) => {
                tracing::warn!(error = %err, "redis cache not initialized");
                None
            }
        },
        _ => None,
    };

    let engine = build_engine(db_proxy.clone());
    if let Err(err) = engine.reload_config().await {
        tracing::warn!(error = %err, "engine config reload failed, using env defaults");
    }

    let worker_manager = if let Some(ref proxy) = db_proxy {
        match WorkerManager::new(Arc::clone(proxy), Arc::clone(&engine)).await {
            Ok(manager) => {
                if let Err(e) = manager.start().await {
                    tracing::error!(error = %e, "failed to start workers");
                }
                Some(manager)
            }
            Err(e) => {
                tracing::warn!(error = %e, "worker manager not initialized");
                None
            }
        }
    } else {
        None
    };

    let state = AppState::new(db_proxy, engine, cache);

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.bind_addr();
    tracing::info!(%addr, environment = %config.environment, "tutor-backend-rust listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind listener failed");

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal());

    if let Err(e) = server.await {
        tracing::error!(error = %e, "server error");
    }

    tracing::info!("HTTP server stopped, initiating graceful shutdown sequence");

    if let Some(ref manager) = worker_manager {
        manager.stop().await;
    }

    tracing::info!("Graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
