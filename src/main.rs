use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use chairtime::api;
use chairtime::catalog::Catalog;
use chairtime::compactor::run_compactor;
use chairtime::config::Config;
use chairtime::engine::Engine;

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {e}");
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await;
    info!("shutdown signal received, draining requests");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    chairtime::observability::init(config.metrics_port)?;

    let catalog = Arc::new(Catalog::load(config.catalog_path.as_deref())?);
    let opened = chairtime::store::open(&config).await?;
    if let Some(local) = opened.local.clone() {
        tokio::spawn(run_compactor(local, config.compact_threshold));
    }
    let backend = opened.store.backend();

    let engine = Arc::new(Engine::new(catalog, opened.store, config.engine_options()));
    let app = api::router(engine);

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("chairtime listening on {addr}");
    info!("  store: {backend}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  duration policy: {}", config.duration_policy);
    info!("  degraded reads: {}", if config.degraded_reads { "enabled" } else { "disabled" });
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("chairtime stopped");
    Ok(())
}
