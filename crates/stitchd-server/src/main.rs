use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use stitchd_core::InferenceEngine;
use stitchd_server::{
    backend::{ReferenceEngine, SidecarRasterProvider},
    server::{
        config::{CliArgs, ServerConfig},
        listener::serve_with_shutdown,
        service::handler::ImputeService,
        telemetry::init_telemetry,
    },
};
use tokio::{net::TcpListener, signal};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let mut engine = ReferenceEngine::load(&config.model, &config.weights)
        .context("failed to load the inference engine")?;
    let engine = tokio::task::spawn_blocking(move || engine.warm_up().map(|()| engine))
        .await
        .context("engine warm-up task failed")?
        .context("engine warm-up failed")?;
    tracing::info!(
        model = %config.model.display(),
        shape = ?engine.descriptor(),
        "Inference engine warmed up"
    );

    let listener = TcpListener::bind(config.server_addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind {}: {e}", config.server_addr))
        .with_context(|| format!("failed to bind {}", config.server_addr))?;
    log_startup_info(&config);

    let service = ImputeService::new(&config, engine, Arc::new(SidecarRasterProvider::new()));
    let result = serve_with_shutdown(listener, service, config.thread_count, shutdown_signal()).await;

    match &result {
        Ok(()) => tracing::info!("Service shut down successfully"),
        Err(e) => tracing::error!("Error during service shutdown: {e}"),
    }
    providers.shutdown();

    result.map_err(Into::into)
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting imputation service on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting imputation service on {} ({} geohashes, {} connections, batches of {})",
            config.server_addr,
            config.geohashes.len(),
            config.thread_count,
            config.max_batch_size
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
}
