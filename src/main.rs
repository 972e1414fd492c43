use model_advisor_gateway::async_engine::AsyncEngine;
use model_advisor_gateway::capability_cache::CapabilityCache;
use model_advisor_gateway::concurrency::ConcurrencyLimiter;
use model_advisor_gateway::config::GatewayConfig;
use model_advisor_gateway::providers;
use model_advisor_gateway::registry::ModelRegistry;
use model_advisor_gateway::rpc::RpcServer;
use model_advisor_gateway::store::Store;
use model_advisor_gateway::sync_engine::SyncEngine;
use model_advisor_gateway::tools::ToolRouter;
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "startup failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::from_env();

    let store = Arc::new(Store::open(&config.db_path).await?);
    let registry = Arc::new(ModelRegistry::new(config.bindings.clone()));

    let clients: HashMap<_, _> = config
        .bindings
        .values()
        .map(|binding| (binding.provider, providers::build(binding)))
        .collect();

    let limiter = Arc::new(ConcurrencyLimiter::new());
    let cache = Arc::new(CapabilityCache::new());

    let sync_engine = Arc::new(SyncEngine::new(
        registry.clone(),
        limiter,
        cache,
        clients.clone(),
    ));
    let async_engine = Arc::new(AsyncEngine::new(store.clone(), registry.clone(), clients));

    let router = Arc::new(ToolRouter::new(registry, sync_engine, async_engine));
    let server = RpcServer::new(router);

    tracing::info!(db_path = %config.db_path, "model-advisor-gateway starting");

    tokio::select! {
        result = server.serve_stdio() => {
            if let Err(err) = result {
                tracing::error!(error = %err, "stdio loop ended with an error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    store.close().await;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM (spec §6 "Exit codes"): the store is
/// closed, then the process exits with code 0.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
