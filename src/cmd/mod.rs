//! Command-line interface and server bootstrap.
//!
//! Loads a [`GatewayConfig`], wires the registries, engine, executor,
//! cache store, scheduler and request pipeline together, and serves both
//! transports over one axum [`Router`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use crate::cache::CacheStore;
use crate::config::load_from_path;
use crate::engine::DataFusionEngine;
use crate::errors::Result;
use crate::executor::QueryExecutor;
use crate::pipeline::RequestPipeline;
use crate::registry::{ConnectionRegistry, EndpointRegistry};
use crate::scheduler::RefreshScheduler;
use crate::server::{build_router, AppState};

/// Default bound applied to a single shared/exclusive lock acquisition
/// before a request fails with `EngineBusy` rather than queuing forever.
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(
    name = "sqlgate-gateway",
    version,
    about = "Declarative SQL-to-API gateway: serves REST and MCP endpoints backed by parameterised SQL templates.",
    long_about = "Loads a YAML endpoint/connection configuration, then serves the configured \
REST and MCP endpoints over HTTP, executing each against an embedded analytical engine and, \
where configured, a versioned refresh cache kept warm by a background scheduler."
)]
pub struct Cli {
    /// Path to the YAML gateway configuration file.
    #[arg(long = "config", short = 'c', value_name = "FILE", default_value = "sqlgate.yaml")]
    pub config: String,

    /// Address to bind the HTTP server to.
    #[arg(long = "bind", short = 'b', value_name = "ADDR", default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// Emit logs in JSON format.
    #[arg(long = "log-json")]
    pub log_json: bool,

    /// Set log level (overrides env vars like RUST_LOG).
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

/// Builds every long-lived component and serves the gateway until a
/// shutdown signal (Ctrl+C) arrives, draining the refresh scheduler
/// cooperatively before returning.
pub async fn run_server(cli: &Cli) -> Result<()> {
    info!(config = %cli.config, bind = %cli.bind, "starting sqlgate gateway");

    let config = load_from_path(&cli.config)?;

    let connections = Arc::new(ConnectionRegistry::from_connections(config.connections.clone())?);
    let registry = Arc::new(EndpointRegistry::from_endpoints(config.endpoints.clone())?);

    let engine = Arc::new(DataFusionEngine::new());
    let executor = Arc::new(QueryExecutor::new(engine, DEFAULT_ACQUIRE_TIMEOUT));
    let cache = CacheStore::new(executor.clone());

    let env_whitelist = config.compiled_env_whitelist()?;
    let pipeline = Arc::new(RequestPipeline::new(
        connections.clone(),
        executor.clone(),
        cache.clone(),
        env_whitelist,
    ));

    let scheduler = RefreshScheduler::new(
        &registry,
        &connections,
        &cache,
        config.scheduler_tick,
        config.scheduler_drain_timeout,
    );
    scheduler.spawn();

    let state = AppState {
        registry,
        connections,
        executor,
        cache,
        pipeline,
        scheduler: scheduler.clone(),
        debug_mode: config.debug_mode,
    };
    let app = build_router(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .map_err(|e| crate::errors::GatewayError::ValidationError(format!("invalid bind address '{}': {e}", cli.bind)))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop();
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => tracing::warn!(error = %err, "unable to listen for shutdown signal"),
    }
}
