//! Serving core (v1)
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──▶ net::listener ──▶ request id / trace ──▶ http::pipeline ──▶ handler
//!                                                                     │
//!                            /rpc/{*path} ──▶ rpc::proxy ──▶ HTTP/2 pool ──▶ Backend
//! ```

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{any, get};
use axum::Router;
use clap::Parser;

use serving_core::config::load_config;
use serving_core::observability::{logging, metrics};
use serving_core::rpc::{forward::forward, DialOptions, Http2Dialer, RpcProxy};
use serving_core::ServingEngine;

#[derive(Parser)]
#[command(name = "serving-core")]
#[command(about = "HTTP serving engine with admission control and a backend RPC proxy", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short = 'f', long = "config", default_value = "etc/serving-core.toml")]
    config: PathBuf,
}

async fn ping() -> &'static str {
    "pong"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init(&config.observability, config.server.verbose);
    tracing::info!(config = %cli.config.display(), "serving-core v0.1.0 starting");

    if config.observability.metrics_enabled {
        let address: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(address);
    }

    let mut engine = ServingEngine::new(config.server.clone())?.route("/ping", get(ping));

    let proxy = config.backend.as_ref().map(|backend| {
        tracing::info!(
            backend = %backend.target,
            pool_size = backend.pool_size,
            "RPC proxy enabled"
        );
        Arc::new(RpcProxy::new(
            backend.target.clone(),
            Http2Dialer,
            DialOptions::from(backend),
        ))
    });
    if let Some(proxy) = &proxy {
        engine = engine.merge(
            Router::new()
                .route("/rpc/{*path}", any(forward))
                .with_state(Arc::clone(proxy)),
        );
    }

    let engine = Arc::new(engine);
    let mut server = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.start().await }
    });

    let result = tokio::select! {
        result = &mut server => result,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
            tracing::info!("Shutdown signal received");
            engine.stop().await;
            server.await
        }
    };

    if let Some(proxy) = proxy {
        proxy.close();
    }

    result??;
    tracing::info!("Shutdown complete");
    Ok(())
}
