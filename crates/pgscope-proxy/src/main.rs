//! pgscope proxy service
//!
//! Transparent man-in-the-middle proxy for the PostgreSQL v3 wire protocol.
//! Relays bytes between clients and a server unmodified while passively
//! pairing prepared-statement queries with their outcomes, publishing one
//! record per completed query to the configured sink.
//!
//! - PostgreSQL traffic: `--source` (listen) and `--target` (upstream)
//! - Query records: process log or JSON lines file
//! - Prometheus metrics and health: `/metrics`, `/health`

mod config;
mod metrics;
mod pg_wire;
mod proxy;
mod sink;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{routing::get, Router};
use clap::Parser;
use tracing::info;

use pgscope_common::QuerySink;

use crate::config::ProxyConfig;
use crate::proxy::ProxyServer;
use crate::sink::{JsonLineSink, TracingSink};

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum SinkKind {
    /// Emit query records through the process log
    Log,
    /// Append query records as JSON lines to a file
    Jsonl,
}

#[derive(Parser, Debug)]
#[command(name = "pgscope-proxy")]
#[command(about = "Transparent PostgreSQL proxy that records observed queries")]
struct Args {
    /// Address to accept client connections on
    #[arg(long, env = "PGSCOPE_SOURCE")]
    source: String,

    /// Address of the PostgreSQL server to forward to
    #[arg(long, env = "PGSCOPE_TARGET")]
    target: String,

    /// Port for /health and /metrics (0 disables)
    #[arg(long, env = "PGSCOPE_HTTP_PORT", default_value = "8080")]
    http_port: u16,

    /// Where query records go
    #[arg(long, env = "PGSCOPE_SINK", value_enum, default_value = "log")]
    sink: SinkKind,

    /// Output path for the jsonl sink
    #[arg(long, env = "PGSCOPE_SINK_PATH", default_value = "queries.jsonl")]
    sink_path: PathBuf,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    telemetry::init(&args.log_level)?;

    info!("Starting pgscope proxy");
    info!("  Source: {}", args.source);
    info!("  Target: {}", args.target);
    info!("  HTTP port: {}", args.http_port);

    metrics::init_metrics();

    let proxy_config = Arc::new(ProxyConfig::default());
    proxy_config.log_config();

    let query_sink: Arc<dyn QuerySink> = match args.sink {
        SinkKind::Log => Arc::new(TracingSink),
        SinkKind::Jsonl => {
            info!("Writing query records to {}", args.sink_path.display());
            Arc::new(JsonLineSink::create(&args.sink_path)?)
        }
    };

    let server = ProxyServer::new(args.source, args.target, proxy_config, query_sink);
    // Endpoint validation and bind errors fail startup; everything after
    // this point is per-connection and survives individual failures
    let listener = server.bind().await?;

    let proxy_handle = tokio::spawn(async move {
        if let Err(e) = server.serve(listener).await {
            tracing::error!("Proxy server error: {}", e);
        }
    });

    let http_handle = tokio::spawn(http_endpoint(args.http_port));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down pgscope proxy");
        }
        _ = proxy_handle => {}
        _ = http_handle => {}
    }

    Ok(())
}

/// Serve /health and /metrics. A port of 0 disables the endpoint.
async fn http_endpoint(port: u16) {
    if port == 0 {
        std::future::pending::<()>().await;
    }

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/metrics", get(|| async { metrics::render() }));

    let addr = format!("0.0.0.0:{}", port);
    match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => {
            info!("HTTP endpoint listening on {}", addr);
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("HTTP endpoint error: {}", e);
            }
        }
        Err(e) => tracing::error!("Failed to bind HTTP endpoint on {}: {}", addr, e),
    }
}
