//! Matchmaking node entrypoint.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use cardmesh_match::cli::{self, Cli};
use cardmesh_match::handlers;
use cardmesh_match::server::MatchServer;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(&args.log_level)?;

    let addr = format!("0.0.0.0:{}", args.port);
    let server = Arc::new(MatchServer::new(addr.clone())?);
    for peer in cli::parse_peer_list(&args.peers) {
        server.add_peer(peer);
    }

    let app = handlers::create_router(Arc::clone(&server));
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(addr = %addr, peers = ?server.list_peers(), "match server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
        })
        .await
        .context("server error")?;

    Ok(())
}

fn init_tracing(level: &str) -> Result<()> {
    let level: Level = level.parse().context("invalid log level")?;
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;
    Ok(())
}
