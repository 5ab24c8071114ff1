//! Inventory node entrypoint.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

use cardmesh_inventory::api;
use cardmesh_inventory::cli::{self, Cli};
use cardmesh_inventory::node::Node;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(&args.log_level)?;

    let mut peers = cli::parse_peer_table(&args.peers)?;
    peers.insert(args.id, args.addr.clone());

    let node = Arc::new(Node::new(args.id, args.addr.clone(), peers)?);
    node.elect_leader().await;
    if !node.is_leader() {
        if let Err(err) = node.sync_from_leader().await {
            error!(error = %err, "snapshot sync failed; starting with empty state");
        }
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let election = Arc::clone(&node).spawn_election_loop(shutdown_rx);

    let app = api::create_router(Arc::clone(&node));
    let listen = cli::listen_address(&args.addr).to_string();
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;

    let leader = node.leader();
    info!(
        node_id = node.id(),
        addr = %listen,
        leader_id = leader.id,
        leader_addr = %leader.addr,
        "inventory node listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("server error")?;

    let _ = election.await;
    Ok(())
}

fn init_tracing(level: &str) -> Result<()> {
    let level: Level = level.parse().context("invalid log level")?;
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;
    Ok(())
}
