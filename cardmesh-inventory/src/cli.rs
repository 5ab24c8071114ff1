//! Command-line arguments for the inventory node.

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use clap::Parser;

use crate::node::{PeerAddr, PeerId};

/// Replicated card-inventory cluster node.
#[derive(Debug, Parser)]
#[command(name = "cardmesh-inventory", version, about)]
pub struct Cli {
    /// Numeric id for this node; the live node with the largest id leads
    #[arg(long, default_value_t = 1)]
    pub id: PeerId,

    /// Public address for this node, used by peers (include scheme and port)
    #[arg(long, default_value = "http://localhost:8001")]
    pub addr: String,

    /// Comma-separated list of peers as id=addr,id=addr
    #[arg(long, default_value = "")]
    pub peers: String,

    /// Maximum log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Parse an `id=addr,id=addr` peer list.
pub fn parse_peer_table(raw: &str) -> Result<HashMap<PeerId, PeerAddr>> {
    let mut peers = HashMap::new();
    for item in raw.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (id, addr) = item
            .split_once('=')
            .ok_or_else(|| anyhow!("bad peer entry: {item}"))?;
        let id = id
            .parse::<PeerId>()
            .with_context(|| format!("bad peer id: {id}"))?;
        peers.insert(id, addr.to_string());
    }
    Ok(peers)
}

/// Listen address for a public address: the URL scheme is stripped.
#[must_use]
pub fn listen_address(addr: &str) -> &str {
    addr.strip_prefix("http://")
        .or_else(|| addr.strip_prefix("https://"))
        .unwrap_or(addr)
}
