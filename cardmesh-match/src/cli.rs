//! Command-line arguments for the matchmaking node.

use clap::Parser;

/// Peer-to-peer 1v1 matchmaking node.
#[derive(Debug, Parser)]
#[command(name = "cardmesh-match", version, about)]
pub struct Cli {
    /// Server listen port
    #[arg(long, default_value_t = 8081)]
    pub port: u16,

    /// Comma-separated peer host:port list
    #[arg(long, default_value = "")]
    pub peers: String,

    /// Maximum log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Split a comma-separated peer list, dropping empty entries.
#[must_use]
pub fn parse_peer_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|peer| !peer.is_empty())
        .map(String::from)
        .collect()
}
