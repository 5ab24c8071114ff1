//! Shared matchmaking state for one node.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::warn;

use cardmesh_core::matching::{Match, PlayerInfo, WaitingPlayer};

use crate::push::{PushChannel, ServerFrame};

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// One matchmaking node: its advertised address, the connected players'
/// push channels, the FIFO waiting queue and the peer list. All three
/// collections share a single mutex, so a queue slot can never be consumed
/// twice by a racing play and find-waiter.
pub struct MatchServer {
    addr: String,
    state: Mutex<SharedState>,
    client: reqwest::Client,
}

#[derive(Default)]
struct SharedState {
    players: HashMap<String, Arc<PushChannel>>,
    waiting: VecDeque<WaitingPlayer>,
    peers: Vec<String>,
}

impl MatchServer {
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            addr: addr.into(),
            state: Mutex::new(SharedState::default()),
            client,
        })
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Append a peer address unless already present. No deletion.
    pub fn add_peer(&self, peer: impl Into<String>) {
        let peer = peer.into();
        let mut state = self.state.lock();
        if !state.peers.contains(&peer) {
            state.peers.push(peer);
        }
    }

    #[must_use]
    pub fn list_peers(&self) -> Vec<String> {
        self.state.lock().peers.clone()
    }

    /// Register a player's push channel, evicting any prior entry.
    pub fn link_player(&self, player: &str, channel: Arc<PushChannel>) {
        self.state.lock().players.insert(player.to_string(), channel);
    }

    /// Deregister a push channel, but only if the entry still belongs to
    /// `conn` — a replaced channel's reader exiting must not evict its
    /// successor.
    pub fn unlink_player(&self, player: &str, conn: u64) {
        let mut state = self.state.lock();
        if state
            .players
            .get(player)
            .is_some_and(|channel| channel.conn() == conn)
        {
            state.players.remove(player);
        }
    }

    #[must_use]
    pub fn channel(&self, player: &str) -> Option<Arc<PushChannel>> {
        self.state.lock().players.get(player).cloned()
    }

    #[must_use]
    pub fn is_waiting(&self, player: &str) -> bool {
        self.state
            .lock()
            .waiting
            .iter()
            .any(|waiter| waiter.player_id == player)
    }

    /// Pair the challenger against the queue head, if any.
    pub fn try_local_match(&self, challenger: WaitingPlayer) -> Option<Match> {
        let waiter = self.state.lock().waiting.pop_front()?;
        Some(Match::resolve(
            self.local_player(waiter),
            self.local_player(challenger),
        ))
    }

    pub fn enqueue_waiter(&self, waiter: WaitingPlayer) {
        self.state.lock().waiting.push_back(waiter);
    }

    pub fn pop_waiter(&self) -> Option<WaitingPlayer> {
        self.state.lock().waiting.pop_front()
    }

    /// Player info for someone connected to this node.
    #[must_use]
    pub fn local_player(&self, waiter: WaitingPlayer) -> PlayerInfo {
        PlayerInfo {
            id: waiter.player_id,
            server: self.addr.clone(),
            cards: waiter.cards,
        }
    }

    /// Push a frame to a locally connected player. Missing channels and
    /// dead sockets drop the frame after a logged warning.
    pub async fn notify_local(&self, player: &str, frame: &ServerFrame) {
        let Some(channel) = self.channel(player) else {
            warn!(player, "no push channel for player");
            return;
        };
        if let Err(err) = channel.send_json(frame).await {
            warn!(player, error = %err, "dropping push frame");
        }
    }
}
