//! Cluster node state: leadership, replication and snapshot sync.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use rand::rngs::OsRng;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cardmesh_core::deck::{Card, DeckStore, SnapshotPayload, TradeLedger, TradeProposal};

pub type PeerId = u64;
pub type PeerAddr = String;

/// Cadence of the background leader-election loop.
pub const ELECTION_INTERVAL: Duration = Duration::from_secs(3);

/// Cards minted into an exhausted global deck before a claim retries.
pub const REGEN_BATCH: usize = 20;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Operation replicated from the leader to every follower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicateOp {
    Add,
    Remove,
}

/// Leader-applied mutation fanned out to followers. `user` is absent for
/// the global deck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicateRequest {
    pub op: ReplicateOp,
    pub card: Card,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ReplicateRequest {
    #[must_use]
    pub fn add(card: Card, user: Option<String>) -> Self {
        Self {
            op: ReplicateOp::Add,
            card,
            user,
        }
    }

    #[must_use]
    pub fn remove(card_id: i64, user: Option<String>) -> Self {
        Self {
            op: ReplicateOp::Remove,
            card: Card {
                id: card_id,
                name: String::new(),
            },
            user,
        }
    }
}

/// This node's current belief about the leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderView {
    pub id: PeerId,
    pub addr: PeerAddr,
}

/// `GET /status` body; doubles as the election liveness probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub node_id: PeerId,
    pub node_addr: PeerAddr,
    pub leader_id: PeerId,
    pub leader_addr: PeerAddr,
}

/// Accepting a trade proposal failed before any mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcceptError {
    #[error("trade not found")]
    NotFound,
    #[error("only the counterparty can accept the trade")]
    Forbidden,
}

/// One inventory-cluster node.
///
/// The peer table is immutable after boot; the leader view is refreshed by
/// the election loop and by forwarding failures. The deck store handle is
/// swapped wholesale when a snapshot is ingested.
pub struct Node {
    id: PeerId,
    addr: PeerAddr,
    peers: HashMap<PeerId, PeerAddr>,
    leader: RwLock<LeaderView>,
    store: RwLock<Arc<DeckStore>>,
    trades: Mutex<TradeLedger>,
    client: reqwest::Client,
}

impl Node {
    /// Build a node. `peers` must contain the node's own entry. Until the
    /// first election runs, the node believes itself leader.
    pub fn new(id: PeerId, addr: impl Into<PeerAddr>, peers: HashMap<PeerId, PeerAddr>) -> Result<Self> {
        let addr = addr.into();
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            id,
            leader: RwLock::new(LeaderView {
                id,
                addr: addr.clone(),
            }),
            addr,
            peers,
            store: RwLock::new(Arc::new(DeckStore::new())),
            trades: Mutex::new(TradeLedger::new()),
            client,
        })
    }

    #[must_use]
    pub fn id(&self) -> PeerId {
        self.id
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.leader.read().id == self.id
    }

    #[must_use]
    pub fn leader(&self) -> LeaderView {
        self.leader.read().clone()
    }

    /// Current deck store handle. Holders keep reading a pre-snapshot store
    /// until they re-fetch; that staleness window is accepted.
    #[must_use]
    pub fn store(&self) -> Arc<DeckStore> {
        Arc::clone(&self.store.read())
    }

    #[must_use]
    pub fn status(&self) -> StatusReport {
        let leader = self.leader();
        StatusReport {
            node_id: self.id,
            node_addr: self.addr.clone(),
            leader_id: leader.id,
            leader_addr: leader.addr,
        }
    }

    /// Re-run the bully election: probe every peer, keep the largest live
    /// id. Self is always considered live, so the fallback never fires in
    /// practice.
    pub async fn elect_leader(&self) {
        let mut live = Vec::with_capacity(self.peers.len());
        for (peer_id, peer_addr) in &self.peers {
            if *peer_id == self.id || self.probe(peer_addr).await {
                live.push((*peer_id, peer_addr.clone()));
            }
        }

        let view = highest_live(&live).unwrap_or_else(|| LeaderView {
            id: self.id,
            addr: self.addr.clone(),
        });

        let mut leader = self.leader.write();
        if *leader != view {
            info!(
                node_id = self.id,
                leader_id = view.id,
                leader_addr = %view.addr,
                "leader view updated"
            );
        }
        *leader = view;
    }

    async fn probe(&self, addr: &str) -> bool {
        let url = format!("{}/status", addr.trim_end_matches('/'));
        match self.client.get(&url).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(_) => false,
        }
    }

    /// Run [`Self::elect_leader`] every [`ELECTION_INTERVAL`] until the
    /// shutdown channel fires or its sender is dropped.
    #[must_use]
    pub fn spawn_election_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let node = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ELECTION_INTERVAL);
            // The boot path already elected; skip the immediate tick.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        debug!(node_id = node.id, "election loop stopping");
                        break;
                    }
                    _ = ticker.tick() => node.elect_leader().await,
                }
            }
        })
    }

    /// Fire-and-forget fan-out of one mutation to every other peer.
    /// Failures are logged and swallowed; followers reconcile via snapshot.
    pub fn replicate_to_followers(&self, request: &ReplicateRequest) {
        for (peer_id, peer_addr) in &self.peers {
            if *peer_id == self.id {
                continue;
            }
            let url = format!("{}/replicate", peer_addr.trim_end_matches('/'));
            let client = self.client.clone();
            let body = request.clone();
            let peer = *peer_id;
            tokio::spawn(async move {
                match client.post(&url).json(&body).send().await {
                    Ok(response) if !response.status().is_success() => {
                        warn!(peer, status = %response.status(), "replicate rejected");
                    }
                    Ok(_) => {}
                    Err(err) => warn!(peer, error = %err, "replicate failed"),
                }
            });
        }
    }

    /// Apply a replicated operation with no checks: add overwrites by id,
    /// remove tolerates absent ids.
    pub fn apply_replicate(&self, request: &ReplicateRequest) {
        let store = self.store();
        let user = request.user.as_deref().unwrap_or("");
        match request.op {
            ReplicateOp::Add => store.add(user, request.card.clone()),
            ReplicateOp::Remove => store.remove(user, request.card.id),
        }
    }

    /// Full state dump for `GET /snapshot`.
    #[must_use]
    pub fn snapshot(&self) -> SnapshotPayload {
        let (global, users) = self.store().export();
        let (trades, next_trade_id) = self.trades.lock().export();
        SnapshotPayload {
            global,
            users,
            trades,
            next_trade_id,
        }
    }

    /// Replace local state with a leader snapshot.
    pub fn install_snapshot(&self, snapshot: SnapshotPayload) {
        let store = DeckStore::from_snapshot(&snapshot.global, &snapshot.users);
        *self.store.write() = Arc::new(store);
        self.trades
            .lock()
            .restore(snapshot.trades, snapshot.next_trade_id);
    }

    /// Pull the believed leader's snapshot and swap it in. A failure leaves
    /// local state untouched; drift is reconciled on the next restart.
    pub async fn sync_from_leader(&self) -> Result<()> {
        let leader = self.leader();
        if leader.id == self.id || leader.addr.is_empty() {
            return Ok(());
        }

        let url = format!("{}/snapshot", leader.addr.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to fetch snapshot from leader {}", leader.addr))?;
        if response.status() != StatusCode::OK {
            bail!("leader {} returned {}", leader.addr, response.status());
        }
        let snapshot: SnapshotPayload = response
            .json()
            .await
            .with_context(|| format!("undecodable snapshot from leader {}", leader.addr))?;

        info!(
            leader_addr = %leader.addr,
            global = snapshot.global.len(),
            users = snapshot.users.len(),
            trades = snapshot.trades.len(),
            "synced state from leader"
        );
        self.install_snapshot(snapshot);
        Ok(())
    }

    /// Mint `count` random cards into the global deck, replicating each.
    /// Ids are drawn from the positive 63-bit space.
    pub fn regen_global_deck(&self, count: usize) {
        if !self.is_leader() {
            warn!(node_id = self.id, "regen requested on non-leader; skipping");
            return;
        }
        let store = self.store();
        for _ in 0..count {
            let id = OsRng.gen_range(1..=i64::MAX);
            let card = Card {
                id,
                name: format!("Card-{id}"),
            };
            store.add("", card.clone());
            self.replicate_to_followers(&ReplicateRequest::add(card, None));
        }
        debug!(count, "regenerated global deck");
    }

    /// Stage a trade proposal and return its id.
    pub fn propose_trade(&self, proposal: TradeProposal) -> u64 {
        self.trades.lock().propose(proposal)
    }

    /// Resolve an accept attempt against the ledger.
    ///
    /// An unknown id or a wrong counterparty leaves the ledger untouched;
    /// otherwise the proposal is removed so a second accept sees not-found.
    pub fn claim_proposal(&self, id: u64, acceptor: &str) -> Result<TradeProposal, AcceptError> {
        let mut ledger = self.trades.lock();
        match ledger.get(id) {
            None => return Err(AcceptError::NotFound),
            Some(proposal) if proposal.user_b != acceptor => return Err(AcceptError::Forbidden),
            Some(_) => {}
        }
        Ok(ledger.take(id).expect("proposal present under lock"))
    }
}

/// Largest-id member of the live set, if any.
#[must_use]
pub fn highest_live(live: &[(PeerId, PeerAddr)]) -> Option<LeaderView> {
    live.iter()
        .max_by_key(|(id, _)| *id)
        .map(|(id, addr)| LeaderView {
            id: *id,
            addr: addr.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_with_peers(id: PeerId, peers: &[(PeerId, &str)]) -> Node {
        let table = peers
            .iter()
            .map(|(peer_id, addr)| (*peer_id, (*addr).to_string()))
            .collect();
        Node::new(id, format!("http://node{id}"), table).expect("node")
    }

    #[test]
    fn highest_live_picks_the_largest_id() {
        let live = vec![
            (1, "http://a".to_string()),
            (3, "http://c".to_string()),
            (2, "http://b".to_string()),
        ];
        let view = highest_live(&live).expect("non-empty");
        assert_eq!(view.id, 3);
        assert_eq!(view.addr, "http://c");
    }

    #[test]
    fn highest_live_of_empty_set_is_none() {
        assert!(highest_live(&[]).is_none());
    }

    #[test]
    fn fresh_node_believes_itself_leader() {
        let node = node_with_peers(2, &[(2, "http://node2")]);
        assert!(node.is_leader());
        let status = node.status();
        assert_eq!(status.leader_id, 2);
        assert_eq!(status.node_id, 2);
    }

    #[tokio::test]
    async fn lone_node_elects_itself() {
        let node = node_with_peers(1, &[(1, "http://node1")]);
        node.elect_leader().await;
        assert!(node.is_leader());
    }

    #[tokio::test]
    async fn unreachable_higher_peer_is_skipped() {
        // Peer 9 does not exist; the 5s probe fails fast on refused connections.
        let node = node_with_peers(1, &[(1, "http://node1"), (9, "http://127.0.0.1:1")]);
        node.elect_leader().await;
        assert_eq!(node.leader().id, 1);
    }

    #[test]
    fn claim_proposal_enforces_counterparty_and_single_use() {
        let node = node_with_peers(1, &[(1, "http://node1")]);
        let id = node.propose_trade(TradeProposal {
            user_a: "john".to_string(),
            user_b: "doe".to_string(),
            a_card_id: 1,
            b_card_id: 2,
        });

        assert_eq!(node.claim_proposal(id, "john"), Err(AcceptError::Forbidden));
        // A rejected acceptor does not consume the proposal.
        assert!(node.claim_proposal(id, "doe").is_ok());
        assert_eq!(node.claim_proposal(id, "doe"), Err(AcceptError::NotFound));
        assert_eq!(node.claim_proposal(99, "doe"), Err(AcceptError::NotFound));
    }

    #[test]
    fn replicate_request_wire_format() {
        let add = ReplicateRequest::add(
            Card {
                id: 7,
                name: "Seven".to_string(),
            },
            Some("alice".to_string()),
        );
        let json = serde_json::to_value(&add).expect("serialize");
        assert_eq!(json["op"], "add");
        assert_eq!(json["user"], "alice");

        let remove = ReplicateRequest::remove(7, None);
        let json = serde_json::to_value(&remove).expect("serialize");
        assert_eq!(json["op"], "remove");
        assert!(json.get("user").is_none());
    }

    #[test]
    fn apply_replicate_is_unchecked() {
        let node = node_with_peers(1, &[(1, "http://node1")]);
        let card = Card {
            id: 4,
            name: "Four".to_string(),
        };
        // Remove-before-add on the same id is tolerated.
        node.apply_replicate(&ReplicateRequest::remove(4, None));
        node.apply_replicate(&ReplicateRequest::add(card.clone(), None));
        assert_eq!(node.store().list(""), vec![card]);
    }

    #[test]
    fn install_snapshot_replaces_all_state() {
        let node = node_with_peers(1, &[(1, "http://node1")]);
        node.store().add(
            "",
            Card {
                id: 1,
                name: "Old".to_string(),
            },
        );
        node.propose_trade(TradeProposal {
            user_a: "x".to_string(),
            user_b: "y".to_string(),
            a_card_id: 1,
            b_card_id: 2,
        });

        let snapshot = SnapshotPayload {
            global: vec![Card {
                id: 42,
                name: "New".to_string(),
            }],
            next_trade_id: 10,
            ..Default::default()
        };
        node.install_snapshot(snapshot);

        let global = node.store().list("");
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].id, 42);
        // The id counter continues from the snapshot.
        let next = node.propose_trade(TradeProposal {
            user_a: "a".to_string(),
            user_b: "b".to_string(),
            a_card_id: 1,
            b_card_id: 2,
        });
        assert_eq!(next, 11);
    }

    #[test]
    fn regen_fills_the_global_deck() {
        let node = node_with_peers(1, &[(1, "http://node1")]);
        node.regen_global_deck(REGEN_BATCH);
        assert_eq!(node.store().list("").len(), REGEN_BATCH);
    }
}
