//! Card decks and the replicated deck store.
//!
//! A [`DeckStore`] owns one global deck plus per-user decks created lazily on
//! first reference; the empty user name addresses the global deck. All state
//! is in-memory and guarded by fine-grained locks: one `RwLock` per deck's
//! card map, one over the user-deck table. A follower ingesting a snapshot
//! replaces its store wholesale, so stores are cheap to rebuild from a
//! [`SnapshotPayload`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A collectible card. Identifier uniqueness is scoped to the containing
/// deck; nothing enforces global uniqueness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: i64,
    pub name: String,
}

/// An unordered id-keyed card collection.
#[derive(Debug, Default)]
pub struct Deck {
    cards: RwLock<HashMap<i64, Card>>,
}

impl Deck {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a card, overwriting any existing card with the same id.
    pub fn add(&self, card: Card) {
        self.cards.write().insert(card.id, card);
    }

    /// Remove a card by id. Absent ids are a no-op.
    pub fn remove(&self, id: i64) {
        self.cards.write().remove(&id);
    }

    #[must_use]
    pub fn get(&self, id: i64) -> Option<Card> {
        self.cards.read().get(&id).cloned()
    }

    /// Unordered snapshot of the deck contents.
    #[must_use]
    pub fn list(&self) -> Vec<Card> {
        self.cards.read().values().cloned().collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cards.read().is_empty()
    }
}

/// A card referenced by a trade is gone from the owner's deck.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("card {card} not found in deck of user {user:?}")]
pub struct MissingCard {
    pub user: String,
    pub card: i64,
}

/// The global deck plus every per-user deck.
#[derive(Debug, Default)]
pub struct DeckStore {
    global: Arc<Deck>,
    users: RwLock<HashMap<String, Arc<Deck>>>,
}

impl DeckStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deck for `user`; the empty string resolves to the global deck.
    /// Per-user decks are created on first reference.
    pub fn resolve(&self, user: &str) -> Arc<Deck> {
        if user.is_empty() {
            return Arc::clone(&self.global);
        }
        if let Some(deck) = self.users.read().get(user) {
            return Arc::clone(deck);
        }
        let mut users = self.users.write();
        Arc::clone(users.entry(user.to_string()).or_default())
    }

    pub fn add(&self, user: &str, card: Card) {
        self.resolve(user).add(card);
    }

    pub fn remove(&self, user: &str, id: i64) {
        self.resolve(user).remove(id);
    }

    #[must_use]
    pub fn list(&self, user: &str) -> Vec<Card> {
        self.resolve(user).list()
    }

    /// Transfer one card from the global deck into `user`'s deck.
    ///
    /// The card is chosen as the last entry of the global listing (the map
    /// is unordered, so "last" is arbitrary but stable for one lock hold).
    /// Removal and hand-over happen without an intervening suspension point,
    /// so no observer sees the card missing from both decks.
    pub fn claim_last(&self, user: &str) -> Option<Card> {
        let card = {
            let mut cards = self.global.cards.write();
            let id = *cards.keys().last()?;
            cards.remove(&id)?
        };
        self.resolve(user).add(card.clone());
        Some(card)
    }

    /// Atomically swap `a_card_id` (owned by `user_a`) with `b_card_id`
    /// (owned by `user_b`).
    ///
    /// Validation and all four mutations run under both decks' write locks,
    /// taken in lexicographic user order so concurrent swaps cannot
    /// deadlock. Returns the swapped cards as `(a_card, b_card)`.
    pub fn swap_cards(
        &self,
        user_a: &str,
        a_card_id: i64,
        user_b: &str,
        b_card_id: i64,
    ) -> Result<(Card, Card), MissingCard> {
        let deck_a = self.resolve(user_a);
        let deck_b = self.resolve(user_b);

        if user_a == user_b {
            // Same deck: both cards must exist, but the swap is a no-op.
            let cards = deck_a.cards.read();
            let a_card = cards.get(&a_card_id).cloned().ok_or_else(|| MissingCard {
                user: user_a.to_string(),
                card: a_card_id,
            })?;
            let b_card = cards.get(&b_card_id).cloned().ok_or_else(|| MissingCard {
                user: user_b.to_string(),
                card: b_card_id,
            })?;
            return Ok((a_card, b_card));
        }

        let a_first = user_a <= user_b;
        let (first, second) = if a_first {
            (&deck_a, &deck_b)
        } else {
            (&deck_b, &deck_a)
        };
        let mut first_guard = first.cards.write();
        let mut second_guard = second.cards.write();
        let (cards_a, cards_b) = if a_first {
            (&mut *first_guard, &mut *second_guard)
        } else {
            (&mut *second_guard, &mut *first_guard)
        };

        let a_card = cards_a.get(&a_card_id).cloned().ok_or_else(|| MissingCard {
            user: user_a.to_string(),
            card: a_card_id,
        })?;
        let b_card = cards_b.get(&b_card_id).cloned().ok_or_else(|| MissingCard {
            user: user_b.to_string(),
            card: b_card_id,
        })?;

        cards_a.remove(&a_card_id);
        cards_b.remove(&b_card_id);
        cards_a.insert(b_card.id, b_card.clone());
        cards_b.insert(a_card.id, a_card.clone());

        Ok((a_card, b_card))
    }

    /// Dump every deck for snapshot transfer.
    #[must_use]
    pub fn export(&self) -> (Vec<Card>, HashMap<String, Vec<Card>>) {
        let global = self.global.list();
        let users = self
            .users
            .read()
            .iter()
            .map(|(user, deck)| (user.clone(), deck.list()))
            .collect();
        (global, users)
    }

    /// Rebuild a store from snapshot contents.
    #[must_use]
    pub fn from_snapshot(global: &[Card], users: &HashMap<String, Vec<Card>>) -> Self {
        let store = Self::new();
        for card in global {
            store.add("", card.clone());
        }
        for (user, cards) in users {
            for card in cards {
                store.add(user, card.clone());
            }
        }
        store
    }
}

/// Complete state dump of an inventory node, sufficient to reconstruct a
/// follower's store and pending trades.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub global: Vec<Card>,
    pub users: HashMap<String, Vec<Card>>,
    pub trades: HashMap<u64, TradeProposal>,
    pub next_trade_id: u64,
}

/// A staged two-party card swap: `user_a` offers `a_card_id` for
/// `user_b`'s `b_card_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub user_a: String,
    pub user_b: String,
    pub a_card_id: i64,
    pub b_card_id: i64,
}

/// Pending trade proposals plus the id counter.
///
/// Ids increase monotonically and are never reused within a leader's
/// lifetime; `next_trade_id` in the snapshot carries the last allocated
/// value so a recovered follower continues the sequence.
#[derive(Debug, Default)]
pub struct TradeLedger {
    pending: HashMap<u64, TradeProposal>,
    last_id: u64,
}

impl TradeLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a proposal and return its freshly allocated id.
    pub fn propose(&mut self, proposal: TradeProposal) -> u64 {
        self.last_id += 1;
        self.pending.insert(self.last_id, proposal);
        self.last_id
    }

    #[must_use]
    pub fn get(&self, id: u64) -> Option<&TradeProposal> {
        self.pending.get(&id)
    }

    /// Remove and return a proposal, precluding double-accept.
    pub fn take(&mut self, id: u64) -> Option<TradeProposal> {
        self.pending.remove(&id)
    }

    #[must_use]
    pub fn export(&self) -> (HashMap<u64, TradeProposal>, u64) {
        (self.pending.clone(), self.last_id)
    }

    /// Replace the ledger contents from a snapshot.
    pub fn restore(&mut self, pending: HashMap<u64, TradeProposal>, last_id: u64) {
        self.pending = pending;
        self.last_id = last_id;
    }
}
