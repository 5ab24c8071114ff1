//! Match-fabric domain types: hands, players and resolved matches.
//!
//! Matchmaking cards carry a power score; a match between two five-card
//! hands is decided by the larger power sum, ties yielding [`DRAW`].

use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// Number of cards a play request must commit.
pub const HAND_SIZE: usize = 5;

/// Winner value for equal power sums.
pub const DRAW: &str = "draw";

/// A playable card with its power score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub name: String,
    pub power: u32,
}

/// One half of a match: the player, the server their push channel lives
/// on, and their committed hand. A player is only reachable through the
/// server recorded here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    #[serde(rename = "player_id")]
    pub id: String,
    pub server: String,
    pub cards: Vec<Card>,
}

/// A resolved pairing of two players and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    #[serde(rename = "p1")]
    pub host: PlayerInfo,
    #[serde(rename = "p2")]
    pub guest: PlayerInfo,
    pub winner: String,
}

/// A player parked in a node's waiting queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitingPlayer {
    pub player_id: String,
    pub cards: Vec<Card>,
}

/// Sum of card powers for a hand.
#[must_use]
pub fn hand_power(cards: &[Card]) -> u64 {
    cards.iter().map(|card| u64::from(card.power)).sum()
}

/// Random 8-byte match identifier, lowercase hex.
#[must_use]
pub fn new_match_id() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

impl Match {
    /// Pair two players and decide the winner by hand power.
    #[must_use]
    pub fn resolve(host: PlayerInfo, guest: PlayerInfo) -> Self {
        let host_power = hand_power(&host.cards);
        let guest_power = hand_power(&guest.cards);
        let winner = if host_power > guest_power {
            host.id.clone()
        } else if guest_power > host_power {
            guest.id.clone()
        } else {
            DRAW.to_string()
        };
        Self {
            id: new_match_id(),
            host,
            guest,
            winner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hand(powers: &[u32]) -> Vec<Card> {
        powers
            .iter()
            .enumerate()
            .map(|(i, power)| Card {
                id: format!("c{i}"),
                name: format!("Card {i}"),
                power: *power,
            })
            .collect()
    }

    fn player(id: &str, server: &str, powers: &[u32]) -> PlayerInfo {
        PlayerInfo {
            id: id.to_string(),
            server: server.to_string(),
            cards: hand(powers),
        }
    }

    #[test]
    fn higher_power_sum_wins() {
        let game = Match::resolve(
            player("alice", "a:1", &[5, 5, 5, 5, 5]),
            player("bob", "b:1", &[1, 2, 3, 4, 5]),
        );
        assert_eq!(game.winner, "alice");

        let game = Match::resolve(
            player("alice", "a:1", &[1, 1, 1, 1, 1]),
            player("bob", "b:1", &[9, 0, 0, 0, 0]),
        );
        assert_eq!(game.winner, "bob");
    }

    #[test]
    fn equal_sums_draw() {
        let game = Match::resolve(
            player("alice", "a:1", &[2, 2, 2, 2, 2]),
            player("bob", "b:1", &[10, 0, 0, 0, 0]),
        );
        assert_eq!(game.winner, DRAW);
    }

    #[test]
    fn match_id_is_sixteen_lowercase_hex_chars() {
        let id = new_match_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn match_ids_are_not_repeated() {
        // Not a uniqueness proof, but catches a broken RNG hookup.
        let a = new_match_id();
        let b = new_match_id();
        assert_ne!(a, b);
    }

    #[test]
    fn wire_format_uses_p1_p2_and_player_id() {
        let game = Match::resolve(
            player("alice", "a:1", &[1, 1, 1, 1, 1]),
            player("bob", "b:1", &[0, 0, 0, 0, 0]),
        );
        let json = serde_json::to_value(&game).expect("serialize");
        assert_eq!(json["p1"]["player_id"], "alice");
        assert_eq!(json["p2"]["player_id"], "bob");
        assert_eq!(json["p2"]["server"], "b:1");
        assert_eq!(json["winner"], "alice");

        let back: Match = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, game);
    }

    #[test]
    fn hand_power_sums_all_cards() {
        assert_eq!(hand_power(&hand(&[1, 2, 3, 4, 5])), 15);
        assert_eq!(hand_power(&[]), 0);
    }
}
