//! Shared domain model for the cardmesh game backend.
//!
//! Two services build on this crate: the replicated card-inventory cluster
//! (`cardmesh-inventory`) and the peer-to-peer matchmaking fabric
//! (`cardmesh-match`). The inventory side lives in [`deck`]; the match side
//! in [`matching`]. Neither module knows about HTTP — the service crates own
//! the wire surface and replication plumbing.

pub mod deck;
pub mod matching;
