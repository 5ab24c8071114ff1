//! Replicated card-inventory cluster node.
//!
//! A set of homogeneous nodes collectively holds a global card catalog and
//! per-user decks. A single leader — the live node with the largest id —
//! accepts every mutation and fans it out to followers; followers answer
//! reads locally, forward mutations, and recover by pulling a full state
//! snapshot from the leader at startup.

pub mod api;
pub mod cli;
pub mod node;
