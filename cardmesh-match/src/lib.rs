//! Peer-to-peer 1v1 matchmaking node.
//!
//! Every node is a symmetric peer holding a local waiting queue and the
//! push channels of its connected players. A play request pairs against
//! the local queue first, then polls peers for a waiter, and finally
//! enqueues the challenger. Matched players are notified over their own
//! node's push channel — a player is only reachable through the server
//! recorded in their [`cardmesh_core::matching::PlayerInfo`].

pub mod cli;
pub mod handlers;
pub mod push;
pub mod server;
