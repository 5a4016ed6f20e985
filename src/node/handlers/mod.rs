//! Peer RPC handlers.
//!
//! Each takes the node's state lock directly rather than a `Node`, so every
//! transport reaches the same code and tests can drive a bare `RaftState`.

mod append_entries;
mod vote;

pub use append_entries::handle_append_entries;
pub use vote::handle_request_vote;
