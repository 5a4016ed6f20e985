pub mod apply;
pub mod config;
pub mod events;
pub mod network;
pub mod node;
pub mod raft;
pub mod rpc;
pub mod server;
pub mod storage;
pub mod trace;

pub use apply::ApplyMsg;
pub use config::Config;
pub use events::RaftEvent;
pub use node::{Node, NodeStatus, Peer};
pub use raft::Role;
