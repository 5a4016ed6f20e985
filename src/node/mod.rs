//! Node module: one peer of the cluster and its background machinery.
//!
//! This module serves as the entry point for the election core, providing:
//! - The public `Node` handle (construction, state queries, shutdown)
//! - The command channel through which transports deliver peer RPCs
//! - Shared state reached by the election timer, the election coordinator,
//!   the heartbeat broadcaster and the RPC handlers

mod election;
pub mod handlers;
mod lifecycle;

use crate::apply::ApplyMsg;
use crate::config::Config;
use crate::events::RaftEvent;
use crate::raft::{RaftState, Role};
use crate::rpc::*;
use crate::storage::Storage;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tracing::Instrument;

const COMMAND_BUFFER: usize = 64;

/// Command represents an incoming peer RPC with its response channel.
/// This enum bridges transports (which receive requests) and the
/// handlers (which process them against the node state).
pub enum Command {
    AppendEntries(AppendEntriesRequest, oneshot::Sender<AppendEntriesResponse>),
    RequestVote(RequestVoteRequest, oneshot::Sender<RequestVoteResponse>),
}

/// Endpoint of a cluster member, indexed by node id.
pub type Peer = Arc<dyn RaftRpcTrait>;

/// Snapshot of a node's state, read under the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    pub id: u32,
    pub term: u32,
    pub role: Role,
    pub voted_for: Option<u32>,
    pub leader_id: Option<u32>,
}

/// State shared by the node handle and its background tasks.
struct NodeCore {
    id: u32,
    config: Config,
    election_timeout: Duration,
    /// Fixed at construction; includes this node at index `id`.
    peers: Vec<Peer>,
    state: Mutex<RaftState>,
    dead: AtomicBool,
}

impl NodeCore {
    fn killed(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    fn cluster_size(&self) -> usize {
        self.peers.len()
    }

    /// Every other member with its id.
    fn others(&self) -> impl Iterator<Item = (u32, Peer)> + '_ {
        self.peers
            .iter()
            .enumerate()
            .map(|(i, peer)| (i as u32, Arc::clone(peer)))
            .filter(move |(i, _)| *i != self.id)
    }

    fn rpc_context(&self) -> tarpc::context::Context {
        let mut ctx = tarpc::context::current();
        ctx.deadline = std::time::Instant::now() + self.config.rpc_timeout;
        ctx
    }

    /// Dispatches peer RPCs to the handlers, one task per call.
    async fn serve(self: Arc<Self>, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            if self.killed() {
                break;
            }
            let core = Arc::clone(&self);
            match cmd {
                Command::AppendEntries(req, resp_tx) => {
                    tokio::spawn(async move {
                        let resp =
                            handlers::handle_append_entries(&req, &core.state)
                                .await;
                        let _ = resp_tx.send(resp);
                    });
                }
                Command::RequestVote(req, resp_tx) => {
                    tokio::spawn(async move {
                        let resp =
                            handlers::handle_request_vote(&req, &core.state)
                                .await;
                        let _ = resp_tx.send(resp);
                    });
                }
            }
        }
        tracing::debug!(id = self.id, "command dispatcher stopped");
    }
}

/// Handle to a running node. Cheap to clone.
#[derive(Clone)]
pub struct Node {
    core: Arc<NodeCore>,
    cmd_tx: mpsc::Sender<Command>,
    events: broadcast::Sender<RaftEvent>,
    apply_tx: mpsc::UnboundedSender<ApplyMsg>,
}

impl Node {
    /// Creates node `id` of the cluster described by `peers` and starts
    /// its background tasks.
    ///
    /// Restores the stored term and vote before the election timer starts.
    /// Returns without waiting on the network; must be called within a
    /// tokio runtime. Fails if `id` is not an index into `peers`.
    pub async fn spawn(
        id: u32,
        peers: Vec<Peer>,
        config: Config,
        storage: Box<dyn Storage>,
        apply_tx: mpsc::UnboundedSender<ApplyMsg>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            (id as usize) < peers.len(),
            "node id {} is out of range for a cluster of {}",
            id,
            peers.len()
        );

        let mut state = RaftState::new(id, storage);
        match state.load_persisted().await {
            Ok(Some(persisted)) => {
                tracing::info!(
                    id = id,
                    term = persisted.current_term,
                    voted_for = ?persisted.voted_for,
                    "Restoring state from storage"
                );
                state.restore_from(persisted);
            }
            Ok(None) => {
                tracing::info!(
                    id = id,
                    "No persisted state found, starting fresh"
                );
            }
            Err(e) => {
                tracing::warn!(id = id, error = ?e, "Failed to load persisted state, starting fresh");
            }
        }
        let events = state.event_sender();

        let election_timeout = config.random_election_timeout();
        let core = Arc::new(NodeCore {
            id,
            config,
            election_timeout,
            peers,
            state: Mutex::new(state),
            dead: AtomicBool::new(false),
        });

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let span = tracing::info_span!("node", id = id);
        tokio::spawn(Arc::clone(&core).serve(cmd_rx).instrument(span.clone()));
        tokio::spawn(
            Arc::clone(&core).run_election_timer().instrument(span),
        );

        Ok(Node {
            core,
            cmd_tx,
            events,
            apply_tx,
        })
    }

    pub fn id(&self) -> u32 {
        self.core.id
    }

    pub fn election_timeout(&self) -> Duration {
        self.core.election_timeout
    }

    /// Current term and whether this node believes it is the leader.
    pub async fn get_state(&self) -> (u32, bool) {
        let state = self.core.state.lock().await;
        (state.persistent.current_term, state.role.is_leader())
    }

    pub async fn status(&self) -> NodeStatus {
        let state = self.core.state.lock().await;
        NodeStatus {
            id: state.id,
            term: state.persistent.current_term,
            role: state.role,
            voted_for: state.persistent.voted_for,
            leader_id: state.leader_id,
        }
    }

    pub async fn leader_hint(&self) -> Option<u32> {
        self.core.state.lock().await.leader_id
    }

    /// Entry point for client commands. Returns `(index, term, is_leader)`.
    ///
    /// Only reports the current term and leadership: appending and
    /// replicating the command belongs to the log layer, so the index is
    /// always `None` here. Never blocks on the network.
    pub async fn start(&self, command: Bytes) -> (Option<u32>, u32, bool) {
        let (term, is_leader) = self.get_state().await;
        tracing::debug!(
            id = self.core.id,
            term,
            is_leader,
            len = command.len(),
            "client command received"
        );
        (None, term, is_leader)
    }

    /// Asks the background tasks to stop. They notice at their next loop
    /// iteration; calls already in flight are left to finish.
    pub fn kill(&self) {
        if !self.core.dead.swap(true, Ordering::SeqCst) {
            tracing::info!(id = self.core.id, "node killed");
        }
    }

    pub fn killed(&self) -> bool {
        self.core.killed()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RaftEvent> {
        self.events.subscribe()
    }

    /// Sender that transports use to deliver peer RPCs to this node.
    pub fn command_sender(&self) -> mpsc::Sender<Command> {
        self.cmd_tx.clone()
    }

    /// Channel to the owning service, for the log layer's committed
    /// entries.
    pub fn apply_sender(&self) -> &mpsc::UnboundedSender<ApplyMsg> {
        &self.apply_tx
    }
}
