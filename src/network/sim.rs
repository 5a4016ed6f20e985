//! In-process network for running whole clusters inside one runtime.
//!
//! Calls travel through the same `Command` channel a node's TCP server
//! feeds, so a simulated node runs exactly the code a deployed one does.
//! Nodes can be cut off entirely or per link, and the network can be made
//! unreliable (random delay, dropped requests and replies).

use super::NetworkError;
use crate::node::Command;
use crate::rpc::*;
use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tarpc::context;
use tokio::sync::{Mutex, mpsc, oneshot};

const MAX_DELAY_MS: u64 = 27;
const DROP_PROBABILITY: f64 = 0.1;

#[derive(Default)]
struct SimState {
    servers: HashMap<u32, mpsc::Sender<Command>>,
    disconnected: HashSet<u32>,
    cut_links: HashSet<(u32, u32)>,
    unreliable: bool,
    rpc_counts: HashMap<u32, u64>,
}

impl SimState {
    fn linked(&self, a: u32, b: u32) -> bool {
        !self.disconnected.contains(&a)
            && !self.disconnected.contains(&b)
            && !self.cut_links.contains(&link(a, b))
    }
}

fn link(a: u32, b: u32) -> (u32, u32) {
    (a.min(b), a.max(b))
}

#[derive(Clone, Default)]
pub struct SimNetwork {
    inner: Arc<Mutex<SimState>>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes calls addressed to `id` into `tx`, replacing any previous
    /// registration (a restarted node).
    pub async fn register(&self, id: u32, tx: mpsc::Sender<Command>) {
        self.inner.lock().await.servers.insert(id, tx);
    }

    /// Endpoint list for node `from` in a cluster of `n` nodes, indexed by
    /// node id.
    pub fn endpoints(&self, from: u32, n: u32) -> Vec<Arc<dyn RaftRpcTrait>> {
        (0..n)
            .map(|to| {
                Arc::new(SimEndpoint {
                    from,
                    to,
                    net: self.clone(),
                }) as Arc<dyn RaftRpcTrait>
            })
            .collect()
    }

    pub async fn connect(&self, id: u32) {
        self.inner.lock().await.disconnected.remove(&id);
    }

    pub async fn disconnect(&self, id: u32) {
        self.inner.lock().await.disconnected.insert(id);
    }

    pub async fn set_link(&self, a: u32, b: u32, up: bool) {
        let mut state = self.inner.lock().await;
        if up {
            state.cut_links.remove(&link(a, b));
        } else {
            state.cut_links.insert(link(a, b));
        }
    }

    pub async fn set_reliable(&self, reliable: bool) {
        self.inner.lock().await.unreliable = !reliable;
    }

    /// Number of calls delivered to `id` so far.
    pub async fn rpc_count(&self, id: u32) -> u64 {
        self.inner
            .lock()
            .await
            .rpc_counts
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    async fn route(
        &self,
        from: u32,
        to: u32,
    ) -> Option<(mpsc::Sender<Command>, bool)> {
        let mut state = self.inner.lock().await;
        if !state.linked(from, to) {
            return None;
        }
        let server = state.servers.get(&to)?.clone();
        *state.rpc_counts.entry(to).or_default() += 1;
        Some((server, state.unreliable))
    }

    async fn linked(&self, from: u32, to: u32) -> bool {
        self.inner.lock().await.linked(from, to)
    }
}

struct SimEndpoint {
    from: u32,
    to: u32,
    net: SimNetwork,
}

impl SimEndpoint {
    async fn call<Req, Resp>(
        &self,
        ctx: context::Context,
        req: Req,
        wrap: impl FnOnce(Req, oneshot::Sender<Resp>) -> Command,
    ) -> Result<Resp, NetworkError> {
        let (server, unreliable) =
            self.net.route(self.from, self.to).await.ok_or_else(|| {
                NetworkError::ConnectionFailed(format!(
                    "node {} unreachable from {}",
                    self.to, self.from
                ))
            })?;

        if unreliable {
            let (delay, dropped) = {
                let mut rng = rand::rng();
                (
                    rng.random_range(0..MAX_DELAY_MS),
                    rng.random_bool(DROP_PROBABILITY),
                )
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if dropped {
                return Err(NetworkError::Other("request dropped".into()));
            }
        }

        let (tx, rx) = oneshot::channel();
        server.send(wrap(req, tx)).await.map_err(|_| {
            NetworkError::ConnectionFailed(format!("node {} is down", self.to))
        })?;

        let remaining = ctx.deadline.saturating_duration_since(Instant::now());
        let resp = tokio::time::timeout(remaining, rx)
            .await
            .map_err(|_| NetworkError::Timeout)?
            .map_err(|_| NetworkError::Other("call abandoned".into()))?;

        if unreliable && rand::rng().random_bool(DROP_PROBABILITY) {
            return Err(NetworkError::Other("reply dropped".into()));
        }
        if !self.net.linked(self.from, self.to).await {
            return Err(NetworkError::Other("reply lost".into()));
        }
        Ok(resp)
    }
}

#[async_trait]
impl RaftRpcTrait for SimEndpoint {
    async fn append_entries(
        &self,
        ctx: context::Context,
        req: AppendEntriesRequest,
    ) -> anyhow::Result<AppendEntriesResponse> {
        Ok(self.call(ctx, req, Command::AppendEntries).await?)
    }

    async fn request_vote(
        &self,
        ctx: context::Context,
        req: RequestVoteRequest,
    ) -> anyhow::Result<RequestVoteResponse> {
        Ok(self.call(ctx, req, Command::RequestVote).await?)
    }
}
