//! Test harness for in-process election clusters.
//!
//! Every node runs its real background tasks; peers talk over a
//! `SimNetwork`, so tests can partition, cut links and restart nodes.
//! Meant for `#[tokio::test(start_paused = true)]`.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use senkyo::config::Config;
use senkyo::events::RaftEvent;
use senkyo::network::sim::SimNetwork;
use senkyo::node::{Node, NodeStatus};
use senkyo::storage::MemStorage;
use tokio::sync::{Mutex, broadcast, mpsc};

/// Config with both election timeout bounds set to `ms`.
pub fn pinned(ms: u64) -> Config {
    Config {
        election_timeout_min: Duration::from_millis(ms),
        election_timeout_max: Duration::from_millis(ms),
        ..Default::default()
    }
}

pub struct Cluster {
    pub net: SimNetwork,
    nodes: Vec<Node>,
    configs: Vec<Config>,
    storages: Vec<MemStorage>,
    connected: Vec<bool>,
    events: Arc<Mutex<Vec<RaftEvent>>>,
}

impl Cluster {
    /// Cluster of `n` nodes with the default configuration.
    pub async fn new(n: usize) -> Self {
        Self::with_configs(vec![Config::default(); n]).await
    }

    /// One node per config, node `i` running `configs[i]`.
    pub async fn with_configs(configs: Vec<Config>) -> Self {
        let mut cluster = Self {
            net: SimNetwork::new(),
            nodes: Vec::with_capacity(configs.len()),
            // Clones of a MemStorage share one slot, so no `vec![..; n]`.
            storages: configs.iter().map(|_| MemStorage::default()).collect(),
            connected: vec![true; configs.len()],
            configs,
            events: Arc::new(Mutex::new(Vec::new())),
        };
        for id in 0..cluster.configs.len() as u32 {
            let node = cluster.spawn_node(id).await;
            cluster.nodes.push(node);
        }
        cluster
    }

    async fn spawn_node(&self, id: u32) -> Node {
        let n = self.configs.len() as u32;
        let (apply_tx, _apply_rx) = mpsc::unbounded_channel();
        let node = Node::spawn(
            id,
            self.net.endpoints(id, n),
            self.configs[id as usize].clone(),
            Box::new(self.storages[id as usize].clone()),
            apply_tx,
        )
        .await
        .expect("harness ids are within the cluster");
        self.net.register(id, node.command_sender()).await;
        self.record_events(node.subscribe());
        node
    }

    fn record_events(&self, mut rx: broadcast::Receiver<RaftEvent>) {
        let log = Arc::clone(&self.events);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => log.lock().await.push(event),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: u32) -> &Node {
        &self.nodes[id as usize]
    }

    pub async fn status(&self, id: u32) -> NodeStatus {
        self.node(id).status().await
    }

    pub async fn disconnect(&mut self, id: u32) {
        self.connected[id as usize] = false;
        self.net.disconnect(id).await;
    }

    pub async fn connect(&mut self, id: u32) {
        self.connected[id as usize] = true;
        self.net.connect(id).await;
    }

    /// Kills node `id` and takes it off the network.
    pub async fn kill(&mut self, id: u32) {
        self.node(id).kill();
        self.disconnect(id).await;
    }

    /// Replaces node `id` with a fresh incarnation on the same storage.
    pub async fn restart(&mut self, id: u32) {
        self.node(id).kill();
        let node = self.spawn_node(id).await;
        self.nodes[id as usize] = node;
        self.connect(id).await;
    }

    pub async fn events(&self) -> Vec<RaftEvent> {
        self.events.lock().await.clone()
    }

    /// Connected nodes that believe they lead, with their terms.
    pub async fn leaders(&self) -> Vec<(u32, u32)> {
        let mut leaders = Vec::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if !self.connected[i] {
                continue;
            }
            let (term, is_leader) = node.get_state().await;
            if is_leader {
                leaders.push((i as u32, term));
            }
        }
        leaders
    }

    /// Waits for a leader among the connected nodes and returns its id.
    /// Panics if two connected nodes lead the same term, or if no leader
    /// shows up within five seconds.
    pub async fn check_one_leader(&self) -> u32 {
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(500)).await;

            let mut by_term: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
            for (id, term) in self.leaders().await {
                by_term.entry(term).or_default().push(id);
            }
            for (term, ids) in &by_term {
                assert!(ids.len() <= 1, "term {term} has leaders {ids:?}");
            }
            if let Some((_, ids)) = by_term.last_key_value() {
                return ids[0];
            }
        }
        panic!("expected one leader, got none");
    }

    pub async fn check_no_leader(&self) {
        let leaders = self.leaders().await;
        assert!(leaders.is_empty(), "expected no leader, got {leaders:?}");
    }

    /// Term shared by all connected nodes. Panics if they disagree.
    pub async fn check_terms(&self) -> u32 {
        let mut agreed = None;
        for (i, node) in self.nodes.iter().enumerate() {
            if !self.connected[i] {
                continue;
            }
            let (term, _) = node.get_state().await;
            match agreed {
                None => agreed = Some(term),
                Some(t) => assert_eq!(t, term, "servers disagree on term"),
            }
        }
        agreed.unwrap_or(0)
    }

    pub fn shutdown(&self) {
        for node in &self.nodes {
            node.kill();
        }
    }
}
