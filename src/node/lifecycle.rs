//! Background loops of a running node.
//!
//! - The election timer polls the time since last contact and starts a
//!   campaign once it exceeds this node's election timeout
//! - The heartbeat loop runs for as long as the node leads the term it was
//!   started for

use super::{NodeCore, Peer};
use crate::rpc::*;
use std::sync::Arc;
use tracing::Instrument;

impl NodeCore {
    pub(super) async fn run_election_timer(self: Arc<Self>) {
        while !self.killed() {
            let timed_out = {
                let state = self.state.lock().await;
                !state.role.is_leader()
                    && state.since_last_contact() >= self.election_timeout
            };
            if timed_out {
                tracing::debug!(
                    id = self.id,
                    timeout = ?self.election_timeout,
                    "election timeout elapsed"
                );
                tokio::spawn(
                    Arc::clone(&self).attempt_election().in_current_span(),
                );
            }
            tokio::time::sleep(self.config.election_poll_interval).await;
        }
        tracing::debug!(id = self.id, "election timer stopped");
    }

    /// Sends a round of heartbeats every `heartbeat_interval` while this
    /// node is leader for `term`.
    pub(super) async fn run_heartbeat(self: Arc<Self>, term: u32) {
        loop {
            if self.killed() {
                break;
            }
            {
                let mut state = self.state.lock().await;
                if !state.role.is_leader()
                    || state.persistent.current_term != term
                {
                    break;
                }
                state.touch();
            }

            for (peer_id, peer) in self.others() {
                let core = Arc::clone(&self);
                tokio::spawn(
                    async move {
                        core.call_append_entries(peer_id, peer, term).await
                    }
                    .in_current_span(),
                );
            }

            tokio::time::sleep(self.config.heartbeat_interval).await;
        }
        tracing::debug!(id = self.id, term, "heartbeat loop stopped");
    }

    async fn call_append_entries(&self, peer_id: u32, peer: Peer, term: u32) {
        let req = AppendEntriesRequest {
            term,
            leader_id: self.id,
        };

        let reply = match peer
            .append_entries(self.rpc_context(), req)
            .instrument(tracing::debug_span!(
                "append_entries",
                peer = peer_id,
                term
            ))
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::trace!(
                    id = self.id,
                    peer = peer_id,
                    error = ?e,
                    "heartbeat failed"
                );
                return;
            }
        };

        let mut state = self.state.lock().await;
        if reply.term > state.persistent.current_term {
            state.step_down(reply.term);
            if let Err(e) = state.persist().await {
                tracing::error!(id = self.id, error = ?e, "Failed to persist state after term update");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::super::{Node, Peer};
    use crate::config::Config;
    use crate::network::mock::MockPeer;
    use crate::raft::Role;
    use std::sync::Arc;
    use std::time::Duration;

    fn pinned(timeout_ms: u64) -> Config {
        Config {
            election_timeout_min: Duration::from_millis(timeout_ms),
            election_timeout_max: Duration::from_millis(timeout_ms),
            ..Default::default()
        }
    }

    async fn make_leader(node: &Node) -> u32 {
        let term = {
            let mut state = node.core.state.lock().await;
            let term = state.become_candidate();
            state.become_leader();
            term
        };
        tokio::spawn(Arc::clone(&node.core).run_heartbeat(term));
        term
    }

    #[tokio::test(start_paused = true)]
    async fn timer_starts_a_campaign_after_the_timeout() {
        let peers: Vec<Peer> = (0..3)
            .map(|_| Arc::new(MockPeer::unreachable()) as Peer)
            .collect();
        let node = spawn_node(0, peers, pinned(300)).await;

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(node.status().await.term, 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = node.status().await;
        assert_eq!(status.term, 1);
        assert_eq!(status.role, Role::Candidate);
        node.kill();
    }

    #[tokio::test(start_paused = true)]
    async fn lost_campaign_is_retried_after_another_timeout() {
        let peers: Vec<Peer> = (0..3)
            .map(|_| Arc::new(MockPeer::unreachable()) as Peer)
            .collect();
        let node = spawn_node(0, peers, pinned(300)).await;

        tokio::time::sleep(Duration::from_millis(1000)).await;

        // Campaigns at ~300, ~600 and ~900ms.
        assert_eq!(node.status().await.term, 3);
        node.kill();
    }

    #[tokio::test(start_paused = true)]
    async fn killed_node_never_campaigns() {
        let peers: Vec<Peer> = (0..3)
            .map(|_| Arc::new(MockPeer::unreachable()) as Peer)
            .collect();
        let node = spawn_node(0, peers, pinned(300)).await;
        node.kill();

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(node.get_state().await, (0, false));
    }

    #[tokio::test(start_paused = true)]
    async fn leader_sends_heartbeats_every_interval() {
        let follower = Arc::new(MockPeer::acking(1, true));
        let node = spawn_node(
            0,
            vec![Arc::new(MockPeer::unreachable()), follower.clone()],
            quiet_config(),
        )
        .await;

        make_leader(&node).await;
        tokio::time::sleep(Duration::from_millis(1000)).await;

        // Rounds at 0, 150, ..., 900ms.
        assert_eq!(follower.calls(), 7);
        assert_eq!(node.get_state().await, (1, true));
        node.kill();
    }

    #[tokio::test(start_paused = true)]
    async fn leader_does_not_time_out() {
        let peers: Vec<Peer> = (0..3)
            .map(|_| Arc::new(MockPeer::unreachable()) as Peer)
            .collect();
        let node = spawn_node(0, peers, pinned(300)).await;

        make_leader(&node).await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(node.get_state().await, (1, true));
        node.kill();
    }

    #[tokio::test(start_paused = true)]
    async fn higher_term_ack_ends_leadership() {
        let node = spawn_node(
            0,
            vec![
                Arc::new(MockPeer::unreachable()),
                Arc::new(MockPeer::acking(9, false)),
            ],
            quiet_config(),
        )
        .await;

        make_leader(&node).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let status = node.status().await;
        assert_eq!(status.role, Role::Follower);
        assert_eq!(status.term, 9);
        assert_eq!(status.leader_id, None);
        node.kill();
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_stop_when_leadership_ends() {
        let follower = Arc::new(MockPeer::acking(1, true));
        let node = spawn_node(
            0,
            vec![Arc::new(MockPeer::unreachable()), follower.clone()],
            quiet_config(),
        )
        .await;

        make_leader(&node).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        node.core.state.lock().await.step_down(2);
        let calls = follower.calls();

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(follower.calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_stop_when_killed() {
        let follower = Arc::new(MockPeer::acking(1, true));
        let node = spawn_node(
            0,
            vec![Arc::new(MockPeer::unreachable()), follower.clone()],
            quiet_config(),
        )
        .await;

        make_leader(&node).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        node.kill();
        let calls = follower.calls();

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(follower.calls(), calls);
    }
}
