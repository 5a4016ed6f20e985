//! Leader election.
//!
//! One call to `attempt_election` is one campaign:
//! - become candidate for a fresh term and vote for ourselves
//! - ask every other member for its vote, concurrently
//! - stop waiting once a majority has granted or every call has resolved
//! - claim leadership only if nothing moved us off that term meanwhile

use super::{NodeCore, Peer};
use crate::rpc::*;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Instrument;

impl NodeCore {
    pub(super) async fn attempt_election(self: Arc<Self>) {
        let term = {
            let mut state = self.state.lock().await;
            let term = state.become_candidate();
            if let Err(e) = state.persist().await {
                tracing::error!(id = self.id, term, error = ?e, "Failed to persist candidacy, abandoning election");
                return;
            }
            term
        };

        let cluster_size = self.cluster_size();
        let majority = cluster_size / 2 + 1;
        tracing::info!(
            id = self.id,
            term,
            cluster_size,
            "attempting an election"
        );

        // Each vote call runs detached: a campaign that has already decided
        // must not cancel calls whose replies may still carry a newer term.
        let (tally_tx, mut tally_rx) = mpsc::unbounded_channel();
        for (peer_id, peer) in self.others() {
            let core = Arc::clone(&self);
            let tally_tx = tally_tx.clone();
            tokio::spawn(
                async move {
                    let granted =
                        core.call_request_vote(peer_id, peer, term).await;
                    let _ = tally_tx.send((peer_id, granted));
                }
                .in_current_span(),
            );
        }
        drop(tally_tx);

        let mut votes = 1;
        let mut finished = 1;
        while votes < majority && finished < cluster_size {
            let Some((peer_id, granted)) = tally_rx.recv().await else {
                break;
            };
            finished += 1;
            if granted {
                votes += 1;
                tracing::debug!(
                    id = self.id,
                    peer = peer_id,
                    term,
                    votes,
                    "got vote"
                );
            }
        }

        if votes < majority {
            tracing::info!(
                id = self.id,
                term,
                votes,
                majority,
                "lost the election"
            );
            return;
        }

        {
            let mut state = self.state.lock().await;
            if !state.role.is_candidate()
                || state.persistent.current_term != term
            {
                tracing::info!(
                    id = self.id,
                    term,
                    current_term = state.persistent.current_term,
                    role = ?state.role,
                    "Term or role changed during the election, discarding result"
                );
                return;
            }
            state.become_leader();
        }
        tracing::info!(id = self.id, term, votes, "became leader");

        tokio::spawn(
            Arc::clone(&self).run_heartbeat(term).in_current_span(),
        );
    }

    /// Asks one peer for its vote. A failed call is a refusal.
    async fn call_request_vote(
        &self,
        peer_id: u32,
        peer: Peer,
        term: u32,
    ) -> bool {
        let req = RequestVoteRequest {
            term,
            candidate_id: self.id,
        };

        let reply = match peer
            .request_vote(self.rpc_context(), req)
            .instrument(tracing::info_span!(
                "request_vote",
                peer = peer_id,
                term
            ))
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!(
                    id = self.id,
                    peer = peer_id,
                    error = ?e,
                    "request_vote RPC failed"
                );
                return false;
            }
        };

        let mut state = self.state.lock().await;
        if reply.term > state.persistent.current_term {
            state.step_down(reply.term);
            if let Err(e) = state.persist().await {
                tracing::error!(id = self.id, error = ?e, "Failed to persist state after term update");
            }
            return false;
        }
        reply.vote_granted
    }
}
