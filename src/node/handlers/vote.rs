use crate::events::RaftEvent;
use crate::raft::RaftState;
use crate::rpc::*;
use tokio::sync::Mutex;

/// Grants at most one vote per term, first come first served.
pub async fn handle_request_vote(
    req: &RequestVoteRequest,
    state: &Mutex<RaftState>,
) -> RequestVoteResponse {
    let mut state = state.lock().await;
    tracing::debug!(id=?state.id, request.body=?req, "Command::RequestVote");

    if req.term < state.persistent.current_term {
        tracing::info!(
            id=?state.id,
            candidate_id=req.candidate_id,
            req_term=req.term,
            current_term=state.persistent.current_term,
            "RequestVote rejected: candidate term is older"
        );
        return RequestVoteResponse {
            term: state.persistent.current_term,
            vote_granted: false,
        };
    }

    if req.term > state.persistent.current_term {
        state.step_down(req.term);
        if let Err(e) = state.persist().await {
            tracing::error!(id=?state.id, error=?e, "Failed to persist state after term update in RequestVote");
            return RequestVoteResponse {
                term: state.persistent.current_term,
                vote_granted: false,
            };
        }
    }

    let current_term = state.persistent.current_term;
    let previous_vote = state.persistent.voted_for;
    if let Some(voted_for) = previous_vote
        && voted_for != req.candidate_id
    {
        tracing::info!(
            id=?state.id,
            candidate_id=req.candidate_id,
            voted_for=voted_for,
            term=current_term,
            "RequestVote rejected: already voted for another candidate"
        );
        return RequestVoteResponse {
            term: current_term,
            vote_granted: false,
        };
    }

    state.persistent.voted_for = Some(req.candidate_id);
    if let Err(e) = state.persist().await {
        tracing::error!(id=?state.id, error=?e, "Failed to persist state after voting");
        state.persistent.voted_for = previous_vote;
        return RequestVoteResponse {
            term: current_term,
            vote_granted: false,
        };
    }
    // Granting counts as contact so we don't immediately campaign against
    // the candidate we just backed.
    state.touch();

    tracing::info!(
        id=?state.id,
        candidate_id=req.candidate_id,
        term=current_term,
        "vote granted"
    );
    state.emit(RaftEvent::VoteGranted {
        id: state.id,
        term: current_term,
        candidate_id: req.candidate_id,
    });

    RequestVoteResponse {
        term: current_term,
        vote_granted: true,
    }
}
