use crate::raft::RaftState;
use crate::rpc::*;
use tokio::sync::Mutex;

/// Handles a heartbeat from a leader.
///
/// A heartbeat of the current or a newer term makes this node a follower
/// of the sender and resets its election clock; an older one is refused so
/// the stale leader learns our term from the reply.
pub async fn handle_append_entries(
    req: &AppendEntriesRequest,
    state: &Mutex<RaftState>,
) -> AppendEntriesResponse {
    let mut state = state.lock().await;

    if req.term < state.persistent.current_term {
        tracing::info!(
            id=?state.id,
            leader_id=req.leader_id,
            req_term=req.term,
            current_term=state.persistent.current_term,
            "AppendEntries rejected: request term is older than current term"
        );
        return AppendEntriesResponse {
            term: state.persistent.current_term,
            success: false,
        };
    }

    if req.term > state.persistent.current_term {
        state.step_down(req.term);
        if let Err(e) = state.persist().await {
            tracing::error!(id=?state.id, error=?e, "Failed to persist state after term update");
            return AppendEntriesResponse {
                term: state.persistent.current_term,
                success: false,
            };
        }
    }

    state.become_follower(req.leader_id);
    state.touch();

    AppendEntriesResponse {
        term: state.persistent.current_term,
        success: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RaftEvent;
    use crate::raft::Role;
    use crate::storage::MemStorage;
    use std::time::Duration;

    fn create_test_state(term: u32, role: Role) -> Mutex<RaftState> {
        let mut state = RaftState::new(1, Box::new(MemStorage::default()));
        state.persistent.current_term = term;
        state.role = role;
        Mutex::new(state)
    }

    fn heartbeat(term: u32, leader_id: u32) -> AppendEntriesRequest {
        AppendEntriesRequest { term, leader_id }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_leader_is_rejected_without_state_change() {
        let state = create_test_state(2, Role::Leader);
        tokio::time::advance(Duration::from_millis(200)).await;

        let resp = handle_append_entries(&heartbeat(1, 0), &state).await;

        assert_eq!(
            resp,
            AppendEntriesResponse {
                term: 2,
                success: false
            }
        );
        let state = state.lock().await;
        assert_eq!(state.role, Role::Leader);
        assert_eq!(state.persistent.current_term, 2);
        assert!(state.since_last_contact() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_higher_term_heartbeat_steps_down_leader() {
        let state = create_test_state(2, Role::Leader);
        state.lock().await.persistent.voted_for = Some(1);

        let resp = handle_append_entries(&heartbeat(5, 3), &state).await;

        assert_eq!(
            resp,
            AppendEntriesResponse {
                term: 5,
                success: true
            }
        );
        let state = state.lock().await;
        assert_eq!(state.role, Role::Follower);
        assert_eq!(state.persistent.current_term, 5);
        assert_eq!(state.persistent.voted_for, None);
        assert_eq!(state.leader_id, Some(3));
    }

    #[tokio::test]
    async fn test_candidate_yields_to_leader_of_same_term() {
        let state = create_test_state(0, Role::Follower);
        state.lock().await.become_candidate();
        let mut events = state.lock().await.event_sender().subscribe();

        let resp = handle_append_entries(&heartbeat(1, 2), &state).await;

        assert!(resp.success);
        let s = state.lock().await;
        assert_eq!(s.role, Role::Follower);
        assert_eq!(s.persistent.current_term, 1);
        // Our own vote for this term stands.
        assert_eq!(s.persistent.voted_for, Some(1));
        assert_eq!(
            events.try_recv().ok(),
            Some(RaftEvent::SteppedDown { id: 1, term: 1 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_refreshes_last_contact() {
        let state = create_test_state(1, Role::Follower);
        tokio::time::advance(Duration::from_millis(700)).await;

        handle_append_entries(&heartbeat(1, 0), &state).await;

        let state = state.lock().await;
        assert!(state.since_last_contact() < Duration::from_millis(1));
        assert_eq!(state.leader_id, Some(0));
    }
}
