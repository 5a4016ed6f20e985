use crate::events::RaftEvent;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const EVENT_CAPACITY: usize = 1024;

/// The part of a node's state that must survive a restart.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct PersistentState {
    pub current_term: u32,
    pub voted_for: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Role {
    #[default]
    Follower,
    Candidate,
    Leader,
}

impl Role {
    pub fn is_follower(&self) -> bool {
        matches!(self, Role::Follower)
    }

    pub fn is_candidate(&self) -> bool {
        matches!(self, Role::Candidate)
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader)
    }
}

/// Mutable record of a single peer.
///
/// Every field is read and written only while holding the node's state
/// lock; the transition methods below assume the caller holds it.
#[derive(Debug)]
pub struct RaftState {
    pub persistent: PersistentState,
    pub role: Role,
    pub leader_id: Option<u32>,
    /// Last accepted heartbeat, granted vote, or own candidacy.
    pub last_contact: Instant,
    pub id: u32,

    storage: Box<dyn Storage>,
    events: broadcast::Sender<RaftEvent>,
}

impl RaftState {
    pub fn new(id: u32, storage: Box<dyn Storage>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            persistent: PersistentState::default(),
            role: Role::Follower,
            leader_id: None,
            last_contact: Instant::now(),
            id,
            storage,
            events,
        }
    }

    pub async fn persist(&mut self) -> anyhow::Result<()> {
        self.storage.save(&self.persistent).await
    }

    pub async fn load_persisted(
        &self,
    ) -> anyhow::Result<Option<PersistentState>> {
        self.storage.load().await
    }

    pub fn restore_from(&mut self, persisted: PersistentState) {
        self.persistent = persisted;
    }

    pub fn event_sender(&self) -> broadcast::Sender<RaftEvent> {
        self.events.clone()
    }

    pub(crate) fn emit(&self, event: RaftEvent) {
        // No subscribers is the common case outside of tests.
        let _ = self.events.send(event);
    }

    pub fn touch(&mut self) {
        self.last_contact = Instant::now();
    }

    pub fn since_last_contact(&self) -> Duration {
        self.last_contact.elapsed()
    }

    /// Adopts a term observed from a peer. The only path by which a
    /// peer's term advances ours.
    ///
    /// Does not refresh `last_contact`: a node forced down this way may
    /// still time out and campaign again.
    pub fn step_down(&mut self, higher_term: u32) {
        debug_assert!(higher_term > self.persistent.current_term);
        tracing::info!(
            id = self.id,
            from_term = self.persistent.current_term,
            to_term = higher_term,
            role = ?self.role,
            "stepping down: observed higher term"
        );
        self.persistent.current_term = higher_term;
        self.persistent.voted_for = None;
        self.role = Role::Follower;
        self.leader_id = None;
        self.emit(RaftEvent::SteppedDown {
            id: self.id,
            term: higher_term,
        });
    }

    /// Yields to a leader of the current term without touching the term
    /// or the vote.
    pub fn become_follower(&mut self, leader_id: u32) {
        if !self.role.is_follower() {
            tracing::info!(
                id = self.id,
                term = self.persistent.current_term,
                leader_id,
                "yielding to leader of current term"
            );
            self.role = Role::Follower;
            self.emit(RaftEvent::SteppedDown {
                id: self.id,
                term: self.persistent.current_term,
            });
        }
        self.leader_id = Some(leader_id);
    }

    /// Starts a new term with a vote for ourselves. Returns the new term.
    pub fn become_candidate(&mut self) -> u32 {
        self.persistent.current_term += 1;
        self.persistent.voted_for = Some(self.id);
        self.role = Role::Candidate;
        self.leader_id = None;
        self.touch();
        self.emit(RaftEvent::ElectionStarted {
            id: self.id,
            term: self.persistent.current_term,
        });
        self.persistent.current_term
    }

    pub fn become_leader(&mut self) {
        self.role = Role::Leader;
        self.leader_id = Some(self.id);
        self.emit(RaftEvent::BecameLeader {
            id: self.id,
            term: self.persistent.current_term,
        });
    }
}
