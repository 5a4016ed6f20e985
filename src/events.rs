/// Role and vote transitions, published by every node on a broadcast
/// channel (see `Node::subscribe`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaftEvent {
    ElectionStarted {
        id: u32,
        term: u32,
    },
    BecameLeader {
        id: u32,
        term: u32,
    },
    /// Became a follower, either on a higher term or by yielding to the
    /// leader of the current one.
    SteppedDown {
        id: u32,
        term: u32,
    },
    VoteGranted {
        id: u32,
        term: u32,
        candidate_id: u32,
    },
}

impl RaftEvent {
    pub fn term(&self) -> u32 {
        match self {
            RaftEvent::ElectionStarted { term, .. }
            | RaftEvent::BecameLeader { term, .. }
            | RaftEvent::SteppedDown { term, .. }
            | RaftEvent::VoteGranted { term, .. } => *term,
        }
    }
}
