use bytes::Bytes;

/// Notification sent to the owning service for each committed entry.
///
/// Produced by the log-replication layer; the election core only carries
/// the sending half (see `Node::apply_sender`). New kinds of notification
/// (for instance snapshots) get their own variant.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ApplyMsg {
    Command { command: Bytes, index: u32 },
}
