use tarpc::serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(crate = "tarpc::serde")]
pub struct AppendEntriesRequest {
    pub term: u32,
    pub leader_id: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(crate = "tarpc::serde")]
pub struct AppendEntriesResponse {
    pub term: u32,
    pub success: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(crate = "tarpc::serde")]
pub struct RequestVoteRequest {
    pub term: u32,
    pub candidate_id: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(crate = "tarpc::serde")]
pub struct RequestVoteResponse {
    pub term: u32,
    pub vote_granted: bool,
}

#[tarpc::service]
pub trait RaftRpc {
    async fn append_entries(req: AppendEntriesRequest)
    -> AppendEntriesResponse;
    async fn request_vote(req: RequestVoteRequest) -> RequestVoteResponse;
}

/// A peer endpoint as seen by the election core.
///
/// Dyn-compatible, unlike the tarpc-generated `RaftRpc` trait, so TCP and
/// in-process transports can sit behind the same `Arc<dyn RaftRpcTrait>`.
/// An `Err` means the call failed; callers never retry it themselves.
#[async_trait::async_trait]
pub trait RaftRpcTrait: Send + Sync {
    async fn append_entries(
        &self,
        ctx: tarpc::context::Context,
        req: AppendEntriesRequest,
    ) -> anyhow::Result<AppendEntriesResponse>;

    async fn request_vote(
        &self,
        ctx: tarpc::context::Context,
        req: RequestVoteRequest,
    ) -> anyhow::Result<RequestVoteResponse>;
}
