//! TCP front end of a node.
//!
//! Accepts tarpc connections from peers and forwards each call into the
//! node's command channel, where the dispatcher hands it to a handler.

use crate::node::Command;
use crate::rpc::*;
use futures::{future, prelude::*};
use std::net::SocketAddr;
use tarpc::{
    server::{self, Channel},
    tokio_serde::formats::Json,
};
use tokio::sync::{mpsc, oneshot};

const MAX_CONCURRENT_CHANNELS: usize = 16;
/// Every request is a couple of integers; anything larger is not a peer.
const MAX_FRAME_LENGTH: usize = 4 * 1024;

async fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}

/// Serves peer RPCs on `addr` until the listener fails.
pub async fn rpc_server(
    tx: mpsc::Sender<Command>,
    addr: SocketAddr,
) -> anyhow::Result<()> {
    let mut listener =
        tarpc::serde_transport::tcp::listen(&addr, Json::default).await?;
    listener.config_mut().max_frame_length(MAX_FRAME_LENGTH);
    tracing::info!(addr = %listener.local_addr(), "RPC server listening");

    listener
        .filter_map(|r| future::ready(r.ok()))
        .map(server::BaseChannel::with_defaults)
        .map(|channel| {
            let server = RaftServer { tx: tx.clone() };
            channel.execute(server.serve()).for_each(spawn)
        })
        .buffer_unordered(MAX_CONCURRENT_CHANNELS)
        .for_each(|_| async {})
        .await;

    Ok(())
}

#[derive(Clone)]
struct RaftServer {
    tx: mpsc::Sender<Command>,
}

impl RaftServer {
    /// Forwards one call to the node. `None` if the node has stopped
    /// answering.
    async fn forward<Resp>(
        &self,
        wrap: impl FnOnce(oneshot::Sender<Resp>) -> Command,
    ) -> Option<Resp> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(wrap(tx)).await.ok()?;
        rx.await.ok()
    }
}

// A stopped node answers with term 0 and a refusal, which callers treat
// like any other rejection.
impl RaftRpc for RaftServer {
    async fn append_entries(
        self,
        _: tarpc::context::Context,
        req: AppendEntriesRequest,
    ) -> AppendEntriesResponse {
        self.forward(|tx| Command::AppendEntries(req, tx))
            .await
            .unwrap_or(AppendEntriesResponse {
                term: 0,
                success: false,
            })
    }

    async fn request_vote(
        self,
        _: tarpc::context::Context,
        req: RequestVoteRequest,
    ) -> RequestVoteResponse {
        self.forward(|tx| Command::RequestVote(req, tx))
            .await
            .unwrap_or(RequestVoteResponse {
                term: 0,
                vote_granted: false,
            })
    }
}
