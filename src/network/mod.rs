pub mod sim;

use crate::rpc::*;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Instant;
use tarpc::{client, context, tokio_serde::formats::Json};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Network error: {0}")]
    Other(String),
}

/// TCP endpoint of a remote node.
///
/// Connects on first use and again after any failed call, so a peer that
/// is down at startup or restarts later is picked up without intervention.
pub struct TarpcPeer {
    addr: SocketAddr,
    client: Mutex<Option<RaftRpcClient>>,
}

impl TarpcPeer {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            client: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn client(
        &self,
        ctx: &context::Context,
    ) -> Result<RaftRpcClient, NetworkError> {
        let mut client = self.client.lock().await;
        if let Some(client) = client.as_ref() {
            return Ok(client.clone());
        }

        let remaining = ctx.deadline.saturating_duration_since(Instant::now());
        let transport = tokio::time::timeout(
            remaining,
            tarpc::serde_transport::tcp::connect(self.addr, Json::default),
        )
        .await
        .map_err(|_| NetworkError::Timeout)?
        .map_err(|e| {
            NetworkError::ConnectionFailed(format!(
                "Failed to connect to {}: {}",
                self.addr, e
            ))
        })?;

        let connected =
            RaftRpcClient::new(client::Config::default(), transport).spawn();
        *client = Some(connected.clone());
        Ok(connected)
    }

    async fn on_error(&self, error: &client::RpcError) {
        // A slow peer keeps its connection; anything else reconnects.
        if !matches!(error, client::RpcError::DeadlineExceeded) {
            self.client.lock().await.take();
        }
    }
}

#[async_trait]
impl RaftRpcTrait for TarpcPeer {
    async fn append_entries(
        &self,
        ctx: context::Context,
        req: AppendEntriesRequest,
    ) -> anyhow::Result<AppendEntriesResponse> {
        let client = self.client(&ctx).await?;
        match client.append_entries(ctx, req).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                self.on_error(&e).await;
                Err(e.into())
            }
        }
    }

    async fn request_vote(
        &self,
        ctx: context::Context,
        req: RequestVoteRequest,
    ) -> anyhow::Result<RequestVoteResponse> {
        let client = self.client(&ctx).await?;
        match client.request_vote(ctx, req).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                self.on_error(&e).await;
                Err(e.into())
            }
        }
    }
}
