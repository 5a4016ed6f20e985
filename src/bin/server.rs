use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::Instrument;

use senkyo::config::Config;
use senkyo::network::TarpcPeer;
use senkyo::node::{Node, Peer};
use senkyo::server::rpc_server;
use senkyo::storage::FileStorage;
use senkyo::trace::init_tracing;

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "senkyo-server")]
#[command(about = "Raft leader election node", long_about = None)]
struct Args {
    /// Index of this node in `--peers`.
    #[arg(short, long)]
    id: u32,

    /// Addresses of every cluster member, this node included, in id order.
    #[arg(long, value_delimiter = ',', required = true)]
    peers: Vec<SocketAddr>,

    #[arg(short, long, default_value = ".")]
    storage_dir: std::path::PathBuf,

    #[arg(long, default_value = "150")]
    heartbeat_interval_ms: u64,

    #[arg(long, default_value = "300")]
    election_timeout_min_ms: u64,

    #[arg(long, default_value = "1200")]
    election_timeout_max_ms: u64,

    #[arg(long, default_value = "30")]
    election_poll_interval_ms: u64,

    #[arg(long, default_value = "500")]
    rpc_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let tracer_provider = init_tracing("senkyo-server")?;

    let result = run(args).await;

    tracer_provider.shutdown()?;
    result
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = Config {
        heartbeat_interval: Duration::from_millis(args.heartbeat_interval_ms),
        election_timeout_min: Duration::from_millis(
            args.election_timeout_min_ms,
        ),
        election_timeout_max: Duration::from_millis(
            args.election_timeout_max_ms,
        ),
        election_poll_interval: Duration::from_millis(
            args.election_poll_interval_ms,
        ),
        rpc_timeout: Duration::from_millis(args.rpc_timeout_ms),
    };
    config.validate()?;

    let bind_addr = *args.peers.get(args.id as usize).ok_or_else(|| {
        anyhow::anyhow!(
            "id {} is out of range for {} peers",
            args.id,
            args.peers.len()
        )
    })?;
    let peers: Vec<Peer> = args
        .peers
        .iter()
        .map(|addr| Arc::new(TarpcPeer::new(*addr)) as Peer)
        .collect();

    tracing::info!("Starting node {} on {}", args.id, bind_addr);
    tracing::info!("Peers: {:?}", args.peers);

    let storage_dir = args.storage_dir.join(format!("node-{}", args.id));
    let (apply_tx, mut apply_rx) = tokio::sync::mpsc::unbounded_channel();
    let node = Node::spawn(
        args.id,
        peers,
        config,
        Box::new(FileStorage::new(storage_dir)),
        apply_tx,
    )
    .await?;
    tracing::info!(timeout = ?node.election_timeout(), "election timeout");

    let span = tracing::info_span!("node", id = args.id);
    let mut server = tokio::spawn(
        rpc_server(node.command_sender(), bind_addr).instrument(span),
    );
    tokio::spawn(async move {
        while let Some(msg) = apply_rx.recv().await {
            tracing::info!(?msg, "applied");
        }
    });

    let outcome =
        supervise(&node, &mut server, tokio::signal::ctrl_c()).await;

    node.kill();
    server.abort();
    outcome
}

/// Logs the node's status every `STATUS_INTERVAL` until `shutdown`
/// resolves or the RPC server stops.
async fn supervise<S>(
    node: &Node,
    server: &mut JoinHandle<anyhow::Result<()>>,
    shutdown: S,
) -> anyhow::Result<()>
where
    S: Future,
{
    tokio::pin!(shutdown);
    let mut status = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            _ = status.tick() => {
                let s = node.status().await;
                tracing::info!(
                    term = s.term,
                    role = ?s.role,
                    leader = ?s.leader_id,
                    "status"
                );
            }
            _ = &mut shutdown => {
                tracing::info!("shutting down");
                return Ok(());
            }
            res = &mut *server => {
                return match res {
                    Ok(Ok(())) => Err(anyhow::anyhow!("RPC server exited")),
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(e.into()),
                };
            }
        }
    }
}
