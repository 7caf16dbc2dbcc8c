use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use minibit_net::{miner, Node};
use minibit_rpc::{spawn_rpc_server, RpcContext, RPC_ADDRESS};

const SEED_NODES: [&str; 3] = ["node1:3000", "node2:4000", "node3:5000"];

/// Command-line arguments for the minibit node.
#[derive(Parser, Debug)]
#[command(name = "minibit", about = "minibit node server", version)]
struct Args {
    /// Name of the wallet account receiving mining rewards.
    account: String,

    /// Node server address, advertised to peers. Falls back to the
    /// NODE_ADDR environment variable.
    #[arg(short, long)]
    address: Option<String>,

    /// Addresses of the nodes to connect to.
    #[arg(short, long)]
    nodes: Vec<String>,

    /// Whether the node will perform mining operations.
    #[arg(short, long, default_value_t = false)]
    miner: bool,

    /// Path to the blockchain database.
    #[arg(long, default_value = "blockchain.db")]
    db: PathBuf,

    /// Set the logger mode to debug.
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let address = args
        .address
        .or_else(|| std::env::var("NODE_ADDR").ok())
        .ok_or_else(|| anyhow!("no address was provided"))?;

    let seed_nodes = if args.nodes.is_empty() {
        SEED_NODES.iter().map(|s| s.to_string()).collect()
    } else {
        args.nodes
    };

    let node = Arc::new(Node::new(&args.db, address, &seed_nodes, args.miner)?);

    let listener = node.listen().await?;
    info!("starting node server at {}", node.host_address);
    tokio::spawn(Arc::clone(&node).serve(listener));

    let rpc = spawn_rpc_server(
        RPC_ADDRESS,
        RpcContext {
            node: Arc::clone(&node),
        },
    )
    .await?;
    info!("starting RPC server at {RPC_ADDRESS}");

    // Initiate the connection with the version message to catch up with
    // the network.
    node.announce().await?;

    if args.miner {
        let miner_node = Arc::clone(&node);
        let account = args.account.clone();
        tokio::spawn(async move {
            if let Err(err) = miner::run(miner_node, &account).await {
                error!("mining: {err}");
                std::process::exit(1);
            }
        });
    }

    // Run until an interrupt or an RPC stop request arrives.
    tokio::select! {
        _ = signal::ctrl_c() => {}
        _ = node.shutdown().wait() => {}
    }

    node.shutdown().trigger();
    let _ = rpc.stop();
    info!("server stopped");

    Ok(())
}

fn init_tracing(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
