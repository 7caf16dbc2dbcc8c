//! Node assembly and lifecycle.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::{mpsc, Notify},
};
use tracing::error;

use minibit_core::Block;
use minibit_db::{ChainError, ChainStore, UtxoSet};
use minibit_mempool::TxPool;

use crate::{peers::PeerSet, NodeError};

/// Process-wide shutdown signal shared by the accept loops, the miner
/// and the RPC control plane.
#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

#[derive(Default)]
struct ShutdownInner {
    triggered: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the shutdown of every task watching this signal.
    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Completes once the shutdown has been requested.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

/// A minibit node.
pub struct Node {
    pub chain: ChainStore,
    pub utxo: UtxoSet,
    pub mempool: TxPool,
    pub peers: PeerSet,
    pub host_address: String,
    pub(crate) version: i32,
    pub(crate) miner: bool,
    pub(crate) new_blocks: mpsc::Sender<Block>,
    new_blocks_rx: Mutex<Option<mpsc::Receiver<Block>>>,
    shutdown: Shutdown,
}

impl Node {
    /// Creates a new node, loading the blockchain database or creating it
    /// with the genesis block and a fresh UTXO index.
    pub fn new(
        db_path: impl AsRef<Path>,
        host_address: String,
        seed_nodes: &[String],
        miner: bool,
    ) -> Result<Self, NodeError> {
        let chain = match ChainStore::load(&db_path) {
            Ok(chain) => chain,
            Err(ChainError::NotFound) => {
                let chain = ChainStore::create(&db_path)?;
                let utxo = UtxoSet {
                    chain: chain.clone(),
                };
                utxo.reindex()?;
                chain
            }
            Err(err) => return Err(err.into()),
        };

        let utxo = UtxoSet {
            chain: chain.clone(),
        };
        // The handler never blocks on this channel: a full slot already
        // carries the "new block" signal.
        let (new_blocks, new_blocks_rx) = mpsc::channel(1);

        Ok(Node {
            chain,
            utxo,
            mempool: TxPool::new(),
            peers: PeerSet::new(&host_address, seed_nodes),
            host_address,
            version: 1,
            miner,
            new_blocks,
            new_blocks_rx: Mutex::new(Some(new_blocks_rx)),
            shutdown: Shutdown::new(),
        })
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Binds the node's TCP listener on every interface, using the port
    /// of the advertised host address.
    pub async fn listen(&self) -> Result<TcpListener, NodeError> {
        let (_, port) = self
            .host_address
            .rsplit_once(':')
            .ok_or_else(|| NodeError::InvalidHostAddress(self.host_address.clone()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| NodeError::InvalidHostAddress(self.host_address.clone()))?;

        Ok(TcpListener::bind(("0.0.0.0", port)).await?)
    }

    /// Accepts and handles connections until the node shuts down.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.shutdown.wait() => return,
                accepted = listener.accept() => {
                    let stream = match accepted {
                        Ok((stream, _)) => stream,
                        Err(err) => {
                            error!("connection: {err}");
                            continue;
                        }
                    };

                    let node = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = node.handle_connection(stream).await {
                            error!("connection: {err}");
                        }
                    });
                }
            }
        }
    }

    /// Initiates the connection with the seed peers, sending our version
    /// to catch up with the network.
    pub async fn announce(&self) -> Result<(), NodeError> {
        for addr in self.peers.list() {
            self.send_version(&addr).await?;
        }
        Ok(())
    }

    /// Hands the miner preemption receiver to the mining task. Returns
    /// `None` after the first call.
    pub(crate) fn take_new_blocks(&self) -> Option<mpsc::Receiver<Block>> {
        self.new_blocks_rx.lock().unwrap().take()
    }

    /// Performs a one-shot request: dial, write the whole message, close.
    ///
    /// A peer that cannot be dialed is removed from the peer list; dial
    /// failures are logged, not returned.
    pub(crate) async fn request(&self, address: &str, data: &[u8]) -> Result<(), NodeError> {
        let mut stream = match TcpStream::connect(address).await {
            Ok(stream) => stream,
            Err(_) => {
                error!("peer {address:?} is not available");
                self.peers.remove(&[address.to_string()]);
                return Ok(());
            }
        };

        stream.write_all(data).await?;
        stream.shutdown().await?;
        Ok(())
    }
}
