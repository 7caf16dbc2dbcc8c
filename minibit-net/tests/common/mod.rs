//! Shared helpers for the protocol tests.

use std::{sync::Arc, time::Duration};

use num_bigint::{BigInt, Sign};
use sha2::{Digest, Sha256};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::{sleep, timeout},
};

use minibit_core::{difficulty::compact_to_big, Block, Tx};
use minibit_net::{
    message::{Command, COMMAND_LENGTH},
    Node,
};

/// An easy difficulty so test blocks mine within a few nonces.
pub const EASY_BITS: u32 = 0x207fffff;

/// Starts a node with a fresh chain listening on an ephemeral local
/// port.
pub async fn spawn_node(miner: bool) -> (tempfile::TempDir, Arc<Node>) {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let host_address = listener.local_addr().unwrap().to_string();

    let node = Node::new(dir.path().join("blockchain.db"), host_address, &[], miner).unwrap();
    let node = Arc::new(node);
    tokio::spawn(Arc::clone(&node).serve(listener));

    (dir, node)
}

/// Searches a valid nonce for a candidate block.
pub fn solve(mut block: Block) -> Block {
    let data = block.pow_data();
    let target = compact_to_big(block.header.bits);
    for nonce in 0..u32::MAX {
        let mut full = data.clone();
        full.extend_from_slice(&i64::from(nonce).to_be_bytes());
        let hash = Sha256::digest(&full);
        if BigInt::from_bytes_be(Sign::Plus, &hash) <= target {
            block.header.nonce = nonce;
            block.hash = hash.to_vec();
            break;
        }
    }
    block
}

/// Mines a successor block with an easy difficulty, appending a coinbase
/// for the given key hash in front of `txs`.
pub fn easy_block(prev: &Block, mut txs: Vec<Tx>, to_pub_key_hash: Vec<u8>) -> Block {
    let fees = txs.iter().map(|tx| tx.fee).sum();
    let coinbase = Tx::new_coinbase(to_pub_key_hash, &[], fees, prev.height + 1).unwrap();
    txs.insert(0, coinbase);
    solve(Block::new(prev, txs, EASY_BITS).unwrap())
}

/// A scripted peer: a plain TCP listener that records the one-shot
/// messages a node sends to it.
pub struct FakePeer {
    listener: TcpListener,
    pub address: String,
}

impl FakePeer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        FakePeer { listener, address }
    }

    /// Waits for the next message sent to this peer.
    pub async fn recv(&self) -> (Command, Vec<u8>) {
        let message = timeout(Duration::from_secs(5), async {
            let (mut stream, _) = self.listener.accept().await.unwrap();
            let mut message = Vec::new();
            stream.read_to_end(&mut message).await.unwrap();
            message
        })
        .await
        .expect("no message received");

        let command = Command::from_bytes(&message[..COMMAND_LENGTH]).expect("known command");
        (command, message)
    }

    /// Asserts that no message arrives within a grace period.
    pub async fn expect_silence(&self) {
        let result = timeout(Duration::from_millis(300), self.listener.accept()).await;
        assert!(result.is_err(), "unexpected message received");
    }

    /// Sends a raw message to the given address.
    pub async fn send(&self, to: &str, message: &[u8]) {
        let mut stream = TcpStream::connect(to).await.unwrap();
        stream.write_all(message).await.unwrap();
        stream.shutdown().await.unwrap();
    }
}

/// Polls until the condition holds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not met in time");
}
