//! CPU miner.

use std::sync::Arc;

use num_bigint::{BigInt, Sign};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::info;

use minibit_core::{difficulty::compact_to_big, Block, Tx};
use minibit_db::ChainStore;
use minibit_mempool::TxPool;
use minibit_wallet::{address, Wallet};

use crate::{
    node::{Node, Shutdown},
    NodeError,
};

const MAX_NONCE: u32 = u32::MAX;

/// Mines blocks using the CPU, one nonce at a time.
#[derive(Clone)]
pub struct CpuMiner {
    /// Address where mining rewards will be sent.
    coinbase_addr: String,
    chain: ChainStore,
}

impl CpuMiner {
    /// Returns an object that mines blocks with the CPU.
    pub fn new(coinbase_addr: String, chain: ChainStore) -> Self {
        CpuMiner {
            coinbase_addr,
            chain,
        }
    }

    /// Solves a block's puzzle and returns the mined block if it
    /// succeeds.
    ///
    /// Returns `Ok(None)` when the search was preempted because another
    /// node already mined a block, leaving the mempool untouched. On
    /// success the block's non-coinbase transactions are removed from the
    /// pool.
    pub fn mine(
        &self,
        prev_block: &Block,
        pool: &TxPool,
        new_blocks: &mut mpsc::Receiver<Block>,
        shutdown: &Shutdown,
    ) -> Result<Option<Block>, NodeError> {
        let mut block = self.build_block(prev_block, pool)?;

        if !self.search(&mut block, new_blocks, shutdown) {
            return Ok(None);
        }

        // Remove the block's transactions from the mempool,
        // ignoring the first transaction (coinbase)
        for tx in &block.transactions[1..] {
            pool.remove(&tx.id);
        }

        Ok(Some(block))
    }

    /// Creates the candidate block and populates it with transactions
    /// from the pool.
    fn build_block(&self, prev_block: &Block, pool: &TxPool) -> Result<Block, NodeError> {
        let mut transactions = Vec::with_capacity(pool.count() + 1);
        let mut fees = 0;
        pool.for_each(|_, tx| {
            fees += tx.fee;
            transactions.push(tx.clone());
        });

        // Create the transaction that sends us the subsidy and fees if we
        // succeed
        let to_pub_key_hash = address::decode_pub_key_hash(&self.coinbase_addr)?;
        let coinbase = Tx::new_coinbase(to_pub_key_hash, &[], fees, prev_block.height + 1)?;
        transactions.insert(0, coinbase);

        let bits = self.chain.next_difficulty_bits(prev_block)?;
        Ok(Block::new(prev_block, transactions, bits)?)
    }

    /// Hashes the block data with different nonces until it finds a hash
    /// lower than the target.
    ///
    /// The preemption channel is checked on every iteration, so
    /// cancellation is bounded by one hash operation.
    fn search(
        &self,
        block: &mut Block,
        new_blocks: &mut mpsc::Receiver<Block>,
        shutdown: &Shutdown,
    ) -> bool {
        let data = block.pow_data();
        let target = compact_to_big(block.header.bits);

        for nonce in 0..MAX_NONCE {
            if shutdown.is_triggered() {
                return false;
            }
            match new_blocks.try_recv() {
                Ok(_) => {
                    // Stop mining if another node has already completed
                    // the task
                    info!("new block received");
                    return false;
                }
                Err(TryRecvError::Disconnected) => return false,
                Err(TryRecvError::Empty) => {}
            }

            let mut full_data = data.clone();
            full_data.extend_from_slice(&i64::from(nonce).to_be_bytes());
            let hash = Sha256::digest(&full_data);

            // The hash has to be lower than the target to be accepted
            if BigInt::from_bytes_be(Sign::Plus, &hash) <= target {
                block.header.nonce = nonce;
                block.hash = hash.to_vec();
                info!("new block mined: {}", hex::encode(&block.hash));
                return true;
            }
        }

        false
    }
}

/// Runs the mining loop until the node shuts down.
///
/// Every won block is broadcast to the peers, appended to the chain and
/// applied to the UTXO set before the next attempt starts.
pub async fn run(node: Arc<Node>, account_name: &str) -> Result<(), NodeError> {
    let wallet = Wallet::load()?;
    let account = wallet
        .account(account_name)
        .ok_or_else(|| minibit_wallet::WalletError::UnknownAccount(account_name.to_string()))?;
    let coinbase_addr = account.new_address(true);
    wallet.save()?;

    info!("mining rewards and fees will be sent to: {coinbase_addr}");

    let miner = CpuMiner::new(coinbase_addr, node.chain.clone());
    let mut new_blocks = node.take_new_blocks().ok_or(NodeError::MinerAlreadyRunning)?;

    loop {
        if node.shutdown().is_triggered() {
            return Ok(());
        }

        let prev_block = node.chain.last_block()?;

        // The nonce search is pure CPU work, keep it off the async
        // executor.
        let task_miner = miner.clone();
        let task_node = Arc::clone(&node);
        let (result, receiver) = tokio::task::spawn_blocking(move || {
            let mut new_blocks = new_blocks;
            let result = task_miner.mine(
                &prev_block,
                &task_node.mempool,
                &mut new_blocks,
                task_node.shutdown(),
            );
            (result, new_blocks)
        })
        .await
        .map_err(|err| NodeError::MinerTask(err.to_string()))?;
        new_blocks = receiver;

        // The computation was cancelled because the block has been mined
        // by another node, continue to the next one.
        let Some(block) = result? else { continue };

        // Broadcast the newly mined block
        for addr in node.peers.list() {
            node.send_block(&addr, &block).await?;
        }

        node.chain.add_block(&block)?;
        node.utxo.update(&block)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use minibit_db::UtxoSet;

    const MINER_ADDR: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    fn test_chain() -> (tempfile::TempDir, ChainStore) {
        let dir = tempfile::tempdir().unwrap();
        let chain = ChainStore::create(dir.path().join("blockchain.db")).unwrap();
        UtxoSet {
            chain: chain.clone(),
        }
        .reindex()
        .unwrap();
        (dir, chain)
    }

    /// Appends a block with an easy difficulty so the miner inherits a
    /// target it can hit within a few nonces.
    fn append_easy_block(chain: &ChainStore) -> Block {
        let prev = chain.last_block().unwrap();
        let coinbase = Tx::new_coinbase(vec![1; 20], &[], 0, prev.height + 1).unwrap();
        let mut block = Block::new(&prev, vec![coinbase], 0x207fffff).unwrap();

        let data = block.pow_data();
        let target = compact_to_big(block.header.bits);
        for nonce in 0..MAX_NONCE {
            let mut full = data.clone();
            full.extend_from_slice(&i64::from(nonce).to_be_bytes());
            let hash = Sha256::digest(&full);
            if BigInt::from_bytes_be(Sign::Plus, &hash) <= target {
                block.header.nonce = nonce;
                block.hash = hash.to_vec();
                break;
            }
        }

        chain.add_block(&block).unwrap();
        block
    }

    #[test]
    fn preemption_aborts_the_attempt() {
        let (_dir, chain) = test_chain();
        let pool = TxPool::new();
        pool.add(Tx::new_coinbase(vec![2; 20], b"pending", 0, 1).unwrap());

        let (sender, mut receiver) = mpsc::channel(1);
        sender
            .try_send(chain.last_block().unwrap())
            .expect("free slot");

        let miner = CpuMiner::new(MINER_ADDR.to_string(), chain.clone());
        let prev = chain.last_block().unwrap();
        let mined = miner
            .mine(&prev, &pool, &mut receiver, &Shutdown::new())
            .unwrap();

        assert!(mined.is_none());
        assert_eq!(pool.count(), 1);
    }

    #[test]
    fn shutdown_stops_the_search() {
        let (_dir, chain) = test_chain();
        let (_sender, mut receiver) = mpsc::channel(1);
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let miner = CpuMiner::new(MINER_ADDR.to_string(), chain.clone());
        let prev = chain.last_block().unwrap();
        let mined = miner
            .mine(&prev, &TxPool::new(), &mut receiver, &shutdown)
            .unwrap();
        assert!(mined.is_none());
    }

    #[test]
    fn mines_pool_transactions_into_a_block() {
        let (_dir, chain) = test_chain();
        let easy = append_easy_block(&chain);

        let pool = TxPool::new();
        let pending = Tx::new(
            vec![minibit_core::Input {
                prev_output: minibit_core::OutPoint {
                    txid: vec![9; 32],
                    index: 0,
                },
                ..Default::default()
            }],
            vec![minibit_core::Output {
                pub_key_hash: vec![3; 20],
                value: 1,
            }],
            25,
        )
        .unwrap();
        pool.add(pending.clone());

        let (_sender, mut receiver) = mpsc::channel(1);
        let miner = CpuMiner::new(MINER_ADDR.to_string(), chain.clone());
        let mined = miner
            .mine(&easy, &pool, &mut receiver, &Shutdown::new())
            .unwrap()
            .expect("block mined");

        assert!(mined.is_valid());
        assert_eq!(mined.height, easy.height + 1);
        assert_eq!(mined.transactions.len(), 2);
        assert!(mined.transactions[0].is_coinbase());
        assert!(mined.transactions.iter().any(|tx| tx.id == pending.id));
        // The coinbase collects the pool fees on top of the subsidy.
        assert_eq!(
            mined.transactions[0].outputs[0].value,
            minibit_core::tx::block_subsidy(mined.height) + pending.fee
        );

        // The mined transactions left the pool.
        assert_eq!(pool.count(), 0);
    }
}
