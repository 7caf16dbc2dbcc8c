//! Durable blockchain storage for minibit.
//!
//! Uses sled (an embedded key-value store) with two trees:
//! - `blocks`: block hash -> encoded block, plus the reserved key `l`
//!   holding the hash of the chain tip
//! - `chainstate`: transaction id -> encoded list of unspent outputs
//!   (the UTXO cache, see [`UtxoSet`])

mod iter;
mod utxo;

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, RwLock},
};

use secp256k1::SecretKey;
use thiserror::Error;

use minibit_core::{
    difficulty::{retarget_bits, BLOCKS_RETARGET_PERIOD},
    Block, CoreError, Output, Tx,
};

pub use iter::ChainIterator;
pub use utxo::{new_transaction, SpendableOutputs, UtxoSet};

const BLOCKS_TREE: &str = "blocks";
const CHAINSTATE_TREE: &str = "chainstate";

/// Reserved key holding the hash of the last block in the chain.
const LAST_HASH_KEY: &[u8] = b"l";

/// Chain storage errors.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("blockchain already exists")]
    AlreadyExists,
    #[error("blockchain not found")]
    NotFound,
    #[error("empty blockchain")]
    EmptyChain,
    #[error("invalid block")]
    InvalidPow,
    #[error("block already exists")]
    DuplicateBlock,
    #[error("block not found")]
    UnknownBlock,
    #[error("transaction {0} already exists")]
    DuplicateTx(String),
    #[error("transaction not found")]
    UnknownTx,
    #[error("invalid transaction signature")]
    InvalidSignature,
    #[error("transaction has no inputs")]
    NoInputs,
    #[error("transaction has no outputs")]
    NoOutputs,
    #[error("account has not enough funds")]
    InsufficientFunds,
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Wallet(#[from] minibit_wallet::WalletError),
    #[error(transparent)]
    Storage(#[from] sled::Error),
    #[error(transparent)]
    Encoding(#[from] bincode::Error),
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
}

/// Read/write handle over the blockchain database.
///
/// Sled's `Db` and `Tree` types are internally Arc-wrapped, so cloning is
/// cheap and every clone shares the same tip.
#[derive(Clone)]
pub struct ChainStore {
    _db: sled::Db,
    blocks: sled::Tree,
    pub(crate) chainstate: sled::Tree,
    /// Hash of the last accepted block. The write lock also serializes
    /// block appends.
    tip: Arc<RwLock<Vec<u8>>>,
}

impl ChainStore {
    /// Creates a new blockchain database and writes the genesis block.
    ///
    /// Fails with [`ChainError::AlreadyExists`] if there is already a
    /// database at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ChainError> {
        if path.as_ref().exists() {
            return Err(ChainError::AlreadyExists);
        }

        let db = sled::open(path)?;
        let blocks = db.open_tree(BLOCKS_TREE)?;
        let chainstate = db.open_tree(CHAINSTATE_TREE)?;

        let genesis = Block::genesis()?;
        let mut batch = sled::Batch::default();
        batch.insert(genesis.hash.clone(), bincode::serialize(&genesis)?);
        batch.insert(LAST_HASH_KEY, genesis.hash.clone());
        blocks.apply_batch(batch)?;

        Ok(ChainStore {
            _db: db,
            blocks,
            chainstate,
            tip: Arc::new(RwLock::new(genesis.hash)),
        })
    }

    /// Opens an existing blockchain database and loads the tip of the
    /// chain.
    ///
    /// Fails with [`ChainError::NotFound`] if no database exists at
    /// `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ChainError> {
        if !path.as_ref().exists() {
            return Err(ChainError::NotFound);
        }

        let db = sled::open(path)?;
        let blocks = db.open_tree(BLOCKS_TREE)?;
        let chainstate = db.open_tree(CHAINSTATE_TREE)?;

        let tip = blocks
            .get(LAST_HASH_KEY)?
            .ok_or(ChainError::NotFound)?
            .to_vec();

        Ok(ChainStore {
            _db: db,
            blocks,
            chainstate,
            tip: Arc::new(RwLock::new(tip)),
        })
    }

    /// Returns an iterator over the chain from the tip to the genesis
    /// block.
    pub fn iter(&self) -> ChainIterator {
        ChainIterator::new(self.blocks.clone(), self.tip.read().unwrap().clone())
    }

    /// Validates the block and appends it to the chain.
    ///
    /// The tip only advances when the block is higher than the current
    /// one, so blocks arriving out of order during synchronization cannot
    /// move it backwards.
    pub fn add_block(&self, block: &Block) -> Result<(), ChainError> {
        if !block.is_valid() {
            return Err(ChainError::InvalidPow);
        }

        for tx in &block.transactions {
            self.verify_tx(tx)?;
        }

        let mut tip = self.tip.write().unwrap();

        if self.blocks.contains_key(&block.hash)? {
            return Err(ChainError::DuplicateBlock);
        }

        let best_height = self.height_of(&tip)?;

        let mut batch = sled::Batch::default();
        batch.insert(block.hash.clone(), bincode::serialize(block)?);
        if block.height > best_height {
            batch.insert(LAST_HASH_KEY, block.hash.clone());
        }
        self.blocks.apply_batch(batch)?;

        if block.height > best_height {
            *tip = block.hash.clone();
        }

        Ok(())
    }

    /// Finds a block by its hash and returns it.
    pub fn block(&self, hash: &[u8]) -> Result<Block, ChainError> {
        let data = self.blocks.get(hash)?.ok_or(ChainError::UnknownBlock)?;
        Ok(bincode::deserialize(&data)?)
    }

    /// Returns the last block in the chain.
    pub fn last_block(&self) -> Result<Block, ChainError> {
        let tip = self.tip.read().unwrap().clone();
        if tip.is_empty() {
            return Err(ChainError::EmptyChain);
        }
        self.block(&tip)
    }

    /// Returns the height of the latest block.
    pub fn best_height(&self) -> Result<i32, ChainError> {
        match self.last_block() {
            Ok(block) => Ok(block.height),
            // If the blockchain has no blocks (new validator blockchain)
            // return -1 so nodes with at least one block send us it.
            Err(ChainError::EmptyChain) => Ok(-1),
            Err(err) => Err(err),
        }
    }

    /// Returns the hashes of all the blocks in the chain, tip first.
    pub fn blocks_hashes(&self) -> Result<Vec<Vec<u8>>, ChainError> {
        let mut hashes = Vec::new();
        for block in self.iter() {
            hashes.push(block?.hash);
        }
        Ok(hashes)
    }

    /// Looks for a transaction by its id.
    ///
    /// It returns the block containing the transaction and the transaction
    /// itself.
    pub fn find_transaction(&self, id: &[u8]) -> Result<(Block, Tx), ChainError> {
        for block in self.iter() {
            let block = block?;
            if let Some(tx) = block.transactions.iter().find(|tx| tx.id == id) {
                let tx = tx.clone();
                return Ok((block, tx));
            }
        }

        Err(ChainError::UnknownTx)
    }

    /// Finds all unspent transaction outputs and returns transactions with
    /// spent outputs removed, keyed by hex-encoded transaction id.
    pub fn find_utxos(&self) -> Result<HashMap<String, Vec<Output>>, ChainError> {
        let mut utxos: HashMap<String, Vec<Output>> = HashMap::new();
        let mut spent: HashMap<String, Vec<i64>> = HashMap::new();

        // Walking tip-to-genesis guarantees an output's spender is seen
        // before the output itself.
        for block in self.iter() {
            let block = block?;
            for tx in &block.transactions {
                let txid = hex::encode(&tx.id);

                for (index, output) in tx.outputs.iter().enumerate() {
                    let spent_indices = spent.get(&txid);
                    let is_spent = spent_indices
                        .is_some_and(|indices| indices.contains(&(index as i64)));
                    if !is_spent {
                        utxos.entry(txid.clone()).or_default().push(output.clone());
                    }
                }

                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        spent
                            .entry(hex::encode(&input.prev_output.txid))
                            .or_default()
                            .push(input.prev_output.index);
                    }
                }
            }
        }

        Ok(utxos)
    }

    /// Computes the difficulty bits for the block following `prev_block`.
    ///
    /// Outside a retarget boundary this is the previous block's
    /// difficulty; at a boundary the timestamp of the block that started
    /// the window is read by walking the chain backwards from
    /// `prev_block`.
    pub fn next_difficulty_bits(&self, prev_block: &Block) -> Result<u32, ChainError> {
        let next_height = prev_block.height + 1;
        if next_height % BLOCKS_RETARGET_PERIOD != 0 {
            return Ok(prev_block.header.bits);
        }

        let mut boundary = prev_block.clone();
        for _ in 0..BLOCKS_RETARGET_PERIOD - 1 {
            boundary = self.block(&boundary.header.prev_block_hash)?;
        }

        let actual_timespan = prev_block.header.timestamp - boundary.header.timestamp;
        Ok(retarget_bits(prev_block.header.bits, actual_timespan))
    }

    /// Signs the inputs of a transaction with the referenced outputs found
    /// in the chain.
    pub fn sign_transaction(&self, tx: &mut Tx, secret: &SecretKey) -> Result<(), ChainError> {
        let prev_txs = self.previous_transactions(tx)?;
        tx.sign(secret, &prev_txs)?;
        Ok(())
    }

    /// Returns an error if a transaction is not valid.
    pub fn verify_tx(&self, tx: &Tx) -> Result<(), ChainError> {
        if tx.is_coinbase() {
            return Ok(());
        }

        if tx.inputs.is_empty() {
            return Err(ChainError::NoInputs);
        }
        if tx.outputs.is_empty() {
            return Err(ChainError::NoOutputs);
        }

        // Reject transactions already in the blockchain
        if self.find_transaction(&tx.id).is_ok() {
            return Err(ChainError::DuplicateTx(hex::encode(&tx.id)));
        }

        let prev_txs = self.previous_transactions(tx)?;
        if !tx.verify(&prev_txs)? {
            return Err(ChainError::InvalidSignature);
        }

        Ok(())
    }

    fn previous_transactions(&self, tx: &Tx) -> Result<HashMap<String, Tx>, ChainError> {
        let mut prev_txs = HashMap::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            let (_, prev_tx) = self.find_transaction(&input.prev_output.txid)?;
            prev_txs.insert(hex::encode(&prev_tx.id), prev_tx);
        }
        Ok(prev_txs)
    }

    fn height_of(&self, hash: &[u8]) -> Result<i32, ChainError> {
        if hash.is_empty() {
            return Ok(-1);
        }
        Ok(self.block(hash)?.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use minibit_core::{difficulty::compact_to_big, tx::block_subsidy};
    use num_bigint::{BigInt, Sign};
    use sha2::{Digest, Sha256};

    /// An easy difficulty so test blocks mine within a few nonces.
    pub(crate) const EASY_BITS: u32 = 0x207fffff;

    /// Searches a valid nonce for the block, like the CPU miner does.
    pub(crate) fn mine(mut block: Block) -> Block {
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

    pub(crate) fn mine_next(
        chain: &ChainStore,
        prev: &Block,
        mut txs: Vec<Tx>,
        to_pub_key_hash: Vec<u8>,
    ) -> Block {
        let fees = txs.iter().map(|tx| tx.fee).sum();
        let coinbase =
            Tx::new_coinbase(to_pub_key_hash, &[], fees, prev.height + 1).unwrap();
        txs.insert(0, coinbase);
        let block = Block::new(prev, txs, EASY_BITS).unwrap();
        let block = mine(block);
        chain.add_block(&block).unwrap();
        block
    }

    #[test]
    fn create_writes_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blockchain.db");

        let chain = ChainStore::create(&path).unwrap();
        assert_eq!(chain.best_height().unwrap(), 0);
        assert!(chain.last_block().unwrap().is_genesis());

        drop(chain);
        assert!(matches!(
            ChainStore::create(&path),
            Err(ChainError::AlreadyExists)
        ));
    }

    #[test]
    fn load_missing_store_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ChainStore::load(dir.path().join("missing.db")),
            Err(ChainError::NotFound)
        ));
    }

    #[test]
    fn load_restores_tip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blockchain.db");

        let tip = {
            let chain = ChainStore::create(&path).unwrap();
            let genesis = chain.last_block().unwrap();
            mine_next(&chain, &genesis, Vec::new(), vec![1; 20]).hash
        };

        let chain = ChainStore::load(&path).unwrap();
        assert_eq!(chain.best_height().unwrap(), 1);
        assert_eq!(chain.last_block().unwrap().hash, tip);
    }

    #[test]
    fn append_and_reject_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ChainStore::create(dir.path().join("blockchain.db")).unwrap();
        assert_eq!(chain.best_height().unwrap(), 0);

        let genesis = chain.last_block().unwrap();
        let block = mine_next(&chain, &genesis, Vec::new(), vec![1; 20]);
        assert_eq!(chain.best_height().unwrap(), 1);
        assert_eq!(chain.last_block().unwrap().hash, block.hash);

        assert!(matches!(
            chain.add_block(&block),
            Err(ChainError::DuplicateBlock)
        ));
        assert_eq!(chain.best_height().unwrap(), 1);
    }

    #[test]
    fn add_block_rejects_invalid_pow() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ChainStore::create(dir.path().join("blockchain.db")).unwrap();
        let genesis = chain.last_block().unwrap();

        let coinbase = Tx::new_coinbase(vec![1; 20], &[], 0, 1).unwrap();
        let mut block = Block::new(&genesis, vec![coinbase], EASY_BITS).unwrap();
        block.hash = vec![0xab; 32];
        block.header.bits = 0x03000001;

        assert!(matches!(
            chain.add_block(&block),
            Err(ChainError::InvalidPow)
        ));
    }

    #[test]
    fn out_of_order_blocks_keep_highest_tip() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ChainStore::create(dir.path().join("blockchain.db")).unwrap();
        let genesis = chain.last_block().unwrap();
        let b1 = mine_next(&chain, &genesis, Vec::new(), vec![1; 20]);
        let b2 = mine_next(&chain, &b1, Vec::new(), vec![1; 20]);

        // Replaying a lower block must not move the tip backwards.
        let dir2 = tempfile::tempdir().unwrap();
        let other = ChainStore::create(dir2.path().join("blockchain.db")).unwrap();
        other.add_block(&b2).unwrap();
        assert_eq!(other.best_height().unwrap(), 2);
        other.add_block(&b1).unwrap();
        assert_eq!(other.best_height().unwrap(), 2);
        assert_eq!(other.last_block().unwrap().hash, b2.hash);
    }

    #[test]
    fn iterates_tip_to_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ChainStore::create(dir.path().join("blockchain.db")).unwrap();
        let genesis = chain.last_block().unwrap();
        let b1 = mine_next(&chain, &genesis, Vec::new(), vec![1; 20]);
        let b2 = mine_next(&chain, &b1, Vec::new(), vec![1; 20]);

        let hashes = chain.blocks_hashes().unwrap();
        assert_eq!(hashes, vec![b2.hash, b1.hash, genesis.hash]);
    }

    #[test]
    fn finds_transactions_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ChainStore::create(dir.path().join("blockchain.db")).unwrap();
        let genesis = chain.last_block().unwrap();
        let block = mine_next(&chain, &genesis, Vec::new(), vec![1; 20]);

        let coinbase = &block.transactions[0];
        let (found_block, found_tx) = chain.find_transaction(&coinbase.id).unwrap();
        assert_eq!(found_block.hash, block.hash);
        assert_eq!(found_tx.id, coinbase.id);
        assert_eq!(found_tx.outputs[0].value, block_subsidy(1));

        assert!(matches!(
            chain.find_transaction(&[0u8; 32]),
            Err(ChainError::UnknownTx)
        ));
    }

    #[test]
    fn difficulty_reuses_bits_outside_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ChainStore::create(dir.path().join("blockchain.db")).unwrap();
        let genesis = chain.last_block().unwrap();
        let b1 = mine_next(&chain, &genesis, Vec::new(), vec![1; 20]);

        assert_eq!(chain.next_difficulty_bits(&b1).unwrap(), b1.header.bits);
    }

    #[test]
    fn difficulty_retargets_at_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ChainStore::create(dir.path().join("blockchain.db")).unwrap();

        // 0x1f7fffff leaves headroom below the cap so the retarget result
        // is observable, while still mining within a few hundred nonces.
        let bits = 0x1f7fffff;
        let mut prev = chain.last_block().unwrap();
        for height in 1..=15 {
            let coinbase = Tx::new_coinbase(vec![1; 20], &[], 0, height).unwrap();
            let block = mine(Block::new(&prev, vec![coinbase], bits).unwrap());
            chain.add_block(&block).unwrap();
            prev = block;
        }
        assert_eq!(prev.height, 15);

        // Height 16 is a boundary. The window start is the genesis block,
        // whose fixed 2022 timestamp makes the actual timespan clamp to
        // the quadruple, so the target grows by four:
        // 0x7fffff * 256^28 * 4 -> 0x2001ffff.
        assert_eq!(chain.next_difficulty_bits(&prev).unwrap(), 0x2001ffff);
    }
}
