//! Block layout, the pre-mined genesis block and proof-of-work validation.

use chrono::Utc;
use num_bigint::{BigInt, Sign};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    difficulty::{compact_to_big, BASE_DIFFICULTY_BITS, MAX_TARGET},
    merkle,
    tx::{Input, OutPoint, Output, Tx},
    CoreError,
};

/// Data the first Bitcoin block contains.
const GENESIS_COINBASE_DATA: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

/// Public key hash of the genesis address
/// 1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa.
const GENESIS_PUB_KEY_HASH: &str = "62e907b15cbf27d5425399ebf6f0fb50ebb88f18";

const GENESIS_MERKLE_ROOT: &str =
    "898325b2e3f11b70cc81b6f0fc97381e82294cecefc1e483e7826c09a1557714";
const GENESIS_HASH: &str = "000000f72eda1d4d8a8418c992ef803f7e060290c1208abac7c7b1a77d27b3fc";
const GENESIS_TIMESTAMP: i64 = 1670513773;
const GENESIS_NONCE: u32 = 374174;

/// A block header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub prev_block_hash: Vec<u8>,
    pub merkle_root_hash: Vec<u8>,
    pub timestamp: i64,
    pub nonce: u32,
    pub version: i32,
    pub bits: u32,
}

/// A block in the blockchain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub hash: Vec<u8>,
    pub transactions: Vec<Tx>,
    pub height: i32,
}

impl Block {
    /// Creates and returns a block without a header hash and nonce.
    /// It should be mined before being saved in the database.
    pub fn new(prev_block: &Block, transactions: Vec<Tx>, bits: u32) -> Result<Self, CoreError> {
        let merkle_root_hash = merkle_root_hash(&transactions)?;

        Ok(Block {
            header: Header {
                prev_block_hash: prev_block.hash.clone(),
                merkle_root_hash,
                timestamp: Utc::now().timestamp(),
                nonce: 0,
                version: 1,
                bits,
            },
            hash: Vec::new(),
            transactions,
            height: prev_block.height + 1,
        })
    }

    /// Creates and returns the first block of the chain.
    ///
    /// It's called the "genesis", it's pre-mined and statically embedded in
    /// the client so every node starts with one known block.
    pub fn genesis() -> Result<Self, CoreError> {
        let coinbase = Tx::new(
            vec![Input {
                signature: Vec::new(),
                pub_key: GENESIS_COINBASE_DATA.as_bytes().to_vec(),
                prev_output: OutPoint {
                    txid: Vec::new(),
                    index: -1,
                },
            }],
            vec![Output {
                pub_key_hash: decode_hex(GENESIS_PUB_KEY_HASH),
                value: 0,
            }],
            0,
        )?;

        Ok(Block {
            header: Header {
                prev_block_hash: Vec::new(),
                merkle_root_hash: decode_hex(GENESIS_MERKLE_ROOT),
                timestamp: GENESIS_TIMESTAMP,
                nonce: GENESIS_NONCE,
                version: 1,
                bits: BASE_DIFFICULTY_BITS,
            },
            hash: decode_hex(GENESIS_HASH),
            transactions: vec![coinbase],
            height: 0,
        })
    }

    /// Whether a block is the genesis one or not.
    pub fn is_genesis(&self) -> bool {
        self.header.prev_block_hash.is_empty() && self.height == 0
    }

    /// Validates a block's proof-of-work.
    pub fn is_valid(&self) -> bool {
        let target = compact_to_big(self.header.bits);
        if target.sign() != Sign::Plus || target > *MAX_TARGET {
            return false;
        }

        let mut data = self.pow_data();
        data.extend_from_slice(&i64::from(self.header.nonce).to_be_bytes());

        let hash = Sha256::digest(&data);
        BigInt::from_bytes_be(Sign::Plus, &hash) <= target
    }

    /// Joins a block's fields so its hash can be generated.
    ///
    /// It does not include the nonce, which should be appended to the end
    /// of the data as a big-endian 64-bit integer.
    pub fn pow_data(&self) -> Vec<u8> {
        let header = &self.header;
        let mut data = Vec::with_capacity(
            header.prev_block_hash.len() + header.merkle_root_hash.len() + 16,
        );
        data.extend_from_slice(&header.prev_block_hash);
        data.extend_from_slice(&header.merkle_root_hash);
        data.extend_from_slice(&header.timestamp.to_be_bytes());
        data.extend_from_slice(&i64::from(header.bits).to_be_bytes());
        data
    }
}

/// Returns the merkle tree root hash over a block's serialized
/// transactions.
///
/// Transactions in a block are represented using a merkle tree, and the
/// root node hash of the tree allows us to quickly check if a transaction
/// belonged to this block.
pub fn merkle_root_hash(transactions: &[Tx]) -> Result<Vec<u8>, CoreError> {
    let mut encoded = Vec::with_capacity(transactions.len());
    for tx in transactions {
        encoded.push(bincode::serialize(tx)?);
    }

    Ok(merkle::merkle_root(&encoded))
}

fn decode_hex(s: &str) -> Vec<u8> {
    hex::decode(s).expect("static hex literal")
}
