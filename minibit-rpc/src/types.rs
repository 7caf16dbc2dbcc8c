//! JSON-facing request and response types, with hashes hex-encoded.

use serde::{Deserialize, Serialize};

use minibit_core::{Block, Input, Output, Tx};

/// Parameters of the `sendtx` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendTxParams {
    pub account_name: String,
    pub to: String,
    pub amount: u64,
    pub fee: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockInfo {
    pub hash: String,
    pub prev_block_hash: String,
    pub merkle_root_hash: String,
    pub timestamp: i64,
    pub nonce: u32,
    pub version: i32,
    pub bits: u32,
    pub height: i32,
    pub transactions: Vec<TxInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxInfo {
    pub id: String,
    pub fee: u64,
    pub inputs: Vec<InputInfo>,
    pub outputs: Vec<OutputInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputInfo {
    pub txid: String,
    pub index: i64,
    pub signature: String,
    pub pub_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputInfo {
    pub value: u64,
    pub pub_key_hash: String,
}

/// Response of the `gettransaction` call: the transaction and the block
/// containing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub tx: TxInfo,
    pub block_hash: String,
    pub block_height: i32,
}

impl From<&Block> for BlockInfo {
    fn from(block: &Block) -> Self {
        BlockInfo {
            hash: hex::encode(&block.hash),
            prev_block_hash: hex::encode(&block.header.prev_block_hash),
            merkle_root_hash: hex::encode(&block.header.merkle_root_hash),
            timestamp: block.header.timestamp,
            nonce: block.header.nonce,
            version: block.header.version,
            bits: block.header.bits,
            height: block.height,
            transactions: block.transactions.iter().map(TxInfo::from).collect(),
        }
    }
}

impl From<&Tx> for TxInfo {
    fn from(tx: &Tx) -> Self {
        TxInfo {
            id: hex::encode(&tx.id),
            fee: tx.fee,
            inputs: tx.inputs.iter().map(InputInfo::from).collect(),
            outputs: tx.outputs.iter().map(OutputInfo::from).collect(),
        }
    }
}

impl From<&Input> for InputInfo {
    fn from(input: &Input) -> Self {
        InputInfo {
            txid: hex::encode(&input.prev_output.txid),
            index: input.prev_output.index,
            signature: hex::encode(&input.signature),
            pub_key: hex::encode(&input.pub_key),
        }
    }
}

impl From<&Output> for OutputInfo {
    fn from(output: &Output) -> Self {
        OutputInfo {
            value: output.value,
            pub_key_hash: hex::encode(&output.pub_key_hash),
        }
    }
}
