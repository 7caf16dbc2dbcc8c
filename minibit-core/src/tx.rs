//! Transaction model, coinbase subsidy and the input signing protocol.

use std::collections::HashMap;

use rand::RngCore;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::CoreError;

/// Initial amount a miner receives for mining a block.
///
/// Represented in satoshis (50 BTC).
const BASE_SUBSIDY: u64 = 5_000_000_000;

/// Number of blocks until the subsidy is halved.
///
/// In the Bitcoin mainnet, it is 210,000 blocks.
const SUBSIDY_REDUCTION_PERIOD: i32 = 21;

/// Reference to the previous output being spent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutPoint {
    /// Transaction ID of the previous output. Empty for coinbase inputs.
    pub txid: Vec<u8>,
    /// Index of the referenced output in the previous transaction,
    /// -1 for coinbase inputs.
    pub index: i64,
}

/// A transaction input, each input references the output of another
/// transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub signature: Vec<u8>,
    /// Uncompressed public key of the spender, X||Y concatenated (64 bytes).
    pub pub_key: Vec<u8>,
    pub prev_output: OutPoint,
}

/// A transaction output, outputs are indivisible and the place where coins
/// are actually stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    /// Hashed public key of the coins' owner.
    pub pub_key_hash: Vec<u8>,
    /// Represented in satoshis.
    pub value: u64,
}

impl Output {
    /// Whether the output can be used by the owner of the public key hash.
    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash == pub_key_hash
    }
}

/// A transaction.
///
/// Every new transaction must have at least one input and output, except
/// coinbase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub id: Vec<u8>,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    /// In Bitcoin, a transaction's fee is equal to the difference between
    /// the amount of coins locked in the inputs' referenced outputs and the
    /// ones in the new outputs.
    ///
    /// To make things simpler we just include it as a field, the input
    /// surplus will still exist.
    pub fee: u64,
}

impl Tx {
    /// Returns a new transaction with the inputs and outputs provided.
    ///
    /// The id is computed here exactly once and never recomputed, so the
    /// signing data over an unsigned-then-signed transaction stays stable.
    pub fn new(inputs: Vec<Input>, outputs: Vec<Output>, fee: u64) -> Result<Self, CoreError> {
        let mut tx = Tx {
            id: Vec::new(),
            inputs,
            outputs,
            fee,
        };

        let mut preimage = bincode::serialize(&tx)?;

        // Add a nonce to avoid duplicated coinbase transactions.
        //
        // In Bitcoin, this is done through the transaction scriptSig.
        // See BIP34: https://github.com/bitcoin/bips/blob/master/bip-0034.mediawiki
        let mut nonce = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut nonce);
        preimage.extend_from_slice(&nonce);

        let hash = Sha256::digest(&preimage);
        tx.id = Sha256::digest(hash).to_vec();

        Ok(tx)
    }

    /// Returns a new coinbase transaction paying the subsidy plus the fees
    /// to the given public key hash.
    pub fn new_coinbase(
        to_pub_key_hash: Vec<u8>,
        data: &[u8],
        fees: u64,
        next_block_height: i32,
    ) -> Result<Self, CoreError> {
        let input = Input {
            signature: Vec::new(),
            pub_key: data.to_vec(),
            prev_output: OutPoint {
                txid: Vec::new(),
                index: -1,
            },
        };

        let subsidy = block_subsidy(next_block_height);
        tracing::debug!("block {next_block_height} subsidy: {subsidy}, fees: {fees}");

        let output = Output {
            pub_key_hash: to_pub_key_hash,
            value: subsidy + fees,
        };

        Self::new(vec![input], vec![output], 0)
    }

    /// Whether the transaction is coinbase.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].prev_output.txid.is_empty()
            && self.inputs[0].prev_output.index == -1
    }

    /// Signs the inputs of a transaction.
    ///
    /// `prev_txs` maps hex-encoded ids to the transactions referenced by
    /// the inputs.
    pub fn sign(
        &mut self,
        secret: &SecretKey,
        prev_txs: &HashMap<String, Tx>,
    ) -> Result<(), CoreError> {
        if self.is_coinbase() {
            return Ok(());
        }

        for input in &self.inputs {
            if !prev_txs.contains_key(&hex::encode(&input.prev_output.txid)) {
                return Err(CoreError::MissingPrevTx);
            }
        }

        let secp = Secp256k1::new();
        let mut tx_copy = self.trimmed_copy();

        // Every transaction input is signed by the one who created the
        // transaction.
        for i in 0..tx_copy.inputs.len() {
            let digest = signing_digest(&mut tx_copy, i, prev_txs)?;
            let signature = secp.sign_ecdsa(&Message::from_digest(digest), secret);
            self.inputs[i].signature = signature.serialize_der().to_vec();
        }

        Ok(())
    }

    /// Validates the signatures of the transaction inputs.
    pub fn verify(&self, prev_txs: &HashMap<String, Tx>) -> Result<bool, CoreError> {
        if self.is_coinbase() {
            return Ok(true);
        }

        let secp = Secp256k1::new();
        let mut tx_copy = self.trimmed_copy();

        for (i, input) in self.inputs.iter().enumerate() {
            let digest = signing_digest(&mut tx_copy, i, prev_txs)?;

            let signature = Signature::from_der(&input.signature)?;

            // Rebuild the public key from the input's X||Y halves.
            let mut pub_key = Vec::with_capacity(65);
            pub_key.push(0x04);
            pub_key.extend_from_slice(&input.pub_key);
            let pub_key = PublicKey::from_slice(&pub_key)?;

            if secp
                .verify_ecdsa(&Message::from_digest(digest), &signature, &pub_key)
                .is_err()
            {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Creates a trimmed copy of the transaction to be used in signing.
    ///
    /// https://en.bitcoin.it/w/images/en/7/70/Bitcoin_OpCheckSig_InDetail.png
    pub fn trimmed_copy(&self) -> Tx {
        let inputs = self
            .inputs
            .iter()
            .map(|input| Input {
                // Signature and public key omitted since we don't sign them
                signature: Vec::new(),
                pub_key: Vec::new(),
                prev_output: input.prev_output.clone(),
            })
            .collect();

        Tx {
            id: self.id.clone(),
            inputs,
            outputs: self.outputs.clone(),
            fee: 0,
        }
    }
}

/// Computes the digest signed for input `i`: the trimmed copy is encoded
/// with the input's public key field temporarily holding the referenced
/// output's public key hash.
fn signing_digest(
    tx_copy: &mut Tx,
    i: usize,
    prev_txs: &HashMap<String, Tx>,
) -> Result<[u8; 32], CoreError> {
    let prev_output = &tx_copy.inputs[i].prev_output;
    let prev_tx = prev_txs
        .get(&hex::encode(&prev_output.txid))
        .ok_or(CoreError::MissingPrevTx)?;
    let index = usize::try_from(prev_output.index).map_err(|_| CoreError::MissingPrevOutput)?;
    let referenced = prev_tx
        .outputs
        .get(index)
        .ok_or(CoreError::MissingPrevOutput)?;

    tx_copy.inputs[i].pub_key = referenced.pub_key_hash.clone();
    let data = bincode::serialize(&tx_copy)?;
    tx_copy.inputs[i].pub_key.clear();

    Ok(Sha256::digest(&data).into())
}

/// Returns the subsidy for the miner depending on the height of the block
/// being mined.
///
/// The subsidy halves every [`SUBSIDY_REDUCTION_PERIOD`] blocks.
pub fn block_subsidy(next_block_height: i32) -> u64 {
    let halvings = next_block_height / SUBSIDY_REDUCTION_PERIOD;
    // Force block reward to zero when right shift is undefined.
    if halvings >= 64 {
        return 0;
    }

    BASE_SUBSIDY >> halvings
}
