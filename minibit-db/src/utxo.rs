//! Unspent transaction output (UTXO) cache.
//!
//! "Unspent outputs" are outputs that haven't been referenced in any
//! input, and thus, still belong to the person that received them. The
//! UTXO set is a cache built from all blockchain transactions, so a
//! balance or output lookup only has to scan the `chainstate` tree
//! instead of the whole chain.

use sled::transaction::{ConflictableTransactionError, TransactionError};

use minibit_core::{Block, Input, OutPoint, Output, Tx};
use minibit_wallet::{address, Account};

use crate::{ChainError, ChainStore};

/// The UTXO set, holding the unspent outputs of every address.
#[derive(Clone)]
pub struct UtxoSet {
    pub chain: ChainStore,
}

/// Outputs of a single transaction selected to fund a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendableOutputs {
    /// Hex-encoded transaction id.
    pub txid: String,
    /// Indices of the selected outputs within the transaction.
    pub out_indices: Vec<usize>,
}

impl UtxoSet {
    /// Rebuilds the UTXO set from a full chain scan.
    pub fn reindex(&self) -> Result<(), ChainError> {
        let utxos = self.chain.find_utxos()?;

        self.chain.chainstate.clear()?;
        let mut batch = sled::Batch::default();
        for (txid, outputs) in utxos {
            batch.insert(hex::decode(txid)?, bincode::serialize(&outputs)?);
        }
        self.chain.chainstate.apply_batch(batch)?;

        Ok(())
    }

    /// Updates the UTXO set with transactions from the block received.
    ///
    /// The block is considered to be the tip of the blockchain. All reads
    /// and writes happen inside one storage transaction, so the cache
    /// reflects the chain including this block after the commit.
    pub fn update(&self, block: &Block) -> Result<(), ChainError> {
        let result = self.chain.chainstate.transaction(|tree| {
            for tx in &block.transactions {
                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        let entry = tree
                            .get(&input.prev_output.txid)?
                            .ok_or_else(|| abort(ChainError::UnknownTx))?;
                        let outputs: Vec<Output> =
                            bincode::deserialize(&entry).map_err(|e| abort(e.into()))?;

                        // Keep the outputs that weren't spent by this input
                        let unspent: Vec<Output> = outputs
                            .into_iter()
                            .enumerate()
                            .filter(|(index, _)| *index as i64 != input.prev_output.index)
                            .map(|(_, output)| output)
                            .collect();

                        if unspent.is_empty() {
                            tree.remove(input.prev_output.txid.clone())?;
                        } else {
                            let encoded =
                                bincode::serialize(&unspent).map_err(|e| abort(e.into()))?;
                            tree.insert(input.prev_output.txid.clone(), encoded)?;
                        }
                    }
                }

                let encoded =
                    bincode::serialize(&tx.outputs).map_err(|e| abort(e.into()))?;
                tree.insert(tx.id.clone(), encoded)?;
            }

            Ok(())
        });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(err.into()),
        }
    }

    /// Finds the unspent outputs locked with the given public key hash.
    pub fn find_utxos(&self, pub_key_hash: &[u8]) -> Result<Vec<Output>, ChainError> {
        let mut utxos = Vec::new();

        for entry in self.chain.chainstate.iter() {
            let (_, value) = entry?;
            let outputs: Vec<Output> = bincode::deserialize(&value)?;
            utxos.extend(
                outputs
                    .into_iter()
                    .filter(|output| output.is_locked_with_key(pub_key_hash)),
            );
        }

        Ok(utxos)
    }

    /// Returns unspent outputs locked with any of the public key hashes to
    /// be used in a new transaction, accumulating value greedily until
    /// `amount + fee` is covered.
    ///
    /// It returns an error if the outputs found can't cover the target
    /// amount.
    pub fn account_utxos(
        &self,
        pub_key_hashes: &[Vec<u8>],
        amount: u64,
        fee: u64,
    ) -> Result<(u64, Vec<SpendableOutputs>), ChainError> {
        let target = amount + fee;
        let mut accumulated = 0u64;
        let mut spendable = Vec::new();

        for entry in self.chain.chainstate.iter() {
            let (key, value) = entry?;
            let txid = hex::encode(&key);
            let outputs: Vec<Output> = bincode::deserialize(&value)?;

            let mut indices = Vec::new();
            for (index, output) in outputs.iter().enumerate() {
                if accumulated >= target {
                    // We have already collected enough outputs
                    if !indices.is_empty() {
                        spendable.push(SpendableOutputs {
                            txid: txid.clone(),
                            out_indices: indices,
                        });
                    }
                    return Ok((accumulated, spendable));
                }

                let locked_by_account = pub_key_hashes
                    .iter()
                    .any(|hash| output.is_locked_with_key(hash));
                if !locked_by_account {
                    continue;
                }

                accumulated += output.value;
                indices.push(index);
            }

            if !indices.is_empty() {
                spendable.push(SpendableOutputs { txid, out_indices: indices });
            }
        }

        if accumulated < target {
            return Err(ChainError::InsufficientFunds);
        }

        Ok((accumulated, spendable))
    }
}

/// Creates a new signed transaction moving `amount` satoshis from the
/// account to the `to` address.
///
/// The amount will be locked with the receiver address, this is how coins
/// are transferred. Any input surplus beyond the amount and the fee goes
/// back to the account through a change output.
pub fn new_transaction(
    account: &Account,
    to: &str,
    amount: u64,
    fee: u64,
    set: &UtxoSet,
) -> Result<Tx, ChainError> {
    let (accumulated, spendable) = set.account_utxos(&account.pub_key_hashes(), amount, fee)?;

    let mut inputs = Vec::new();
    for outputs in &spendable {
        let txid = hex::decode(&outputs.txid)?;
        for &index in &outputs.out_indices {
            inputs.push(Input {
                signature: Vec::new(),
                pub_key: account.public_key(),
                prev_output: OutPoint {
                    txid: txid.clone(),
                    index: index as i64,
                },
            });
        }
    }

    let mut outputs = vec![address::new_output(amount, to)?];
    if accumulated > amount + fee {
        // Create an output for the change
        let change_address = account.new_address(false);
        outputs.push(address::new_output(accumulated - amount - fee, &change_address)?);
    }

    let mut tx = Tx::new(inputs, outputs, fee)?;
    set.chain.sign_transaction(&mut tx, &account.secret_key()?)?;

    Ok(tx)
}

fn abort(err: ChainError) -> ConflictableTransactionError<ChainError> {
    ConflictableTransactionError::Abort(err)
}
