//! In-memory pool of verified transactions waiting to be mined.

use std::collections::HashMap;
use std::sync::RwLock;

use minibit_core::Tx;

/// TxPool contains valid transactions that may be included in the next
/// block.
///
/// Entries are added only after the chain verifier accepted the
/// transaction and removed once it is mined.
#[derive(Debug, Default)]
pub struct TxPool {
    pool: RwLock<HashMap<String, Tx>>,
}

impl TxPool {
    /// Returns a new transaction pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a transaction to the pool. Adding the same transaction twice
    /// keeps a single entry.
    pub fn add(&self, tx: Tx) {
        let txid = hex::encode(&tx.id);
        self.pool.write().unwrap().insert(txid, tx);
    }

    /// Whether the transaction id is in the pool or not.
    pub fn contains(&self, txid: &[u8]) -> bool {
        self.pool.read().unwrap().contains_key(&hex::encode(txid))
    }

    /// Number of transactions in the pool.
    pub fn count(&self) -> usize {
        self.pool.read().unwrap().len()
    }

    /// Iterates over the pool executing `f` on each transaction.
    ///
    /// The pool lock is held for the duration of the iteration, so the
    /// callback must not call back into the pool.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&str, &Tx),
    {
        for (txid, tx) in self.pool.write().unwrap().iter() {
            f(txid, tx);
        }
    }

    /// Retrieves a transaction from the pool.
    pub fn get(&self, txid: &[u8]) -> Option<Tx> {
        self.pool.read().unwrap().get(&hex::encode(txid)).cloned()
    }

    /// Deletes a transaction from the pool.
    pub fn remove(&self, txid: &[u8]) {
        self.pool.write().unwrap().remove(&hex::encode(txid));
    }

    /// Size of the encoded mempool in bytes.
    pub fn size_bytes(&self) -> Result<usize, bincode::Error> {
        let pool = self.pool.read().unwrap();
        Ok(bincode::serialize(&*pool)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use minibit_core::Tx;

    fn sample_tx() -> Tx {
        Tx::new_coinbase(vec![1; 20], b"pool", 0, 1).unwrap()
    }

    #[test]
    fn add_is_idempotent() {
        let pool = TxPool::new();
        let tx = sample_tx();

        pool.add(tx.clone());
        pool.add(tx.clone());
        assert_eq!(pool.count(), 1);
        assert!(pool.contains(&tx.id));

        pool.remove(&tx.id);
        assert!(!pool.contains(&tx.id));
        assert_eq!(pool.count(), 0);
    }

    #[test]
    fn get_returns_stored_tx() {
        let pool = TxPool::new();
        let tx = sample_tx();
        pool.add(tx.clone());

        assert_eq!(pool.get(&tx.id), Some(tx));
        assert_eq!(pool.get(&[0u8; 32]), None);
    }

    #[test]
    fn for_each_visits_every_entry() {
        let pool = TxPool::new();
        let a = sample_tx();
        let b = sample_tx();
        pool.add(a.clone());
        pool.add(b.clone());

        let mut seen = Vec::new();
        pool.for_each(|txid, _| seen.push(txid.to_string()));
        seen.sort();

        let mut expected = vec![hex::encode(&a.id), hex::encode(&b.id)];
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn size_grows_with_entries() {
        let pool = TxPool::new();
        let empty = pool.size_bytes().unwrap();
        pool.add(sample_tx());
        assert!(pool.size_bytes().unwrap() > empty);
    }
}
