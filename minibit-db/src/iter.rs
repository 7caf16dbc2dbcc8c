//! Lazy iteration over the chain, tip to genesis.

use minibit_core::Block;

use crate::ChainError;

/// Streaming cursor over blockchain blocks.
///
/// Blocks are fetched one at a time by following `prev_block_hash`
/// pointers, so dropping the iterator mid-scan releases the underlying
/// storage immediately.
pub struct ChainIterator {
    blocks: sled::Tree,
    current_hash: Vec<u8>,
}

impl ChainIterator {
    pub(crate) fn new(blocks: sled::Tree, tip: Vec<u8>) -> Self {
        ChainIterator {
            blocks,
            current_hash: tip,
        }
    }
}

impl Iterator for ChainIterator {
    type Item = Result<Block, ChainError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_hash.is_empty() {
            return None;
        }

        let data = match self.blocks.get(&self.current_hash) {
            Ok(Some(data)) => data,
            Ok(None) => return Some(Err(ChainError::UnknownBlock)),
            Err(err) => return Some(Err(err.into())),
        };

        match bincode::deserialize::<Block>(&data) {
            Ok(block) => {
                self.current_hash = block.header.prev_block_hash.clone();
                Some(Ok(block))
            }
            Err(err) => Some(Err(err.into())),
        }
    }
}
