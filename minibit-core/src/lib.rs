//! Core data structures and validation logic for the minibit blockchain.
//!
//! This crate provides:
//! - Block and transaction structures
//! - Proof-of-work validation and the compact difficulty codec
//! - Merkle tree computation
//! - Transaction signing and verification (ECDSA over secp256k1)

pub mod block;
pub mod difficulty;
pub mod merkle;
pub mod tx;

use thiserror::Error;

pub use block::{Block, Header};
pub use tx::{Input, OutPoint, Output, Tx};

/// Errors produced while building, signing or verifying core structures.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("previous transaction is not correct")]
    MissingPrevTx,
    #[error("input references a missing output")]
    MissingPrevOutput,
    #[error(transparent)]
    Encoding(#[from] bincode::Error),
    #[error(transparent)]
    Crypto(#[from] secp256k1::Error),
}
