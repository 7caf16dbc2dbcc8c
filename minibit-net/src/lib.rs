//! Peer-to-peer node runtime for minibit.
//!
//! The protocol is a gossip of one-shot TCP messages: each request is a
//! single write of a 12-byte command followed by the encoded payload, and
//! the connection is closed after handling. Synchronization runs through
//! the `version`/`getblocks`/`inv`/`getdata`/`block` exchange, transaction
//! relay through `tx`/`inv`.

pub mod message;
pub mod miner;
mod net;
mod node;
pub mod peers;

use thiserror::Error;

pub use node::{Node, Shutdown};

use minibit_db::ChainError;

/// Node runtime errors.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("malformed message")]
    MalformedMessage,
    #[error("invalid host address {0:?}")]
    InvalidHostAddress(String),
    #[error("transaction not found in the mempool")]
    UnknownPoolTx,
    #[error("the miner is already running")]
    MinerAlreadyRunning,
    #[error("mining task failed: {0}")]
    MinerTask(String),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Core(#[from] minibit_core::CoreError),
    #[error(transparent)]
    Wallet(#[from] minibit_wallet::WalletError),
    #[error(transparent)]
    Encoding(#[from] bincode::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
