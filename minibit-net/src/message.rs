//! Wire message framing and payloads.
//!
//! https://developer.bitcoin.org/reference/p2p_networking.html

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Length of the command field at the start of every message.
pub const COMMAND_LENGTH: usize = 12;

/// Commands understood by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Addr,
    Block,
    GetAddr,
    GetBlocks,
    GetData,
    Inv,
    Ping,
    Pong,
    Tx,
    Version,
}

impl Command {
    pub const fn as_str(self) -> &'static str {
        match self {
            Command::Addr => "addr",
            Command::Block => "block",
            Command::GetAddr => "getaddr",
            Command::GetBlocks => "getblocks",
            Command::GetData => "getdata",
            Command::Inv => "inv",
            Command::Ping => "ping",
            Command::Pong => "pong",
            Command::Tx => "tx",
            Command::Version => "version",
        }
    }

    /// Parses the zero-padded command field of a message.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        match &raw[..end] {
            b"addr" => Some(Command::Addr),
            b"block" => Some(Command::Block),
            b"getaddr" => Some(Command::GetAddr),
            b"getblocks" => Some(Command::GetBlocks),
            b"getdata" => Some(Command::GetData),
            b"inv" => Some(Command::Inv),
            b"ping" => Some(Command::Ping),
            b"pong" => Some(Command::Pong),
            b"tx" => Some(Command::Tx),
            b"version" => Some(Command::Version),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of object referenced by `inv` and `getdata` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvKind {
    Block,
    Tx,
}

impl fmt::Display for InvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvKind::Block => f.write_str("block"),
            InvKind::Tx => f.write_str("tx"),
        }
    }
}

/// Relays connection information for peers on the network.
#[derive(Debug, Serialize, Deserialize)]
pub struct Addr {
    pub addresses: Vec<String>,
}

/// Delivers a single serialized block.
#[derive(Debug, Serialize, Deserialize)]
pub struct BlockData {
    pub addr_from: String,
    pub block: Vec<u8>,
}

/// Requests an `addr` message from the receiving node.
#[derive(Debug, Serialize, Deserialize)]
pub struct GetAddr {
    pub addr_from: String,
}

/// Requests the block hash inventory of the receiving node.
#[derive(Debug, Serialize, Deserialize)]
pub struct GetBlocks {
    pub addr_from: String,
}

/// Requests a single block or transaction.
#[derive(Debug, Serialize, Deserialize)]
pub struct GetData {
    pub addr_from: String,
    pub kind: InvKind,
    pub id: Vec<u8>,
}

/// Offers the hashes of blocks or transactions the sender has.
#[derive(Debug, Serialize, Deserialize)]
pub struct Inv {
    pub addr_from: String,
    pub kind: InvKind,
    pub items: Vec<Vec<u8>>,
}

/// Liveness probe.
#[derive(Debug, Serialize, Deserialize)]
pub struct Ping {
    pub addr_from: String,
}

/// Liveness reply.
#[derive(Debug, Serialize, Deserialize)]
pub struct Pong {
    pub addr_from: String,
}

/// Delivers a single serialized transaction.
#[derive(Debug, Serialize, Deserialize)]
pub struct TxData {
    pub addr_from: String,
    pub tx: Vec<u8>,
}

/// Starts the handshake, providing information about the transmitting
/// node.
#[derive(Debug, Serialize, Deserialize)]
pub struct Version {
    pub addr_from: String,
    pub version: i32,
    pub best_height: i32,
}

/// Builds a full wire message: the zero-padded command followed by the
/// encoded payload.
pub fn encode_message<T: Serialize>(
    command: Command,
    payload: &T,
) -> Result<Vec<u8>, bincode::Error> {
    let mut message = vec![0u8; COMMAND_LENGTH];
    let cmd = command.as_str().as_bytes();
    message[..cmd.len()].copy_from_slice(cmd);
    message.extend(bincode::serialize(payload)?);
    Ok(message)
}

/// Decodes the payload that follows the command field.
pub fn decode_payload<T: DeserializeOwned>(request: &[u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(&request[COMMAND_LENGTH..])
}
