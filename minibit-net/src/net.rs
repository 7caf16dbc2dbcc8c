//! Protocol message handlers and senders.

use tokio::{io::AsyncReadExt, net::TcpStream};
use tracing::{debug, info};

use minibit_core::{Block, Tx};

use crate::{
    message::{self, Command, InvKind, COMMAND_LENGTH},
    node::Node,
    NodeError,
};

impl Node {
    /// Reads a whole one-shot request and dispatches it to its handler.
    pub async fn handle_connection(&self, mut stream: TcpStream) -> Result<(), NodeError> {
        let mut request = Vec::new();
        stream.read_to_end(&mut request).await?;
        drop(stream);

        if request.len() < COMMAND_LENGTH {
            return Err(NodeError::MalformedMessage);
        }

        let command = Command::from_bytes(&request[..COMMAND_LENGTH]).ok_or_else(|| {
            NodeError::UnknownCommand(
                String::from_utf8_lossy(&request[..COMMAND_LENGTH]).into_owned(),
            )
        })?;

        match command {
            Command::Addr => self.handle_addr(&request).await,
            Command::Block => self.handle_block(&request).await,
            Command::GetAddr => self.handle_get_addr(&request).await,
            Command::GetBlocks => self.handle_get_blocks(&request).await,
            Command::GetData => self.handle_get_data(&request).await,
            Command::Inv => self.handle_inv(&request).await,
            Command::Ping => self.handle_ping(&request).await,
            Command::Pong => self.handle_pong(&request).await,
            Command::Tx => self.handle_tx(&request).await,
            Command::Version => self.handle_version(&request).await,
        }
    }

    /// Adds the requester address to the peer list and requests all peers
    /// for their blocks.
    async fn handle_addr(&self, request: &[u8]) -> Result<(), NodeError> {
        let payload: message::Addr = message::decode_payload(request)?;

        let peers_count = self.peers.add(&payload.addresses);
        info!("there are {peers_count} known peers");

        for addr in self.peers.list() {
            self.send_get_blocks(&addr).await?;
        }
        Ok(())
    }

    /// Relays connection information for peers on the network.
    async fn send_addr(&self, address: &str) -> Result<(), NodeError> {
        let mut addresses = self.peers.list();
        addresses.push(self.host_address.clone());

        let msg = message::encode_message(Command::Addr, &message::Addr { addresses })?;
        self.request(address, &msg).await
    }

    /// Receives a block and adds it to the blockchain.
    async fn handle_block(&self, request: &[u8]) -> Result<(), NodeError> {
        let payload: message::BlockData = message::decode_payload(request)?;
        let block: Block = bincode::deserialize(&payload.block)?;

        // Ignore invalid blocks
        if !block.is_valid() {
            return Ok(());
        }

        if self.miner {
            // Notify the mining task that we already got a new block so it
            // restarts the search. A full channel already carries the
            // signal, so the send never blocks.
            let _ = self.new_blocks.try_send(block.clone());
        }

        // Remove the new block's transactions from the mempool
        for tx in &block.transactions {
            self.mempool.remove(&tx.id);
        }

        self.chain.add_block(&block)?;
        self.utxo.update(&block)?;

        info!(
            "added block at height {} ({})",
            block.height,
            hex::encode(&block.hash)
        );
        Ok(())
    }

    /// Transmits a single serialized block.
    ///
    /// https://developer.bitcoin.org/reference/block_chain.html#serialized-blocks
    pub async fn send_block(&self, address: &str, block: &Block) -> Result<(), NodeError> {
        let payload = message::BlockData {
            addr_from: self.host_address.clone(),
            block: bincode::serialize(block)?,
        };
        let msg = message::encode_message(Command::Block, &payload)?;
        self.request(address, &msg).await
    }

    /// Sends the list of connected peers to the node requesting that
    /// information.
    async fn handle_get_addr(&self, request: &[u8]) -> Result<(), NodeError> {
        let payload: message::GetAddr = message::decode_payload(request)?;
        self.send_addr(&payload.addr_from).await
    }

    /// Requests an `addr` message from the receiving node.
    pub async fn send_get_addr(&self, address: &str) -> Result<(), NodeError> {
        let payload = message::GetAddr {
            addr_from: self.host_address.clone(),
        };
        let msg = message::encode_message(Command::GetAddr, &payload)?;
        self.request(address, &msg).await
    }

    /// Answers by sending all the block hashes the node has.
    async fn handle_get_blocks(&self, request: &[u8]) -> Result<(), NodeError> {
        let payload: message::GetBlocks = message::decode_payload(request)?;
        let hashes = self.chain.blocks_hashes()?;
        self.send_inv(&payload.addr_from, InvKind::Block, hashes).await
    }

    /// Requests block header hashes starting from a particular point in
    /// the blockchain.
    pub async fn send_get_blocks(&self, address: &str) -> Result<(), NodeError> {
        let payload = message::GetBlocks {
            addr_from: self.host_address.clone(),
        };
        let msg = message::encode_message(Command::GetBlocks, &payload)?;
        self.request(address, &msg).await
    }

    /// Answers with the details of a block or transaction.
    async fn handle_get_data(&self, request: &[u8]) -> Result<(), NodeError> {
        let payload: message::GetData = message::decode_payload(request)?;

        match payload.kind {
            InvKind::Block => {
                let block = self.chain.block(&payload.id)?;
                self.send_block(&payload.addr_from, &block).await
            }
            InvKind::Tx => {
                let tx = self.mempool.get(&payload.id).ok_or(NodeError::UnknownPoolTx)?;
                self.send_tx(&payload.addr_from, &tx).await
            }
        }
    }

    /// Requests one data object from another node.
    async fn send_get_data(
        &self,
        address: &str,
        kind: InvKind,
        id: &[u8],
    ) -> Result<(), NodeError> {
        let payload = message::GetData {
            addr_from: self.host_address.clone(),
            kind,
            id: id.to_vec(),
        };
        let msg = message::encode_message(Command::GetData, &payload)?;
        self.request(address, &msg).await
    }

    /// Requests the objects offered by another node that this one is
    /// missing.
    async fn handle_inv(&self, request: &[u8]) -> Result<(), NodeError> {
        let payload: message::Inv = message::decode_payload(request)?;

        info!(
            "received inventory with {} {}/s from {}",
            payload.items.len(),
            payload.kind,
            payload.addr_from
        );

        match payload.kind {
            InvKind::Block => {
                for block_hash in &payload.items {
                    self.send_get_data(&payload.addr_from, InvKind::Block, block_hash)
                        .await?;
                }
            }
            InvKind::Tx => {
                for txid in &payload.items {
                    if !self.mempool.contains(txid) {
                        self.send_get_data(&payload.addr_from, InvKind::Tx, txid).await?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Transmits one or more inventories of objects known to the
    /// transmitting peer.
    ///
    /// The receiving peer can compare the inventories from an `inv`
    /// message against the inventories it has already seen, and then use a
    /// follow-up message to request unseen objects.
    pub async fn send_inv(
        &self,
        address: &str,
        kind: InvKind,
        items: Vec<Vec<u8>>,
    ) -> Result<(), NodeError> {
        let payload = message::Inv {
            addr_from: self.host_address.clone(),
            kind,
            items,
        };
        let msg = message::encode_message(Command::Inv, &payload)?;
        self.request(address, &msg).await
    }

    /// Answers with a `pong` message.
    async fn handle_ping(&self, request: &[u8]) -> Result<(), NodeError> {
        let payload: message::Ping = message::decode_payload(request)?;
        self.send_pong(&payload.addr_from).await
    }

    /// Helps confirm that the receiving peer is still connected.
    pub async fn send_ping(&self, address: &str) -> Result<(), NodeError> {
        let payload = message::Ping {
            addr_from: self.host_address.clone(),
        };
        let msg = message::encode_message(Command::Ping, &payload)?;
        self.request(address, &msg).await
    }

    /// Logs when another peer sent a pong message.
    async fn handle_pong(&self, request: &[u8]) -> Result<(), NodeError> {
        let payload: message::Pong = message::decode_payload(request)?;
        info!("{} says PONG", payload.addr_from);
        Ok(())
    }

    /// Replies to a `ping` message, proving to the pinging node that the
    /// ponging node is still alive.
    async fn send_pong(&self, address: &str) -> Result<(), NodeError> {
        let payload = message::Pong {
            addr_from: self.host_address.clone(),
        };
        let msg = message::encode_message(Command::Pong, &payload)?;
        self.request(address, &msg).await
    }

    /// Receives a transaction, adds it to the mempool and offers it to the
    /// other peers.
    async fn handle_tx(&self, request: &[u8]) -> Result<(), NodeError> {
        let payload: message::TxData = message::decode_payload(request)?;
        let tx: Tx = bincode::deserialize(&payload.tx)?;

        self.chain.verify_tx(&tx)?;
        self.mempool.add(tx.clone());

        debug!(
            "received a new transaction ({}) from {}",
            hex::encode(&tx.id),
            payload.addr_from
        );

        // Broadcast the transaction to the other peers
        for addr in self.peers.list() {
            self.send_inv(&addr, InvKind::Tx, vec![tx.id.clone()]).await?;
        }

        Ok(())
    }

    /// Transmits a single encoded transaction.
    ///
    /// With an empty address the transaction is first sent to ourselves,
    /// so it enters our own mempool, and then broadcast to every peer.
    pub async fn send_tx(&self, address: &str, tx: &Tx) -> Result<(), NodeError> {
        let payload = message::TxData {
            addr_from: self.host_address.clone(),
            tx: bincode::serialize(tx)?,
        };
        let msg = message::encode_message(Command::Tx, &payload)?;

        if address.is_empty() {
            self.request(&self.host_address, &msg).await?;
            for addr in self.peers.list() {
                self.request(&addr, &msg).await?;
            }
            return Ok(());
        }

        self.request(address, &msg).await
    }

    /// Exchanges information with another peer to find the longer
    /// blockchain.
    async fn handle_version(&self, request: &[u8]) -> Result<(), NodeError> {
        let payload: message::Version = message::decode_payload(request)?;

        let best_height = self.chain.best_height()?;
        self.peers.add(std::slice::from_ref(&payload.addr_from));

        let peer_best_height = payload.best_height;
        if best_height == peer_best_height {
            return Ok(());
        }

        if best_height < peer_best_height {
            return self.send_get_blocks(&payload.addr_from).await;
        }

        self.send_version(&payload.addr_from).await
    }

    /// Provides information about the transmitting node to the receiving
    /// node at the beginning of a connection.
    pub async fn send_version(&self, address: &str) -> Result<(), NodeError> {
        let payload = message::Version {
            addr_from: self.host_address.clone(),
            version: self.version,
            best_height: self.chain.best_height()?,
        };
        let msg = message::encode_message(Command::Version, &payload)?;
        self.request(address, &msg).await
    }
}
