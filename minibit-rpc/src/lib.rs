//! JSON-RPC control plane.
//!
//! Exposes the node operations the CLI consumes. Every method lives in a
//! category module under `methods`.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use jsonrpsee::server::{ServerBuilder, ServerHandle};
use jsonrpsee::RpcModule;

use minibit_net::Node;

mod error;
mod methods;
mod types;

pub use error::RpcError;
pub use types::*;

/// Address where the node listens for rpc calls.
pub const RPC_ADDRESS: &str = "0.0.0.0:8338";

/// Shared context for all RPC methods.
#[derive(Clone)]
pub struct RpcContext {
    pub node: Arc<Node>,
}

/// Spawns the JSON-RPC server.
///
/// The returned handle stops the server when dropped or explicitly
/// stopped.
pub async fn spawn_rpc_server(bind_addr: &str, ctx: RpcContext) -> Result<ServerHandle> {
    let server = ServerBuilder::default()
        .build(bind_addr)
        .await
        .map_err(|err| anyhow!("building RPC server: {err}"))?;

    let mut module = RpcModule::new(ctx);
    methods::chain::register_methods(&mut module)?;
    methods::network::register_methods(&mut module)?;
    methods::tx::register_methods(&mut module)?;

    Ok(server.start(module))
}
