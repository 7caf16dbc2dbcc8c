//! Peer management and lifecycle methods.

use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::RpcModule;

use crate::error::RpcError;
use crate::RpcContext;

/// Registers the network control methods.
pub fn register_methods(module: &mut RpcModule<RpcContext>) -> anyhow::Result<()> {
    module.register_async_method("addnode", |params, ctx| async move {
        let address: String = params.one()?;

        let count = ctx.node.peers.add(std::slice::from_ref(&address));
        ctx.node
            .send_version(&address)
            .await
            .map_err(|err| RpcError::from(err).into_error_object())?;
        Ok::<usize, ErrorObjectOwned>(count)
    })?;

    module.register_async_method("disconnectnode", |params, ctx| async move {
        let address: String = params.one()?;
        Ok::<usize, ErrorObjectOwned>(ctx.node.peers.remove(&[address]))
    })?;

    module.register_async_method("getpeerinfo", |_params, ctx| async move {
        Ok::<Vec<String>, ErrorObjectOwned>(ctx.node.peers.list())
    })?;

    module.register_async_method("sendping", |_params, ctx| async move {
        for addr in ctx.node.peers.list() {
            ctx.node
                .send_ping(&addr)
                .await
                .map_err(|err| RpcError::from(err).into_error_object())?;
        }
        Ok::<(), ErrorObjectOwned>(())
    })?;

    module.register_async_method("stop", |_params, ctx| async move {
        ctx.node.shutdown().trigger();
        Ok::<String, ErrorObjectOwned>("minibit server stopping".to_string())
    })?;

    Ok(())
}
