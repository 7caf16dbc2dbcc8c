//! Chain and UTXO query methods.

use std::collections::HashMap;

use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::RpcModule;

use minibit_wallet::address;

use crate::error::RpcError;
use crate::types::{BlockInfo, OutputInfo, TransactionInfo, TxInfo};
use crate::RpcContext;

/// Registers the blockchain query methods.
pub fn register_methods(module: &mut RpcModule<RpcContext>) -> anyhow::Result<()> {
    module.register_async_method("getbestheight", |_params, ctx| async move {
        let height = ctx
            .node
            .chain
            .best_height()
            .map_err(|err| RpcError::from(err).into_error_object())?;
        Ok::<i32, ErrorObjectOwned>(height)
    })?;

    module.register_async_method("getblock", |params, ctx| async move {
        let hash: String = params.one()?;
        let hash = hex::decode(&hash)
            .map_err(|_| RpcError::InvalidParameter(format!("invalid hash {hash:?}")).into_error_object())?;

        let block = ctx
            .node
            .chain
            .block(&hash)
            .map_err(|err| RpcError::from(err).into_error_object())?;
        Ok::<BlockInfo, ErrorObjectOwned>(BlockInfo::from(&block))
    })?;

    module.register_async_method("getlastblock", |_params, ctx| async move {
        let block = ctx
            .node
            .chain
            .last_block()
            .map_err(|err| RpcError::from(err).into_error_object())?;
        Ok::<BlockInfo, ErrorObjectOwned>(BlockInfo::from(&block))
    })?;

    module.register_async_method("listblocks", |_params, ctx| async move {
        let mut blocks = Vec::new();
        for block in ctx.node.chain.iter() {
            let block = block.map_err(|err| RpcError::from(err).into_error_object())?;
            blocks.push(BlockInfo::from(&block));
        }
        Ok::<Vec<BlockInfo>, ErrorObjectOwned>(blocks)
    })?;

    module.register_async_method("gettransaction", |params, ctx| async move {
        let id: String = params.one()?;
        let id = hex::decode(&id)
            .map_err(|_| RpcError::InvalidParameter(format!("invalid id {id:?}")).into_error_object())?;

        let (block, tx) = ctx
            .node
            .chain
            .find_transaction(&id)
            .map_err(|err| RpcError::from(err).into_error_object())?;

        Ok::<TransactionInfo, ErrorObjectOwned>(TransactionInfo {
            tx: TxInfo::from(&tx),
            block_hash: hex::encode(&block.hash),
            block_height: block.height,
        })
    })?;

    module.register_async_method("getaddressutxos", |params, ctx| async move {
        let addr: String = params.one()?;
        let utxos = address_utxos(&ctx, &addr).map_err(RpcError::into_error_object)?;
        Ok::<Vec<OutputInfo>, ErrorObjectOwned>(utxos)
    })?;

    module.register_async_method("getaddressesutxos", |params, ctx| async move {
        let addresses: Vec<String> = params.one()?;

        let mut utxos = HashMap::with_capacity(addresses.len());
        for addr in addresses {
            let outputs = address_utxos(&ctx, &addr).map_err(RpcError::into_error_object)?;
            utxos.insert(addr, outputs);
        }
        Ok::<HashMap<String, Vec<OutputInfo>>, ErrorObjectOwned>(utxos)
    })?;

    Ok(())
}

fn address_utxos(ctx: &RpcContext, addr: &str) -> Result<Vec<OutputInfo>, RpcError> {
    let pub_key_hash = address::decode_pub_key_hash(addr)?;
    let outputs = ctx.node.utxo.find_utxos(&pub_key_hash)?;
    Ok(outputs.iter().map(OutputInfo::from).collect())
}
