//! Mempool and transaction submission methods.

use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::RpcModule;

use minibit_db::new_transaction;
use minibit_wallet::Wallet;

use crate::error::RpcError;
use crate::types::SendTxParams;
use crate::RpcContext;

/// Registers the transaction methods.
pub fn register_methods(module: &mut RpcModule<RpcContext>) -> anyhow::Result<()> {
    module.register_async_method("getrawmempool", |_params, ctx| async move {
        let mut ids = Vec::with_capacity(ctx.node.mempool.count());
        ctx.node.mempool.for_each(|txid, _| ids.push(txid.to_string()));
        Ok::<Vec<String>, ErrorObjectOwned>(ids)
    })?;

    module.register_async_method("sendtx", |params, ctx| async move {
        let request: SendTxParams = params.one()?;

        let wallet = Wallet::load().map_err(|err| RpcError::from(err).into_error_object())?;
        let account = wallet.account(&request.account_name).ok_or_else(|| {
            RpcError::InvalidParameter(format!(
                "account {:?} does not exist",
                request.account_name
            ))
            .into_error_object()
        })?;

        let tx = new_transaction(
            account,
            &request.to,
            request.amount,
            request.fee,
            &ctx.node.utxo,
        )
        .map_err(|err| RpcError::from(err).into_error_object())?;

        // Route the transaction through our own tx handler so it enters
        // the mempool, then broadcast it.
        ctx.node
            .send_tx("", &tx)
            .await
            .map_err(|err| RpcError::from(err).into_error_object())?;

        wallet
            .save()
            .map_err(|err| RpcError::from(err).into_error_object())?;

        Ok::<String, ErrorObjectOwned>(hex::encode(&tx.id))
    })?;

    Ok(())
}
