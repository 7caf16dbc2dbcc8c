use jsonrpsee::types::ErrorObjectOwned;

use minibit_db::ChainError;
use minibit_net::NodeError;
use minibit_wallet::WalletError;

/// JSON-RPC error codes, Bitcoin compatible where applicable.
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub enum RpcErrorCode {
    // Standard JSON-RPC 2.0 errors
    InvalidParams = -32602,
    InternalError = -32603,

    // Bitcoin-compatible custom errors
    MiscError = -1,
    InvalidAddressOrKey = -5,
    InvalidParameter = -8,
    WalletInsufficientFunds = -6,
    DatabaseError = -20,
    DeserializationError = -22,
    VerifyRejected = -26,
}

/// RPC error type.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("account has not enough funds")]
    InsufficientFunds,

    #[error("transaction not found: {0}")]
    TxNotFound(String),

    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("chain error: {0}")]
    Chain(String),

    #[error("node error: {0}")]
    Node(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    /// Converts the error to a JSON-RPC error object.
    pub fn into_error_object(self) -> ErrorObjectOwned {
        let (code, message) = match self {
            RpcError::InvalidParameter(msg) => (RpcErrorCode::InvalidParameter, msg),
            RpcError::InvalidAddress(msg) => (RpcErrorCode::InvalidAddressOrKey, msg),
            RpcError::InsufficientFunds => (
                RpcErrorCode::WalletInsufficientFunds,
                "account has not enough funds".to_string(),
            ),
            RpcError::TxNotFound(msg) => (
                RpcErrorCode::InvalidAddressOrKey,
                format!("transaction not found: {msg}"),
            ),
            RpcError::BlockNotFound(msg) => (
                RpcErrorCode::InvalidAddressOrKey,
                format!("block not found: {msg}"),
            ),
            RpcError::Wallet(msg) => (RpcErrorCode::MiscError, msg),
            RpcError::Chain(msg) => (RpcErrorCode::DatabaseError, msg),
            RpcError::Node(msg) => (RpcErrorCode::MiscError, msg),
            RpcError::Internal(msg) => (RpcErrorCode::InternalError, msg),
        };

        ErrorObjectOwned::owned(code as i32, message, None::<()>)
    }
}

impl From<ChainError> for RpcError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::InsufficientFunds => RpcError::InsufficientFunds,
            ChainError::UnknownBlock => RpcError::BlockNotFound(err.to_string()),
            ChainError::UnknownTx => RpcError::TxNotFound(err.to_string()),
            err => RpcError::Chain(err.to_string()),
        }
    }
}

impl From<WalletError> for RpcError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::InvalidAddress(addr) => RpcError::InvalidAddress(addr),
            err => RpcError::Wallet(err.to_string()),
        }
    }
}

impl From<NodeError> for RpcError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::Chain(err) => err.into(),
            err => RpcError::Node(err.to_string()),
        }
    }
}

impl From<RpcError> for ErrorObjectOwned {
    fn from(err: RpcError) -> Self {
        err.into_error_object()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_funds_keeps_its_code() {
        let err: RpcError = ChainError::InsufficientFunds.into();
        let object = err.into_error_object();
        assert_eq!(object.code(), RpcErrorCode::WalletInsufficientFunds as i32);
    }

    #[test]
    fn node_chain_errors_unwrap_to_chain_mapping() {
        let err: RpcError = NodeError::Chain(ChainError::UnknownBlock).into();
        assert!(matches!(err, RpcError::BlockNotFound(_)));
    }
}
