//! Accounts and wallet persistence for minibit.
//!
//! The node core only consumes the in-memory [`Account`] contract: a
//! secp256k1 keypair, its Base58Check address and the public key hashes
//! spendable by it. The wallet file keeps named accounts between runs.

pub mod address;

use std::{collections::HashMap, fs, path::Path};

use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File where the wallet is stored.
///
/// The file is left unencrypted on purpose so it's easier to read its
/// content.
pub const WALLET_PATH: &str = "wallet.dat";

/// Wallet errors.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("no wallet found, create one first")]
    NotFound,
    #[error("wallet already exists")]
    AlreadyExists,
    #[error("account {0:?} does not exist")]
    UnknownAccount(String),
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error(transparent)]
    Crypto(#[from] secp256k1::Error),
    #[error(transparent)]
    Encoding(#[from] bincode::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A single-keypair account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// secp256k1 secret key bytes.
    secret: Vec<u8>,
}

impl Account {
    /// Creates an account with a fresh random keypair.
    pub fn new() -> Result<Self, WalletError> {
        let secret = SecretKey::new(&mut rand::thread_rng());
        Ok(Account {
            secret: secret.secret_bytes().to_vec(),
        })
    }

    /// The account's secret key.
    pub fn secret_key(&self) -> Result<SecretKey, WalletError> {
        Ok(SecretKey::from_slice(&self.secret)?)
    }

    /// The account's public key as the uncompressed X||Y concatenation
    /// (64 bytes).
    pub fn public_key(&self) -> Vec<u8> {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&self.secret).expect("stored key is valid");
        let public = PublicKey::from_secret_key(&secp, &secret);
        public.serialize_uncompressed()[1..].to_vec()
    }

    /// The account's Base58Check address.
    pub fn address(&self) -> String {
        address::pub_key_to_address(&self.public_key())
    }

    /// Returns an address of the account.
    ///
    /// A single-keypair account has one address for both receiving and
    /// change.
    pub fn new_address(&self, _receiving: bool) -> String {
        self.address()
    }

    /// Receiving and change addresses of the account.
    pub fn used_addresses(&self) -> Vec<String> {
        vec![self.address()]
    }

    /// Public key hashes of all the account addresses.
    pub fn pub_key_hashes(&self) -> Vec<Vec<u8>> {
        vec![address::hash_pub_key(&self.public_key())]
    }
}

/// A wallet holding named accounts.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Wallet {
    accounts: HashMap<String, Account>,
}

impl Wallet {
    /// Creates a new empty wallet, failing if one already exists.
    pub fn create() -> Result<Self, WalletError> {
        Self::create_at(WALLET_PATH)
    }

    /// Same as [`Wallet::create`] with an explicit path.
    pub fn create_at(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        if path.as_ref().exists() {
            return Err(WalletError::AlreadyExists);
        }

        let wallet = Wallet::default();
        wallet.save_to(path)?;
        Ok(wallet)
    }

    /// Loads the wallet from persistent storage.
    ///
    /// Call [`Wallet::save`] to write the changes back when done.
    pub fn load() -> Result<Self, WalletError> {
        Self::load_from(WALLET_PATH)
    }

    /// Same as [`Wallet::load`] with an explicit path.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(WalletError::NotFound)
            }
            Err(err) => return Err(err.into()),
        };

        Ok(bincode::deserialize(&content)?)
    }

    /// Stores the wallet into persistent storage.
    pub fn save(&self) -> Result<(), WalletError> {
        self.save_to(WALLET_PATH)
    }

    /// Same as [`Wallet::save`] with an explicit path.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), WalletError> {
        Ok(fs::write(path, bincode::serialize(self)?)?)
    }

    /// Returns the account with the given name.
    pub fn account(&self, name: &str) -> Option<&Account> {
        self.accounts.get(name)
    }

    /// Whether the account exists or not.
    pub fn account_exists(&self, name: &str) -> bool {
        self.accounts.contains_key(name)
    }

    /// Names of the wallet accounts.
    pub fn account_names(&self) -> Vec<String> {
        self.accounts.keys().cloned().collect()
    }

    /// Creates a new account under the given name.
    pub fn new_account(&mut self, name: &str) -> Result<&Account, WalletError> {
        let account = Account::new()?;
        self.accounts.insert(name.to_string(), account);
        Ok(&self.accounts[name])
    }
}
