//! Base58Check address codec.

use base58::{FromBase58, ToBase58};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use minibit_core::Output;

use crate::WalletError;

/// https://en.bitcoin.it/wiki/Base58Check_encoding#Version_bytes
const PUB_KEY_HASH_VERSION: u8 = 0x00;

const CHECKSUM_LENGTH: usize = 4;

/// Hashes the public key with SHA-256 followed by RIPEMD-160.
///
/// https://bitcoin.stackexchange.com/questions/9202/why-does-bitcoin-use-two-hash-functions-sha-256-and-ripemd-160-to-create-an-ad
pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    Ripemd160::digest(Sha256::digest(pub_key)).to_vec()
}

/// Encodes a public key into a Base58Check address.
pub fn pub_key_to_address(pub_key: &[u8]) -> String {
    // version + pubKeyHash + checksum
    let mut payload = Vec::with_capacity(25);
    payload.push(PUB_KEY_HASH_VERSION);
    payload.extend_from_slice(&hash_pub_key(pub_key));
    let sum = checksum(&payload);
    payload.extend_from_slice(&sum);

    payload.to_base58()
}

/// Extracts the public key hash out of a Base58Check address.
pub fn decode_pub_key_hash(address: &str) -> Result<Vec<u8>, WalletError> {
    let payload = decode_checked(address)?;
    Ok(payload[1..payload.len() - CHECKSUM_LENGTH].to_vec())
}

/// Checks if an address is valid.
pub fn validate_address(address: &str) -> Result<(), WalletError> {
    decode_checked(address).map(|_| ())
}

/// Creates a new transaction output locked with the address' public key
/// hash.
pub fn new_output(value: u64, address: &str) -> Result<Output, WalletError> {
    Ok(Output {
        pub_key_hash: decode_pub_key_hash(address)?,
        value,
    })
}

fn decode_checked(address: &str) -> Result<Vec<u8>, WalletError> {
    let invalid = || WalletError::InvalidAddress(address.to_string());

    let payload = address.from_base58().map_err(|_| invalid())?;
    if payload.len() <= CHECKSUM_LENGTH + 1 {
        return Err(invalid());
    }

    let (versioned, actual) = payload.split_at(payload.len() - CHECKSUM_LENGTH);
    if checksum(versioned) != actual {
        return Err(invalid());
    }

    Ok(payload)
}

/// First four bytes of the double SHA-256 of the versioned payload.
fn checksum(payload: &[u8]) -> Vec<u8> {
    let hash = Sha256::digest(Sha256::digest(payload));
    hash[..CHECKSUM_LENGTH].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENESIS_ADDR: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    #[test]
    fn validates_known_address() {
        validate_address(GENESIS_ADDR).unwrap();
        assert_eq!(
            hex::encode(decode_pub_key_hash(GENESIS_ADDR).unwrap()),
            "62e907b15cbf27d5425399ebf6f0fb50ebb88f18"
        );
    }

    #[test]
    fn rejects_any_single_character_change() {
        let chars: Vec<char> = GENESIS_ADDR.chars().collect();
        for i in 0..chars.len() {
            let mut mutated = chars.clone();
            mutated[i] = if mutated[i] == '2' { '3' } else { '2' };
            let mutated: String = mutated.into_iter().collect();
            assert!(
                validate_address(&mutated).is_err(),
                "mutation at {i} accepted: {mutated}"
            );
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(validate_address("").is_err());
        assert!(validate_address("0OIl").is_err());
        assert!(validate_address("1111").is_err());
    }

    #[test]
    fn address_round_trip() {
        let pub_key = [7u8; 64];
        let address = pub_key_to_address(&pub_key);
        validate_address(&address).unwrap();
        assert_eq!(decode_pub_key_hash(&address).unwrap(), hash_pub_key(&pub_key));
    }

    #[test]
    fn output_locks_to_address_hash() {
        let output = new_output(42, GENESIS_ADDR).unwrap();
        assert_eq!(output.value, 42);
        assert_eq!(
            hex::encode(&output.pub_key_hash),
            "62e907b15cbf27d5425399ebf6f0fb50ebb88f18"
        );
    }
}
