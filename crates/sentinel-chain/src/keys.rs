// KEY CODECS
// Graphene public keys (<prefix><base58>) and WIF private keys
//
// SAFETY INVARIANTS:
// 1. Decoded secret keys never leave this crate except to sign
// 2. A WIF key with a bad checksum is rejected, never "repaired"
// 3. Public keys must be valid compressed secp256k1 points

use secp256k1::{PublicKey, SecretKey};
use sentinel_core::SigningSecret;
use sha2::{Digest, Sha256};
use thiserror::Error;

const COMPRESSED_KEY_LEN: usize = 33;
const CHECKSUM_LEN: usize = 4;
const WIF_VERSION: u8 = 0x80;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Public key '{0}' does not start with an accepted prefix")]
    Prefix(String),

    #[error("Invalid base58 encoding")]
    Base58,

    #[error("Unexpected key length: {0} bytes")]
    Length(usize),

    #[error("Key checksum mismatch")]
    Checksum,

    #[error("Unsupported WIF version byte {0:#04x}")]
    Version(u8),

    #[error("Not a valid secp256k1 key")]
    Curve,
}

/// Decode `<prefix><base58(key || checksum)>` into the 33-byte compressed key.
///
/// The ripemd160 checksum is left to the node, which rejects malformed keys
/// when the transaction is pushed.
pub fn decode_public_key(key: &str, prefixes: &[String]) -> Result<[u8; COMPRESSED_KEY_LEN], KeyError> {
    let body = prefixes
        .iter()
        .find_map(|p| key.strip_prefix(p.as_str()))
        .ok_or_else(|| KeyError::Prefix(key.to_string()))?;
    let raw = bs58::decode(body).into_vec().map_err(|_| KeyError::Base58)?;
    if raw.len() != COMPRESSED_KEY_LEN + CHECKSUM_LEN {
        return Err(KeyError::Length(raw.len()));
    }

    let point = PublicKey::from_slice(&raw[..COMPRESSED_KEY_LEN]).map_err(|_| KeyError::Curve)?;
    Ok(point.serialize())
}

/// Decode a WIF private key (`0x80 || key || sha256d checksum`).
pub fn decode_wif(secret: &SigningSecret) -> Result<SecretKey, KeyError> {
    let raw = bs58::decode(secret.expose().trim()).into_vec().map_err(|_| KeyError::Base58)?;
    if raw.len() != 1 + 32 + CHECKSUM_LEN {
        return Err(KeyError::Length(raw.len()));
    }
    let (payload, checksum) = raw.split_at(1 + 32);
    let digest = Sha256::digest(Sha256::digest(payload));
    if digest[..CHECKSUM_LEN] != checksum[..] {
        return Err(KeyError::Checksum);
    }
    if payload[0] != WIF_VERSION {
        return Err(KeyError::Version(payload[0]));
    }
    SecretKey::from_slice(&payload[1..]).map_err(|_| KeyError::Curve)
}
