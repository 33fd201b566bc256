// WITNESS UPDATE TRANSACTION
// Builds, serializes and signs the transaction that moves a witness to a new signing key
//
// SAFETY INVARIANTS:
// 1. The signed digest is sha256(chain_id || binary transaction), nothing else
// 2. Only canonical signatures are emitted (nodes reject the rest)
// 3. The transaction references a recent head block and expires shortly after it

use crate::keys::{decode_public_key, KeyError};
use chrono::{DateTime, Duration, Utc};
use secp256k1::{Message, Secp256k1, SecretKey};
use sentinel_core::HeadBlock;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Operation tag of `witness_update_operation`.
pub const WITNESS_UPDATE_OPERATION: u64 = 21;

/// Seconds a rotation transaction stays valid after the head block time.
pub const TRANSACTION_EXPIRATION_SECS: i64 = 60;

const MAX_NONCE_ATTEMPTS: u32 = 256;

#[derive(Debug, Error)]
pub enum TransactionBuildError {
    #[error("Invalid object id '{0}'")]
    ObjectId(String),

    #[error("Invalid head block id '{0}'")]
    BlockId(String),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetAmount {
    pub amount: i64,
    pub asset_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessUpdate {
    pub fee: AssetAmount,
    pub witness: String,
    pub witness_account: String,
    pub new_signing_key: String,
}

impl WitnessUpdate {
    pub fn to_json(&self) -> Value {
        json!({
            "fee": { "amount": self.fee.amount, "asset_id": self.fee.asset_id },
            "witness": self.witness,
            "witness_account": self.witness_account,
            "new_signing_key": self.new_signing_key,
        })
    }

    /// `[21, {...}]`, the form fee queries and broadcasts expect.
    pub fn to_tagged_json(&self) -> Value {
        json!([WITNESS_UPDATE_OPERATION, self.to_json()])
    }

    fn write_bytes(&self, out: &mut Vec<u8>, prefixes: &[String]) -> Result<(), TransactionBuildError> {
        out.extend_from_slice(&self.fee.amount.to_le_bytes());
        write_varint(out, object_instance(&self.fee.asset_id)?);
        write_varint(out, object_instance(&self.witness)?);
        write_varint(out, object_instance(&self.witness_account)?);
        // new_url: not changed
        out.push(0);
        out.push(1);
        out.extend_from_slice(&decode_public_key(&self.new_signing_key, prefixes)?);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    pub expiration: DateTime<Utc>,
    pub operation: WitnessUpdate,
}

impl Transaction {
    /// Reference `head` and expire `TRANSACTION_EXPIRATION_SECS` after it.
    pub fn referencing(head: &HeadBlock, operation: WitnessUpdate) -> Result<Self, TransactionBuildError> {
        let id = hex::decode(&head.id).map_err(|_| TransactionBuildError::BlockId(head.id.clone()))?;
        if id.len() < 8 {
            return Err(TransactionBuildError::BlockId(head.id.clone()));
        }
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&id[4..8]);

        Ok(Transaction {
            ref_block_num: (head.height & 0xffff) as u16,
            ref_block_prefix: u32::from_le_bytes(prefix),
            expiration: head.timestamp + Duration::seconds(TRANSACTION_EXPIRATION_SECS),
            operation,
        })
    }

    pub fn to_bytes(&self, prefixes: &[String]) -> Result<Vec<u8>, TransactionBuildError> {
        let mut out = Vec::with_capacity(96);
        out.extend_from_slice(&self.ref_block_num.to_le_bytes());
        out.extend_from_slice(&self.ref_block_prefix.to_le_bytes());
        out.extend_from_slice(&(self.expiration.timestamp() as u32).to_le_bytes());
        write_varint(&mut out, 1);
        write_varint(&mut out, WITNESS_UPDATE_OPERATION);
        self.operation.write_bytes(&mut out, prefixes)?;
        // extensions
        write_varint(&mut out, 0);
        Ok(out)
    }

    pub fn digest(&self, chain_id: &[u8; 32], prefixes: &[String]) -> Result<[u8; 32], TransactionBuildError> {
        let mut hasher = Sha256::new();
        hasher.update(chain_id);
        hasher.update(self.to_bytes(prefixes)?);
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        Ok(digest)
    }

    pub fn sign(
        self,
        chain_id: &[u8; 32],
        secret: &SecretKey,
        prefixes: &[String],
    ) -> Result<SignedTransaction, TransactionBuildError> {
        let digest = self.digest(chain_id, prefixes)?;
        let signature = sign_canonical(&digest, secret)?;
        Ok(SignedTransaction {
            transaction: self,
            signatures: vec![hex::encode(signature)],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signatures: Vec<String>,
}

impl SignedTransaction {
    pub fn to_json(&self) -> Value {
        let tx = &self.transaction;
        json!({
            "ref_block_num": tx.ref_block_num,
            "ref_block_prefix": tx.ref_block_prefix,
            "expiration": tx.expiration.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "operations": [tx.operation.to_tagged_json()],
            "extensions": [],
            "signatures": self.signatures,
        })
    }
}

/// Compact recoverable signature `[27 + 4 + recid, r, s]`, retried until canonical.
pub fn sign_canonical(digest: &[u8; 32], secret: &SecretKey) -> Result<[u8; 65], TransactionBuildError> {
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest_slice(digest).map_err(|e| TransactionBuildError::Signing(e.to_string()))?;

    for attempt in 0..MAX_NONCE_ATTEMPTS {
        let mut nonce = [0u8; 32];
        let mut hasher = Sha256::new();
        hasher.update(digest);
        hasher.update(attempt.to_le_bytes());
        nonce.copy_from_slice(&hasher.finalize());

        let signature = secp.sign_ecdsa_recoverable_with_noncedata(&message, secret, &nonce);
        let (recovery_id, compact) = signature.serialize_compact();
        if is_canonical(&compact) {
            let mut out = [0u8; 65];
            out[0] = 27 + 4 + recovery_id.to_i32() as u8;
            out[1..].copy_from_slice(&compact);
            return Ok(out);
        }
    }
    Err(TransactionBuildError::Signing(format!(
        "no canonical signature after {} attempts",
        MAX_NONCE_ATTEMPTS
    )))
}

/// Graphene's canonical form: neither r nor s may need a leading zero byte.
pub fn is_canonical(compact: &[u8; 64]) -> bool {
    compact[0] & 0x80 == 0
        && !(compact[0] == 0 && compact[1] & 0x80 == 0)
        && compact[32] & 0x80 == 0
        && !(compact[32] == 0 && compact[33] & 0x80 == 0)
}

/// Instance number of a `space.type.instance` object id.
pub fn object_instance(id: &str) -> Result<u64, TransactionBuildError> {
    let mut parts = id.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(space), Some(kind), Some(instance), None)
            if space.parse::<u8>().is_ok() && kind.parse::<u8>().is_ok() =>
        {
            instance.parse().map_err(|_| TransactionBuildError::ObjectId(id.to_string()))
        }
        _ => Err(TransactionBuildError::ObjectId(id.to_string())),
    }
}

/// Unsigned LEB128, as used by fc for lengths and object ids.
pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}
