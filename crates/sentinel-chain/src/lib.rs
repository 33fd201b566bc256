//! Chain access for the witness sentinel.
//!
//! [`ChainClient`] is the contract the monitoring engine relies on; calls
//! never retry internally, retry policy belongs to the caller.
//! [`RpcChainClient`] implements it against a Graphene JSON-RPC node.

pub mod keys;
pub mod rpc;
pub mod transaction;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sentinel_core::{ChainError, HeadBlock, SigningSecret, WitnessInfo};

pub use keys::KeyError;
pub use rpc::{ClientOptions, RpcChainClient};
pub use transaction::{SignedTransaction, Transaction, WitnessUpdate};

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Open a session to `endpoint`, replacing any previous one.
    async fn connect(&self, endpoint: &str) -> Result<(), ChainError>;

    /// Endpoint of the live session, None when disconnected.
    fn session_endpoint(&self) -> Option<String>;

    fn disconnect(&self);

    async fn head_block(&self) -> Result<HeadBlock, ChainError>;

    async fn witness_info(&self, witness_id: &str) -> Result<WitnessInfo, ChainError>;

    /// Last time `publisher` published a feed for `asset`, None if never.
    async fn feed_timestamp(&self, asset: &str, publisher: &str) -> Result<Option<DateTime<Utc>>, ChainError>;

    /// Sign and submit a witness_update moving `witness` to `new_key`.
    async fn broadcast_key_update(
        &self,
        witness: &WitnessInfo,
        new_key: &str,
        private_key: &SigningSecret,
    ) -> Result<(), ChainError>;
}
