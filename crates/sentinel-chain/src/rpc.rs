// GRAPHENE JSON-RPC CLIENT
// Read queries and witness_update broadcasts against a single API node
//
// SAFETY INVARIANTS:
// 1. No call retries internally; failures surface to the caller immediately
// 2. A transport failure drops the session so the next poll reconnects from scratch
// 3. The private key is decoded only inside broadcast_key_update and never logged

use crate::keys::decode_wif;
use crate::transaction::{AssetAmount, Transaction, TransactionBuildError, WitnessUpdate};
use crate::ChainClient;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, info, warn};
use parking_lot::RwLock;
use sentinel_core::{ChainError, HeadBlock, SigningSecret, TransactionFailure, WitnessInfo};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const DATABASE_API: &str = "database";
const BROADCAST_API: &str = "network_broadcast";
const CHAIN_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Accepted public key prefixes (e.g. TUSC)
    pub key_prefixes: Vec<String>,

    /// Asset the transaction fee is paid in
    pub core_asset: String,

    /// Upper bound for a single round trip
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            key_prefixes: vec!["TUSC".to_string(), "TEST".to_string()],
            core_asset: "1.3.0".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    /// Endpoint as configured (ws:// or wss://)
    endpoint: String,
    /// HTTP form of the endpoint
    url: String,
    chain_id: [u8; 32],
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlexibleInt {
    Number(i64),
    Text(String),
}

impl FlexibleInt {
    fn value(&self) -> Result<i64, ChainError> {
        match self {
            FlexibleInt::Number(n) => Ok(*n),
            FlexibleInt::Text(s) => s
                .parse()
                .map_err(|_| ChainError::Malformed(format!("'{}' is not an integer", s))),
        }
    }

    fn unsigned(&self) -> Result<u64, ChainError> {
        u64::try_from(self.value()?).map_err(|_| ChainError::Malformed("negative counter".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct DynamicGlobalProperties {
    head_block_number: u64,
    head_block_id: String,
    time: String,
}

#[derive(Debug, Deserialize)]
struct GlobalProperties {
    active_witnesses: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WitnessObject {
    id: String,
    witness_account: String,
    signing_key: String,
    total_votes: FlexibleInt,
    total_missed: FlexibleInt,
}

#[derive(Debug, Deserialize)]
struct AssetObject {
    symbol: String,
    bitasset_data_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BitassetData {
    /// (publisher, (published_at, feed))
    feeds: Vec<(String, (String, Value))>,
}

#[derive(Debug, Deserialize)]
struct RequiredFee {
    amount: FlexibleInt,
    asset_id: String,
}

pub struct RpcChainClient {
    http: reqwest::Client,
    options: ClientOptions,
    session: RwLock<Option<Session>>,
    next_id: AtomicU64,
}

impl RpcChainClient {
    pub fn new(options: ClientOptions) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| ChainError::Connection(e.to_string()))?;
        Ok(RpcChainClient {
            http,
            options,
            session: RwLock::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    fn current_session(&self) -> Result<Session, ChainError> {
        self.session.read().clone().ok_or(ChainError::NotConnected)
    }

    async fn call<T: DeserializeOwned>(&self, api: &str, method: &str, params: Value) -> Result<T, ChainError> {
        let session = self.current_session()?;
        let result = self.call_at(&session.url, api, method, params).await;
        if let Err(e) = &result {
            if e.is_transport() {
                warn!("Dropping session to {} after transport failure: {}", session.endpoint, e);
                self.disconnect();
            }
        }
        serde_json::from_value(result?).map_err(|e| ChainError::Malformed(format!("{}: {}", method, e)))
    }

    async fn call_at(&self, url: &str, api: &str, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "call",
            "params": [api, method, params],
        });
        debug!("rpc #{} {}.{}", id, api, method);

        let response = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::Connection(e.to_string()))?;
        let status = response.status();
        let body: RpcResponse = match response.json().await {
            Ok(body) => body,
            Err(e) if status.is_success() => return Err(ChainError::Malformed(e.to_string())),
            Err(_) => return Err(ChainError::Connection(format!("HTTP {}", status))),
        };
        if let Some(error) = body.error {
            return Err(ChainError::Rpc(error.message));
        }
        Ok(body.result)
    }

    async fn global_properties(&self) -> Result<GlobalProperties, ChainError> {
        self.call(DATABASE_API, "get_global_properties", json!([])).await
    }

    async fn required_fee(&self, operation: &WitnessUpdate) -> Result<AssetAmount, ChainError> {
        let fees: Vec<RequiredFee> = self
            .call(
                DATABASE_API,
                "get_required_fees",
                json!([[operation.to_tagged_json()], self.options.core_asset]),
            )
            .await?;
        let fee = fees
            .into_iter()
            .next()
            .ok_or_else(|| ChainError::Malformed("get_required_fees returned nothing".to_string()))?;
        Ok(AssetAmount {
            amount: fee.amount.value()?,
            asset_id: fee.asset_id,
        })
    }

    async fn build_and_submit(
        &self,
        witness: &WitnessInfo,
        new_key: &str,
        private_key: &SigningSecret,
    ) -> Result<(), ChainError> {
        let session = self.current_session()?;
        let secret = decode_wif(private_key).map_err(|e| signature_failure(e.to_string()))?;

        let mut operation = WitnessUpdate {
            fee: AssetAmount {
                amount: 0,
                asset_id: self.options.core_asset.clone(),
            },
            witness: witness.witness_id.clone(),
            witness_account: witness.witness_account.clone(),
            new_signing_key: new_key.to_string(),
        };
        operation.fee = self.required_fee(&operation).await?;

        let head = self.head_block().await?;
        let signed = Transaction::referencing(&head, operation)
            .and_then(|tx| tx.sign(&session.chain_id, &secret, &self.options.key_prefixes))
            .map_err(|e| match e {
                TransactionBuildError::BlockId(_) => ChainError::Malformed(e.to_string()),
                other => signature_failure(other.to_string()),
            })?;

        let _: Value = self
            .call(BROADCAST_API, "broadcast_transaction", json!([signed.to_json()]))
            .await?;
        info!("witness_update for {} submitted (new key {})", witness.witness_id, new_key);
        Ok(())
    }
}

fn signature_failure(reason: String) -> ChainError {
    ChainError::Transaction(TransactionFailure::Signature(reason))
}

/// Fold any failure on the broadcast path into a TransactionError.
fn as_transaction_error(error: ChainError) -> ChainError {
    match error {
        ChainError::Transaction(_) => error,
        ChainError::Rpc(reason) => ChainError::Transaction(TransactionFailure::Rejected(reason)),
        other => ChainError::Transaction(TransactionFailure::Network(other.to_string())),
    }
}

/// `ws(s)://host/path` -> `http(s)://host/path`.
pub fn http_url(endpoint: &str) -> Result<String, ChainError> {
    if let Some(rest) = endpoint.strip_prefix("wss://") {
        Ok(format!("https://{}", rest))
    } else if let Some(rest) = endpoint.strip_prefix("ws://") {
        Ok(format!("http://{}", rest))
    } else if endpoint.starts_with("https://") || endpoint.starts_with("http://") {
        Ok(endpoint.to_string())
    } else {
        Err(ChainError::Connection(format!("unsupported endpoint '{}'", endpoint)))
    }
}

pub fn parse_chain_time(text: &str) -> Result<DateTime<Utc>, ChainError> {
    NaiveDateTime::parse_from_str(text.trim_end_matches('Z'), CHAIN_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| ChainError::Malformed(format!("bad chain time '{}'", text)))
}

fn parse_chain_id(text: &str) -> Result<[u8; 32], ChainError> {
    let bytes = hex::decode(text).map_err(|_| ChainError::Malformed(format!("bad chain id '{}'", text)))?;
    let mut chain_id = [0u8; 32];
    if bytes.len() != chain_id.len() {
        return Err(ChainError::Malformed(format!("bad chain id length {}", bytes.len())));
    }
    chain_id.copy_from_slice(&bytes);
    Ok(chain_id)
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn connect(&self, endpoint: &str) -> Result<(), ChainError> {
        let url = http_url(endpoint)?;
        let chain_id: String = serde_json::from_value(self.call_at(&url, DATABASE_API, "get_chain_id", json!([])).await?)
            .map_err(|e| ChainError::Malformed(e.to_string()))?;
        let chain_id = parse_chain_id(&chain_id)?;

        *self.session.write() = Some(Session {
            endpoint: endpoint.to_string(),
            url,
            chain_id,
        });
        info!("Connected to {} (chain {})", endpoint, hex::encode(&chain_id[..4]));
        Ok(())
    }

    fn session_endpoint(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.endpoint.clone())
    }

    fn disconnect(&self) {
        self.session.write().take();
    }

    async fn head_block(&self) -> Result<HeadBlock, ChainError> {
        let props: DynamicGlobalProperties = self
            .call(DATABASE_API, "get_dynamic_global_properties", json!([]))
            .await?;
        Ok(HeadBlock {
            height: props.head_block_number,
            id: props.head_block_id,
            timestamp: parse_chain_time(&props.time)?,
        })
    }

    async fn witness_info(&self, witness_id: &str) -> Result<WitnessInfo, ChainError> {
        let mut objects: Vec<Option<WitnessObject>> =
            self.call(DATABASE_API, "get_objects", json!([[witness_id]])).await?;
        let witness = objects
            .pop()
            .flatten()
            .ok_or_else(|| ChainError::NotFound(format!("witness {}", witness_id)))?;
        let globals = self.global_properties().await?;

        Ok(WitnessInfo {
            is_active: globals.active_witnesses.iter().any(|w| *w == witness.id),
            witness_id: witness.id,
            witness_account: witness.witness_account,
            active_signing_key: witness.signing_key,
            total_missed: witness.total_missed.unsigned()?,
            total_votes: witness.total_votes.unsigned()?,
        })
    }

    async fn feed_timestamp(&self, asset: &str, publisher: &str) -> Result<Option<DateTime<Utc>>, ChainError> {
        let mut assets: Vec<Option<AssetObject>> = self
            .call(DATABASE_API, "lookup_asset_symbols", json!([[asset]]))
            .await?;
        let asset_object = assets
            .pop()
            .flatten()
            .ok_or_else(|| ChainError::NotFound(format!("asset {}", asset)))?;
        let bitasset_id = match asset_object.bitasset_data_id {
            Some(id) => id,
            None => {
                warn!("{} is not a market-pegged asset, it has no feeds", asset_object.symbol);
                return Ok(None);
            }
        };

        let mut data: Vec<Option<BitassetData>> =
            self.call(DATABASE_API, "get_objects", json!([[bitasset_id]])).await?;
        let data = data
            .pop()
            .flatten()
            .ok_or_else(|| ChainError::NotFound(format!("bitasset data for {}", asset)))?;

        data.feeds
            .iter()
            .find(|(account, _)| account == publisher)
            .map(|(_, (published_at, _))| parse_chain_time(published_at))
            .transpose()
    }

    async fn broadcast_key_update(
        &self,
        witness: &WitnessInfo,
        new_key: &str,
        private_key: &SigningSecret,
    ) -> Result<(), ChainError> {
        self.build_and_submit(witness, new_key, private_key)
            .await
            .map_err(as_transaction_error)
    }
}
