// ERROR TAXONOMY
// Shared failure types for configuration and chain access
//
// SAFETY INVARIANTS:
// 1. ConfigError is only fatal before monitoring starts
// 2. ChainError never aborts the process, it is classified by the health monitor
// 3. TransactionFailure messages never carry key material

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Field name -> every problem found with that field.
pub type ValidationReport = BTreeMap<String, Vec<String>>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to load configuration: {0}")]
    Load(String),

    #[error("Invalid configuration: {}", describe_report(.0))]
    Invalid(ValidationReport),
}

impl ConfigError {
    /// Problems for one field, empty when the field is fine.
    pub fn problems(&self, field: &str) -> &[String] {
        match self {
            ConfigError::Invalid(report) => report.get(field).map(Vec::as_slice).unwrap_or(&[]),
            ConfigError::Load(_) => &[],
        }
    }
}

fn describe_report(report: &ValidationReport) -> String {
    report
        .iter()
        .flat_map(|(field, errors)| errors.iter().map(move |e| format!("{}: {}", field, e)))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why a rotation transaction did not make it on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionFailure {
    /// The node refused the transaction
    Rejected(String),
    /// The transaction could not be signed (bad key, non-canonical signature)
    Signature(String),
    /// The broadcast never completed
    Network(String),
}

impl fmt::Display for TransactionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionFailure::Rejected(e) => write!(f, "rejected by node: {}", e),
            TransactionFailure::Signature(e) => write!(f, "signature failure: {}", e),
            TransactionFailure::Network(e) => write!(f, "network failure: {}", e),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Not connected to an API node")]
    NotConnected,

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transaction error: {0}")]
    Transaction(TransactionFailure),
}

impl ChainError {
    /// Transport-level failures invalidate the session.
    pub fn is_transport(&self) -> bool {
        matches!(self, ChainError::Connection(_) | ChainError::NotConnected)
    }
}
