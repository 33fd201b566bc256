//! Witness sentinel: watches a Graphene witness, rotates its signing key when
//! it keeps missing blocks and reports stale price feeds.
//!
//! The work lives in the member crates; this root re-exports them.

pub use sentinel_chain;
pub use sentinel_cli;
pub use sentinel_core;
pub use sentinel_monitor;
