//! Error taxonomy for the oracle pipeline
//!
//! Every failure surfaced by the library is an [`OracleError`]. Variants carry
//! the feed id, counts, URL or provider index needed to diagnose them.

use ethers::providers::ProviderError;
use ethers::types::Address;
use thiserror::Error;

pub type Result<T, E = OracleError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum OracleError {
    // Payload codec
    #[error("payload does not end with the redstone marker")]
    MarkerMismatch,

    #[error("payload truncated while reading {field}: needed {needed} bytes, {available} available")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("cannot encode {field}: {reason}")]
    Encoding { field: &'static str, reason: String },

    #[error("payload decoded with {0} unconsumed prefix bytes")]
    UnexpectedPrefix(usize),

    // Signatures
    #[error("signature error: {0}")]
    Signature(String),

    #[error("data package signed by {actual:?}, expected {expected:?}")]
    SignerMismatch { expected: Address, actual: Address },

    // Transport
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} returned status {status}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("request to {url} timed out after {after_ms}ms")]
    Timeout { url: String, after_ms: u64 },

    #[error("all {} data package requests failed: {}", causes.len(), causes.join("; "))]
    AllRequestsFailed { causes: Vec<String> },

    // Quorum
    #[error("insufficient unique signers for {feed_id}: expected {expected}, received {received}")]
    InsufficientSigners {
        feed_id: String,
        expected: usize,
        received: usize,
    },

    #[error("invalid request parameters: {0}")]
    InvalidParams(String),

    #[error("deviation selection for {feed_id} needs single data point packages, found {data_points}")]
    MultiPointDeviationUnsupported { feed_id: String, data_points: usize },

    // Contract wrapping
    #[error("contract has no method named {0}")]
    UnknownMethod(String),

    #[error("method {0} is overloaded and cannot be wrapped")]
    OverloadedMethod(String),

    #[error("contract call {method} failed: {reason}")]
    Contract { method: String, reason: String },

    #[error("no payload passed dry-run verification ({} candidates): {}", failures.len(), failures.join("; "))]
    NoPayloadPassedDryRun { failures: Vec<String> },

    // TWAP
    #[error("invalid TWAP feed id {0}, expected <base>-<minutes>")]
    InvalidTwapFeedId(String),

    #[error(
        "invalid number of responses to calculate TWAP for {feed_id} (expected {expected}, usable {usable}): gap of {missing_pct:.1}% present"
    )]
    InsufficientTwapCoverage {
        feed_id: String,
        expected: usize,
        usable: usize,
        missing_pct: f64,
    },

    #[error("no usable samples to calculate TWAP for {0}")]
    NoUsableSamples(String),

    // RPC
    #[error("rpc provider #{provider_index} failed: {source}")]
    Rpc {
        provider_index: usize,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl OracleError {
    pub(crate) fn encoding(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Encoding {
            field,
            reason: reason.into(),
        }
    }
}
