//! RedStone Oracle Library
//!
//! Signed oracle data packages: the calldata payload codec, signer recovery,
//! quorum aggregation across cache services, payload-carrying contract calls,
//! TWAP feeds and JSON-RPC fail-over for relayers.

pub mod config;
pub mod contract;
pub mod error;
pub mod oracle;
pub mod protocol;
pub mod rpc;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{OracleError, Result};
pub use types::{
    DataPackage, DataPackagesResponse, DataPoint, RedstonePayload, SignedDataPackage,
};
