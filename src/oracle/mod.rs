//! Oracle module - Fetching and validating signed data packages
//!
//! Collects signed packages from cache services, selects per-feed quorums of
//! distinct signers and computes time-weighted averages over a node's own
//! historical packages.

mod aggregator;
mod snapshot_cache;
pub mod sources;
mod twap;

pub use aggregator::{
    select_biggest_deviation, value_deviation_pct, DataPackageAggregator,
    DataPackagesRequestParams, DEFAULT_REQUEST_TIMEOUT,
};
pub use snapshot_cache::SnapshotCache;
pub use sources::{DataPackagesSource, HttpDataPackagesSource};
pub use twap::{
    compute_time_weighted_average, parse_twap_feed_id, TwapAggregator, TwapSample,
    DEFAULT_MAX_MISSING_RATIO,
};

use std::future::Future;
use std::time::Duration;

use crate::error::{OracleError, Result};

/// Fail with [`OracleError::Timeout`] once `timeout` elapses.
///
/// The wrapped I/O is dropped, not cancelled remotely: a timeout means the
/// outcome is unknown.
pub async fn with_timeout<T>(
    url: &str,
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(OracleError::Timeout {
            url: url.to_string(),
            after_ms: timeout.as_millis() as u64,
        }),
    }
}
