//! TWAP Aggregator - Time-weighted averages over a node's own history
//!
//! A synthetic feed `<base>-<minutes>` resolves to the average of the node's
//! own signed values for `base` over the last `minutes` one-minute snapshots.
//! Snapshots come from the historical gateway and are cached between calls.

use ethers::types::Address;
use futures_util::future::join_all;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{OracleError, Result};
use crate::oracle::aggregator::DEFAULT_REQUEST_TIMEOUT;
use crate::oracle::snapshot_cache::SnapshotCache;
use crate::oracle::sources::DataPackagesSource;
use crate::oracle::with_timeout;
use crate::protocol::signing::{recover_signer_address, SignatureScheme};
use crate::types::SignedDataPackage;

const SNAPSHOT_INTERVAL_MS: u64 = 60_000;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Largest tolerated share of unusable snapshots in a window
pub const DEFAULT_MAX_MISSING_RATIO: f64 = 0.1;

/// One value observed at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwapSample {
    pub timestamp_ms: u64,
    pub value: f64,
}

impl TwapSample {
    pub fn new(timestamp_ms: u64, value: f64) -> Self {
        Self { timestamp_ms, value }
    }
}

/// Split `<base>-<minutes>` into the base feed id and the window length.
pub fn parse_twap_feed_id(twap_feed_id: &str) -> Result<(&str, u64)> {
    let invalid = || OracleError::InvalidTwapFeedId(twap_feed_id.to_string());
    let (base, minutes) = twap_feed_id.rsplit_once('-').ok_or_else(invalid)?;
    let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
    if base.is_empty() || minutes == 0 {
        return Err(invalid());
    }
    Ok((base, minutes))
}

/// Trapezoidal time-weighted average.
///
/// Each adjacent pair contributes its mean weighted by its share of the
/// whole window. A window of zero length degrades to the plain mean.
pub fn compute_time_weighted_average(samples: &[TwapSample]) -> Result<f64> {
    let mut sorted = samples.to_vec();
    sorted.sort_by_key(|s| s.timestamp_ms);

    let (first, last) = match (sorted.first(), sorted.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => {
            return Err(OracleError::InvalidParams(
                "time-weighted average needs at least one sample".to_string(),
            ))
        }
    };
    if sorted.len() == 1 {
        return Ok(first.value);
    }

    let window = (last.timestamp_ms - first.timestamp_ms) as f64;
    if window == 0.0 {
        return Ok(sorted.iter().map(|s| s.value).sum::<f64>() / sorted.len() as f64);
    }

    Ok(sorted
        .windows(2)
        .map(|pair| {
            let weight = (pair[1].timestamp_ms - pair[0].timestamp_ms) as f64 / window;
            (pair[0].value + pair[1].value) / 2.0 * weight
        })
        .sum())
}

/// Minute-rounded timestamps from `now_ms` backwards, newest first
fn snapshot_timestamps(now_ms: u64, minutes: u64) -> Vec<u64> {
    let newest = now_ms - now_ms % SNAPSHOT_INTERVAL_MS;
    (0..minutes)
        .map_while(|i| newest.checked_sub(i * SNAPSHOT_INTERVAL_MS))
        .collect()
}

fn find_own_package<'a>(
    packages: &'a [SignedDataPackage],
    own_signer: Address,
    scheme: &SignatureScheme,
) -> Option<&'a SignedDataPackage> {
    packages.iter().find(|package| {
        recover_signer_address(package, scheme)
            .map(|signer| signer == own_signer)
            .unwrap_or(false)
    })
}

/// Computes TWAP feeds from historical snapshots
pub struct TwapAggregator<S> {
    source: S,
    historical_gateway_url: String,
    data_service_id: String,
    own_signer: Address,
    scheme: SignatureScheme,
    cache: SnapshotCache,
    cache_ttl: Duration,
    max_missing_ratio: f64,
    request_timeout: Duration,
}

impl<S: DataPackagesSource> TwapAggregator<S> {
    pub fn new(
        source: S,
        historical_gateway_url: impl Into<String>,
        data_service_id: impl Into<String>,
        own_signer: Address,
    ) -> Self {
        Self {
            source,
            historical_gateway_url: historical_gateway_url.into(),
            data_service_id: data_service_id.into(),
            own_signer,
            scheme: SignatureScheme::EVM,
            cache: SnapshotCache::new(),
            cache_ttl: DEFAULT_CACHE_TTL,
            max_missing_ratio: DEFAULT_MAX_MISSING_RATIO,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_scheme(mut self, scheme: SignatureScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_max_missing_ratio(mut self, ratio: f64) -> Self {
        self.max_missing_ratio = ratio;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut SnapshotCache {
        &mut self.cache
    }

    /// Compute `twap_feed_id` as of `now_ms`.
    pub async fn compute_twap(&mut self, twap_feed_id: &str, now_ms: u64) -> Result<f64> {
        let (base_feed_id, minutes) = parse_twap_feed_id(twap_feed_id)?;

        let cutoff = now_ms.saturating_sub(self.cache_ttl.as_millis() as u64);
        let evicted = self.cache.evict_older_than(cutoff);
        if evicted > 0 {
            debug!(evicted, "Evicted stale snapshots");
        }

        let timestamps = snapshot_timestamps(now_ms, minutes);
        let misses: Vec<u64> = timestamps
            .iter()
            .copied()
            .filter(|ts| self.cache.get(*ts, base_feed_id).is_none())
            .collect();
        self.fetch_snapshots(base_feed_id, &misses).await;

        let expected = minutes as usize;
        let own_packages: Vec<&SignedDataPackage> = timestamps
            .iter()
            .filter_map(|ts| {
                let packages = self.cache.get(*ts, base_feed_id)?;
                let own = find_own_package(packages, self.own_signer, &self.scheme);
                if own.is_none() {
                    debug!(timestamp = ts, feed_id = %base_feed_id, "Snapshot has no own-signed package");
                }
                own
            })
            .collect();

        let usable = own_packages.len();
        let missing_ratio = (expected - usable) as f64 / expected as f64;
        if missing_ratio > self.max_missing_ratio {
            return Err(OracleError::InsufficientTwapCoverage {
                feed_id: twap_feed_id.to_string(),
                expected,
                usable,
                missing_pct: missing_ratio * 100.0,
            });
        }

        let samples: Vec<TwapSample> = own_packages
            .iter()
            .filter_map(|package| {
                let value = package
                    .data_package()
                    .data_point(base_feed_id)?
                    .numeric_value()
                    .filter(|v| v.is_finite())?;
                Some(TwapSample::new(package.timestamp_milliseconds(), value))
            })
            .collect();
        if samples.is_empty() {
            return Err(OracleError::NoUsableSamples(twap_feed_id.to_string()));
        }

        let twap = compute_time_weighted_average(&samples)?;
        info!(
            feed_id = %twap_feed_id,
            samples = samples.len(),
            expected,
            twap,
            "Computed TWAP"
        );
        Ok(twap)
    }

    /// Fetch every missing snapshot, tolerating individual failures.
    async fn fetch_snapshots(&mut self, base_feed_id: &str, timestamps: &[u64]) {
        if timestamps.is_empty() {
            return;
        }

        let url = self.historical_gateway_url.as_str();
        let results = join_all(timestamps.iter().map(|ts| {
            with_timeout(
                url,
                self.request_timeout,
                self.source.historical(url, &self.data_service_id, *ts),
            )
        }))
        .await;

        let mut failed = 0usize;
        for (ts, result) in timestamps.iter().zip(results) {
            match result {
                Ok(mut snapshot) => match snapshot.remove(base_feed_id) {
                    Some(packages) => self.cache.insert(*ts, base_feed_id, packages),
                    None => failed += 1,
                },
                Err(e) => {
                    debug!(timestamp = ts, error = %e, "Historical snapshot fetch failed");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            warn!(
                feed_id = %base_feed_id,
                failed,
                requested = timestamps.len(),
                "Some historical snapshots unavailable"
            );
        }
    }
}
