//! Data Package Aggregator - Quorum selection across cache services
//!
//! Requests the latest packages from every configured URL at once and keeps
//! the first response in which every feed reaches the required number of
//! distinct signers.

use ethers::types::Address;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{OracleError, Result};
use crate::oracle::sources::DataPackagesSource;
use crate::oracle::with_timeout;
use crate::protocol::signing::{recover_signer_address, SignatureScheme};
use crate::types::{DataPackagesMap, DataPackagesResponse, SignedDataPackage};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// What to fetch and how many distinct signers each feed needs
#[derive(Debug, Clone)]
pub struct DataPackagesRequestParams {
    pub data_service_id: String,
    pub unique_signers_count: usize,
    /// Feeds to require; `None` checks every feed the service returns
    pub data_feeds: Option<Vec<String>>,
    pub urls: Vec<String>,
    /// When set, packages from any other signer are ignored
    pub authorized_signers: Option<Vec<Address>>,
}

impl DataPackagesRequestParams {
    pub fn new(data_service_id: impl Into<String>, unique_signers_count: usize, urls: Vec<String>) -> Self {
        Self {
            data_service_id: data_service_id.into(),
            unique_signers_count,
            data_feeds: None,
            urls,
            authorized_signers: None,
        }
    }

    pub fn with_data_feeds<I, T>(mut self, feeds: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.data_feeds = Some(feeds.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_authorized_signers(mut self, signers: Vec<Address>) -> Self {
        self.authorized_signers = Some(signers);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.unique_signers_count == 0 {
            return Err(OracleError::InvalidParams(
                "unique_signers_count must be at least 1".to_string(),
            ));
        }
        if self.urls.is_empty() {
            return Err(OracleError::InvalidParams("no cache service urls".to_string()));
        }
        Ok(())
    }
}

/// Fetches and quorum-checks data packages
pub struct DataPackageAggregator<S> {
    source: S,
    scheme: SignatureScheme,
    request_timeout: Duration,
}

impl<S: DataPackagesSource> DataPackageAggregator<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            scheme: SignatureScheme::EVM,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_scheme(mut self, scheme: SignatureScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn scheme(&self) -> &SignatureScheme {
        &self.scheme
    }

    /// Race all URLs; the first complete quorum wins.
    ///
    /// Requests still in flight when a winner arrives are dropped. Fails only
    /// when every URL failed, with one cause per URL.
    pub async fn request_data_packages(
        &self,
        params: &DataPackagesRequestParams,
    ) -> Result<DataPackagesResponse> {
        params.validate()?;

        let mut pending: FuturesUnordered<_> = params
            .urls
            .iter()
            .map(|url| async move { (url, self.request_from_url(url, params).await) })
            .collect();

        let mut causes = Vec::with_capacity(params.urls.len());
        while let Some((url, result)) = pending.next().await {
            match result {
                Ok(response) => {
                    debug!(url = %url, feeds = response.len(), "Data packages quorum reached");
                    return Ok(response);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Data packages request failed");
                    causes.push(format!("{}: {}", url, e));
                }
            }
        }

        Err(OracleError::AllRequestsFailed { causes })
    }

    async fn request_from_url(
        &self,
        url: &str,
        params: &DataPackagesRequestParams,
    ) -> Result<DataPackagesResponse> {
        let received = with_timeout(
            url,
            self.request_timeout,
            self.source.latest(url, &params.data_service_id),
        )
        .await?;
        self.parse_data_packages_response(received, params)
    }

    /// Select `unique_signers_count` freshest packages from distinct signers
    /// for every requested feed.
    pub fn parse_data_packages_response(
        &self,
        mut received: DataPackagesMap,
        params: &DataPackagesRequestParams,
    ) -> Result<DataPackagesResponse> {
        let feeds: Vec<String> = match &params.data_feeds {
            Some(feeds) => feeds.clone(),
            None => received.keys().cloned().collect(),
        };
        if feeds.is_empty() {
            return Err(OracleError::InvalidParams(
                "no data feeds requested or received".to_string(),
            ));
        }

        let mut selected = DataPackagesResponse::new();
        for feed_id in feeds {
            let packages = received.remove(&feed_id).unwrap_or_default();
            let quorum = self.select_freshest_unique(&feed_id, packages, params)?;
            selected.insert(feed_id, quorum);
        }
        Ok(selected)
    }

    fn select_freshest_unique(
        &self,
        feed_id: &str,
        packages: Vec<SignedDataPackage>,
        params: &DataPackagesRequestParams,
    ) -> Result<Vec<SignedDataPackage>> {
        let mut candidates: Vec<(Address, SignedDataPackage)> = packages
            .into_iter()
            .filter_map(|package| match recover_signer_address(&package, &self.scheme) {
                Ok(signer) => Some((signer, package)),
                Err(e) => {
                    warn!(feed_id = %feed_id, error = %e, "Dropping package with unrecoverable signer");
                    None
                }
            })
            .filter(|(signer, _)| {
                params
                    .authorized_signers
                    .as_ref()
                    .map_or(true, |allowed| allowed.contains(signer))
            })
            .collect();

        // Freshest first; a signer's older packages are then shadowed by its newest
        candidates.sort_by(|a, b| b.1.timestamp_milliseconds().cmp(&a.1.timestamp_milliseconds()));
        let mut seen = HashSet::new();
        candidates.retain(|(signer, _)| seen.insert(*signer));

        if candidates.len() < params.unique_signers_count {
            return Err(OracleError::InsufficientSigners {
                feed_id: feed_id.to_string(),
                expected: params.unique_signers_count,
                received: candidates.len(),
            });
        }

        Ok(candidates
            .into_iter()
            .take(params.unique_signers_count)
            .map(|(_, package)| package)
            .collect())
    }

    /// Fetch a larger quorum and keep, per feed, the packages deviating most
    /// from `value_to_compare`.
    ///
    /// Meant for backstop relayers that deliberately submit worst-case values.
    pub async fn request_data_packages_with_biggest_deviation(
        &self,
        params: &DataPackagesRequestParams,
        all_unique_signers_count: usize,
        value_to_compare: f64,
    ) -> Result<DataPackagesResponse> {
        if all_unique_signers_count < params.unique_signers_count {
            return Err(OracleError::InvalidParams(format!(
                "all_unique_signers_count ({}) is smaller than unique_signers_count ({})",
                all_unique_signers_count, params.unique_signers_count
            )));
        }

        let superset_params = DataPackagesRequestParams {
            unique_signers_count: all_unique_signers_count,
            ..params.clone()
        };
        let superset = self.request_data_packages(&superset_params).await?;
        select_biggest_deviation(superset, params.unique_signers_count, value_to_compare)
    }
}

/// Percentage deviation of `value` from `reference`; a zero reference counts
/// as infinitely deviating.
pub fn value_deviation_pct(reference: f64, value: f64) -> f64 {
    if reference == 0.0 {
        return f64::INFINITY;
    }
    (reference - value).abs() / reference.abs() * 100.0
}

/// Keep the `count` most deviating packages of every feed.
pub fn select_biggest_deviation(
    response: DataPackagesResponse,
    count: usize,
    value_to_compare: f64,
) -> Result<DataPackagesResponse> {
    response
        .into_iter()
        .map(|(feed_id, packages)| {
            let mut scored = packages
                .into_iter()
                .map(|package| {
                    let points = package.data_package().data_points();
                    if points.len() != 1 {
                        return Err(OracleError::MultiPointDeviationUnsupported {
                            feed_id: feed_id.clone(),
                            data_points: points.len(),
                        });
                    }
                    let value = points[0].numeric_value().ok_or_else(|| {
                        OracleError::encoding("data point value", format!("{} value is not numeric", feed_id))
                    })?;
                    Ok((value_deviation_pct(value_to_compare, value), package))
                })
                .collect::<Result<Vec<_>>>()?;

            if scored.len() < count {
                return Err(OracleError::InsufficientSigners {
                    feed_id,
                    expected: count,
                    received: scored.len(),
                });
            }

            scored.sort_by(|a, b| b.0.total_cmp(&a.0));
            let selected = scored.into_iter().take(count).map(|(_, p)| p).collect();
            Ok((feed_id, selected))
        })
        .collect()
}
