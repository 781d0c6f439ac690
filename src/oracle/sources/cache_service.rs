//! HTTP client for cache services and historical gateways
//!
//! Endpoints:
//! - `GET {url}/data-packages/latest/{dataServiceId}`
//! - `GET {url}/data-packages/historical/{dataServiceId}/{timestampMs}`

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT},
    Client,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::DataPackagesSource;
use crate::error::{OracleError, Result};
use crate::types::{DataPackagesMap, SignedDataPackage, SignedDataPackagePlainObj};

/// reqwest-backed [`DataPackagesSource`]
#[derive(Debug, Clone)]
pub struct HttpDataPackagesSource {
    client: Client,
}

impl HttpDataPackagesSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| OracleError::InvalidParams(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Reuse an existing client (shared connection pool)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn fetch(&self, url: String) -> Result<DataPackagesMap> {
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| OracleError::Http {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::UnexpectedStatus {
                url,
                status: status.as_u16(),
            });
        }

        let plain: HashMap<String, Vec<SignedDataPackagePlainObj>> =
            response.json().await.map_err(|source| OracleError::Http {
                url: url.clone(),
                source,
            })?;

        let packages = parse_plain_response(&url, plain);
        debug!(url = %url, feeds = packages.len(), "Fetched data packages");
        Ok(packages)
    }
}

/// Convert plain objects, dropping (and logging) packages that do not parse.
pub(crate) fn parse_plain_response(
    url: &str,
    plain: HashMap<String, Vec<SignedDataPackagePlainObj>>,
) -> DataPackagesMap {
    plain
        .into_iter()
        .map(|(feed_id, packages)| {
            let parsed = packages
                .into_iter()
                .filter_map(|p| match SignedDataPackage::try_from(p) {
                    Ok(signed) => Some(signed),
                    Err(e) => {
                        warn!(url = %url, feed_id = %feed_id, error = %e, "Skipping malformed data package");
                        None
                    }
                })
                .collect();
            (feed_id, parsed)
        })
        .collect()
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

#[async_trait]
impl DataPackagesSource for HttpDataPackagesSource {
    async fn latest(&self, url: &str, data_service_id: &str) -> Result<DataPackagesMap> {
        self.fetch(join_url(
            url,
            &format!("data-packages/latest/{}", data_service_id),
        ))
        .await
    }

    async fn historical(
        &self,
        url: &str,
        data_service_id: &str,
        timestamp_ms: u64,
    ) -> Result<DataPackagesMap> {
        self.fetch(join_url(
            url,
            &format!("data-packages/historical/{}/{}", data_service_id, timestamp_ms),
        ))
        .await
    }
}
