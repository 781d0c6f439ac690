//! Data package sources (cache services and historical gateways)

mod cache_service;

pub use cache_service::HttpDataPackagesSource;

use crate::error::Result;
use crate::types::DataPackagesMap;
use async_trait::async_trait;

/// Trait for anything that serves signed data packages
#[async_trait]
pub trait DataPackagesSource: Send + Sync {
    /// Latest packages of a data service, per feed
    async fn latest(&self, url: &str, data_service_id: &str) -> Result<DataPackagesMap>;

    /// Packages of a data service at a minute-rounded timestamp, per feed
    async fn historical(
        &self,
        url: &str,
        data_service_id: &str,
        timestamp_ms: u64,
    ) -> Result<DataPackagesMap>;
}

#[async_trait]
impl<S: DataPackagesSource + ?Sized> DataPackagesSource for std::sync::Arc<S> {
    async fn latest(&self, url: &str, data_service_id: &str) -> Result<DataPackagesMap> {
        (**self).latest(url, data_service_id).await
    }

    async fn historical(
        &self,
        url: &str,
        data_service_id: &str,
        timestamp_ms: u64,
    ) -> Result<DataPackagesMap> {
        (**self).historical(url, data_service_id, timestamp_ms).await
    }
}
