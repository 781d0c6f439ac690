//! redstone-relayer
//!
//! Fetches a signed quorum from the configured cache services and logs the
//! payload that would be appended to contract calls. Optionally computes TWAP
//! feeds and checks the fail-over RPC chain head.

use anyhow::{Context, Result};
use ethers::providers::{Http, Middleware, Provider};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use redstone_oracle::config::AppConfig;
use redstone_oracle::oracle::{DataPackageAggregator, HttpDataPackagesSource, TwapAggregator};
use redstone_oracle::protocol::encode_payload;
use redstone_oracle::rpc::FallbackProvider;
use redstone_oracle::types::{unsigned_metadata, RedstonePayload};

fn init_logging(level: &str, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log filter")?;

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging.level, config.logging.json)?;
    info!(config = %config, "Starting redstone-relayer");

    let source = HttpDataPackagesSource::new(config.request_timeout())?;
    let aggregator =
        DataPackageAggregator::new(source.clone()).with_request_timeout(config.request_timeout());
    let params = config.request_params()?;

    let response = aggregator
        .request_data_packages(&params)
        .await
        .context("Failed to fetch data packages")?;
    for (feed_id, packages) in &response {
        info!(feed_id = %feed_id, packages = packages.len(), "Quorum reached");
    }

    let payload = RedstonePayload::from_response(&response, unsigned_metadata("redstone-relayer"));
    let encoded = encode_payload(&payload)?;
    info!(
        bytes = encoded.len(),
        payload = %format!("0x{}", hex::encode(&encoded)),
        "Encoded payload"
    );

    if config.twap.enabled {
        let own_signer = config
            .own_signer()?
            .context("twap.own_signer is required when TWAP is enabled")?;
        let mut twap = TwapAggregator::new(
            source,
            config.twap.historical_gateway_url.clone(),
            config.data_service.data_service_id.clone(),
            own_signer,
        )
        .with_max_missing_ratio(config.twap.max_missing_ratio)
        .with_cache_ttl(std::time::Duration::from_secs(config.twap.cache_ttl_secs))
        .with_request_timeout(config.request_timeout());

        let now_ms = chrono::Utc::now().timestamp_millis() as u64;
        for feed in &config.twap.feeds {
            match twap.compute_twap(feed, now_ms).await {
                Ok(value) => info!(feed_id = %feed, value, "TWAP"),
                Err(e) => warn!(feed_id = %feed, error = %e, "TWAP unavailable"),
            }
        }
    }

    if !config.rpc.urls.is_empty() {
        let transports = config
            .rpc
            .urls
            .iter()
            .map(|url| url.parse::<Http>().with_context(|| format!("Invalid RPC url {}", url)))
            .collect::<Result<Vec<_>>>()?;
        let provider = Provider::new(FallbackProvider::new(transports)?);
        let block = provider
            .get_block_number()
            .await
            .context("All RPC providers failed")?;
        info!(block = %block, "Chain head");
    }

    Ok(())
}
