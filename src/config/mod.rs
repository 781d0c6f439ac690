//! Configuration management for the relayer
//!
//! Loads from config files + environment variables via .env

use anyhow::{bail, Context, Result};
use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, Environment, File};
use ethers::types::Address;
use serde::Deserialize;
use std::time::Duration;

use crate::oracle::DataPackagesRequestParams;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub data_service: DataServiceConfig,
    pub twap: TwapConfig,
    pub rpc: RpcConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataServiceConfig {
    pub data_service_id: String,
    /// Distinct signers required per feed
    pub unique_signers_count: usize,
    /// Feeds to require; empty means whatever the service returns
    pub data_feeds: Vec<String>,
    /// Cache service base URLs
    pub urls: Vec<String>,
    /// Hex addresses; empty accepts any signer
    pub authorized_signers: Vec<String>,
    pub request_timeout_ms: u64,
    /// Fetch one candidate per URL and verify each with a static call
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwapConfig {
    pub enabled: bool,
    pub historical_gateway_url: String,
    /// Synthetic ids like `ETH-60`
    pub feeds: Vec<String>,
    /// Address whose packages the averages are computed over
    pub own_signer: Option<String>,
    pub max_missing_ratio: f64,
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// JSON-RPC endpoints in fail-over order; empty disables RPC
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// EnvFilter directive used when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

fn defaults() -> Result<ConfigBuilder<DefaultState>> {
    Ok(Config::builder()
        // Data service defaults
        .set_default("data_service.data_service_id", "redstone-primary-prod")?
        .set_default("data_service.unique_signers_count", 3)?
        .set_default("data_service.data_feeds", vec!["ETH", "BTC"])?
        .set_default(
            "data_service.urls",
            vec![
                "https://oracle-gateway-1.a.redstone.finance",
                "https://oracle-gateway-2.a.redstone.finance",
            ],
        )?
        .set_default("data_service.authorized_signers", Vec::<String>::new())?
        .set_default("data_service.request_timeout_ms", 10_000)?
        .set_default("data_service.dry_run", false)?
        // TWAP defaults
        .set_default("twap.enabled", false)?
        .set_default(
            "twap.historical_gateway_url",
            "https://oracle-gateway-1.a.redstone.finance",
        )?
        .set_default("twap.feeds", Vec::<String>::new())?
        .set_default("twap.max_missing_ratio", 0.1)?
        .set_default("twap.cache_ttl_secs", 86_400)?
        // RPC defaults
        .set_default("rpc.urls", Vec::<String>::new())?
        // Logging defaults
        .set_default("logging.level", "info")?
        .set_default("logging.json", false)?)
}

fn parse_address(raw: &str) -> Result<Address> {
    raw.parse::<Address>()
        .with_context(|| format!("Invalid address {}", raw))
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (REDSTONE__*)
            .add_source(
                Environment::with_prefix("REDSTONE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("data_service.data_feeds")
                    .with_list_parse_key("data_service.urls")
                    .with_list_parse_key("data_service.authorized_signers")
                    .with_list_parse_key("twap.feeds")
                    .with_list_parse_key("rpc.urls"),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Check values the type system cannot
    pub fn validate(&self) -> Result<()> {
        let ds = &self.data_service;
        if ds.unique_signers_count == 0 {
            bail!("data_service.unique_signers_count must be at least 1");
        }
        if ds.urls.is_empty() {
            bail!("data_service.urls must list at least one cache service");
        }
        self.authorized_signers()?;

        if self.twap.enabled {
            if self.twap.feeds.is_empty() {
                bail!("twap.feeds must not be empty when TWAP is enabled");
            }
            if self.own_signer()?.is_none() {
                bail!("twap.own_signer is required when TWAP is enabled");
            }
        }
        if !(0.0..1.0).contains(&self.twap.max_missing_ratio) {
            bail!("twap.max_missing_ratio must be within [0, 1)");
        }

        if self.rpc.urls.len() == 1 {
            bail!("rpc.urls needs at least two endpoints for fail-over");
        }
        Ok(())
    }

    pub fn authorized_signers(&self) -> Result<Vec<Address>> {
        self.data_service
            .authorized_signers
            .iter()
            .map(|raw| parse_address(raw))
            .collect()
    }

    pub fn own_signer(&self) -> Result<Option<Address>> {
        self.twap.own_signer.as_deref().map(parse_address).transpose()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.data_service.request_timeout_ms)
    }

    /// Aggregator parameters for the configured data service
    pub fn request_params(&self) -> Result<DataPackagesRequestParams> {
        let ds = &self.data_service;
        let mut params = DataPackagesRequestParams::new(
            ds.data_service_id.clone(),
            ds.unique_signers_count,
            ds.urls.clone(),
        );
        if !ds.data_feeds.is_empty() {
            params = params.with_data_feeds(ds.data_feeds.iter().cloned());
        }
        let signers = self.authorized_signers()?;
        if !signers.is_empty() {
            params = params.with_authorized_signers(signers);
        }
        Ok(params)
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "service={} signers={} feeds={:?} urls={} dry_run={} twap_feeds={:?} rpc_urls={}",
            self.data_service.data_service_id,
            self.data_service.unique_signers_count,
            self.data_service.data_feeds,
            self.data_service.urls.len(),
            self.data_service.dry_run,
            self.twap.feeds,
            self.rpc.urls.len()
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
