//! Shared fixtures for unit tests: deterministic signer keys, package
//! builders and a scripted [`DataPackagesSource`].

use async_trait::async_trait;
use ethers::core::k256::ecdsa::SigningKey;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{OracleError, Result};
use crate::oracle::DataPackagesSource;
use crate::protocol::signing::{sign_data_package, SignatureScheme};
use crate::types::{DataPackage, DataPackagesMap, DataPoint, SignedDataPackage};

/// Well-known development keys (hardhat accounts 0-4)
pub const TEST_PRIVATE_KEYS: [&str; 5] = [
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
    "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
    "0x5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a",
    "0x7c852118294e51e653712a81e05800f419141751be58f605c371e15141b007a6",
    "0x47e179ec197488593b187f80a00eb0da91f1b9d0b13f8733639f19c30a34926e",
];

pub fn wallet(index: usize) -> LocalWallet {
    TEST_PRIVATE_KEYS[index].parse().unwrap()
}

pub fn signing_key(index: usize) -> SigningKey {
    wallet(index).signer().clone()
}

pub fn signer_address(index: usize) -> Address {
    wallet(index).address()
}

pub fn signed_package(signer: usize, feed_id: &str, value: f64, timestamp_ms: u64) -> SignedDataPackage {
    signed_multi_package(signer, &[(feed_id, value)], timestamp_ms)
}

pub fn signed_multi_package(signer: usize, points: &[(&str, f64)], timestamp_ms: u64) -> SignedDataPackage {
    let points = points
        .iter()
        .map(|(id, value)| DataPoint::numeric(*id, *value).unwrap())
        .collect();
    sign_data_package(
        DataPackage::new(points, timestamp_ms),
        &signing_key(signer),
        &SignatureScheme::EVM,
    )
    .unwrap()
}

/// How a scripted URL answers
#[derive(Debug, Clone)]
pub enum Reply {
    Packages(DataPackagesMap),
    Status(u16),
    Delayed(Duration, DataPackagesMap),
    Hang,
}

/// In-memory source answering from fixed scripts
#[derive(Debug, Default)]
pub struct ScriptedSource {
    latest: HashMap<String, Reply>,
    historical: HashMap<u64, DataPackagesMap>,
    historical_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn with_latest(mut self, url: &str, reply: Reply) -> Self {
        self.latest.insert(url.to_string(), reply);
        self
    }

    pub fn with_historical(mut self, timestamp_ms: u64, packages: DataPackagesMap) -> Self {
        self.historical.insert(timestamp_ms, packages);
        self
    }

    pub fn historical_calls(&self) -> usize {
        self.historical_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataPackagesSource for ScriptedSource {
    async fn latest(&self, url: &str, _data_service_id: &str) -> Result<DataPackagesMap> {
        match self.latest.get(url).cloned() {
            Some(Reply::Packages(packages)) => Ok(packages),
            Some(Reply::Delayed(delay, packages)) => {
                tokio::time::sleep(delay).await;
                Ok(packages)
            }
            Some(Reply::Status(status)) => Err(OracleError::UnexpectedStatus {
                url: url.to_string(),
                status,
            }),
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(OracleError::UnexpectedStatus {
                url: url.to_string(),
                status: 404,
            }),
        }
    }

    async fn historical(
        &self,
        url: &str,
        _data_service_id: &str,
        timestamp_ms: u64,
    ) -> Result<DataPackagesMap> {
        self.historical_calls.fetch_add(1, Ordering::SeqCst);
        self.historical
            .get(&timestamp_ms)
            .cloned()
            .ok_or_else(|| OracleError::UnexpectedStatus {
                url: format!("{}/{}", url, timestamp_ms),
                status: 404,
            })
    }
}
