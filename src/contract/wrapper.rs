//! Contract Call Wrapper - Appends signed payloads to contract calls
//!
//! Exposes the same method names as the wrapped contract. Each call is
//! populated as usual, the encoded payload is appended to its calldata and
//! the call is then either simulated (read-only methods) or submitted.

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Bytes, TransactionReceipt, H256};
use futures_util::future::join_all;
use std::fmt;
use tracing::{debug, info, warn};

use crate::contract::binding::{ContractBinding, ContractMethod, UnsignedCall};
use crate::error::{OracleError, Result};
use crate::oracle::{DataPackageAggregator, DataPackagesRequestParams, DataPackagesSource};
use crate::protocol::codec::encode_payload;
use crate::types::{unsigned_metadata, DataPackagesResponse, RedstonePayload, SignedDataPackage};

/// Source of encoded payloads for wrapped calls
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayloadProvider: Send + Sync {
    /// Candidates in the order they should be tried; more than one triggers
    /// dry-run verification.
    async fn payload_candidates(&self) -> Result<Vec<Bytes>>;
}

/// Live payloads fetched from cache services
pub struct DataServicePayload<S> {
    aggregator: DataPackageAggregator<S>,
    params: DataPackagesRequestParams,
    dry_run: bool,
    origin: String,
}

impl<S: DataPackagesSource> DataServicePayload<S> {
    pub fn new(aggregator: DataPackageAggregator<S>, params: DataPackagesRequestParams) -> Self {
        Self {
            aggregator,
            params,
            dry_run: false,
            origin: "rust-connector".to_string(),
        }
    }

    /// Fetch one candidate per URL so each can be verified separately
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Origin recorded in the unsigned metadata
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    fn encode(&self, response: &DataPackagesResponse) -> Result<Bytes> {
        let payload = RedstonePayload::from_response(response, unsigned_metadata(&self.origin));
        Ok(encode_payload(&payload)?.into())
    }
}

#[async_trait]
impl<S: DataPackagesSource> PayloadProvider for DataServicePayload<S> {
    async fn payload_candidates(&self) -> Result<Vec<Bytes>> {
        if !self.dry_run || self.params.urls.len() < 2 {
            let response = self.aggregator.request_data_packages(&self.params).await?;
            return Ok(vec![self.encode(&response)?]);
        }

        let per_url = self.params.urls.iter().map(|url| DataPackagesRequestParams {
            urls: vec![url.clone()],
            ..self.params.clone()
        });
        let results = join_all(per_url.map(|params| async move {
            self.aggregator.request_data_packages(&params).await
        }))
        .await;

        let mut candidates = Vec::new();
        let mut causes = Vec::new();
        for (url, result) in self.params.urls.iter().zip(results) {
            match result.and_then(|response| self.encode(&response)) {
                Ok(payload) => candidates.push(payload),
                Err(e) => causes.push(format!("{}: {}", url, e)),
            }
        }

        if candidates.is_empty() {
            return Err(OracleError::AllRequestsFailed { causes });
        }
        debug!(
            candidates = candidates.len(),
            failed = causes.len(),
            "Fetched payload candidates for dry run"
        );
        Ok(candidates)
    }
}

/// Fixed, caller-supplied packages
#[derive(Debug, Clone)]
pub struct MockedPayload {
    packages: Vec<SignedDataPackage>,
    unsigned_metadata: String,
}

impl MockedPayload {
    pub fn new(packages: Vec<SignedDataPackage>) -> Self {
        Self {
            packages,
            unsigned_metadata: unsigned_metadata("mock"),
        }
    }

    pub fn with_unsigned_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.unsigned_metadata = metadata.into();
        self
    }
}

#[async_trait]
impl PayloadProvider for MockedPayload {
    async fn payload_candidates(&self) -> Result<Vec<Bytes>> {
        let payload = RedstonePayload::new(self.packages.clone(), self.unsigned_metadata.clone());
        Ok(vec![encode_payload(&payload)?.into()])
    }
}

/// Candidate that survived simulation, with its decoded output
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedPayload {
    pub payload: Bytes,
    pub output: Vec<Token>,
}

/// Submitted transaction; finality can be awaited through it
pub struct TransactionHandle<'a, B: ?Sized> {
    binding: &'a B,
    tx_hash: H256,
}

impl<'a, B: ContractBinding + ?Sized> TransactionHandle<'a, B> {
    pub fn hash(&self) -> H256 {
        self.tx_hash
    }

    pub async fn wait(&self, confirmations: usize) -> Result<Option<TransactionReceipt>> {
        self.binding.wait_for_receipt(self.tx_hash, confirmations).await
    }
}

impl<B: ?Sized> fmt::Debug for TransactionHandle<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("tx_hash", &self.tx_hash)
            .finish()
    }
}

/// Result of a wrapped call
pub enum CallOutcome<'a, B: ?Sized> {
    /// Decoded output of a read-only method
    Value(Vec<Token>),
    /// Mutating method sent to the network
    Submitted(TransactionHandle<'a, B>),
}

impl<B: ?Sized> fmt::Debug for CallOutcome<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(tokens) => f.debug_tuple("Value").field(tokens).finish(),
            Self::Submitted(handle) => f.debug_tuple("Submitted").field(handle).finish(),
        }
    }
}

/// Contract proxy that injects payloads into every call
pub struct ContractCallWrapper<B, P> {
    binding: B,
    payloads: P,
}

impl<B: ContractBinding, P: PayloadProvider> ContractCallWrapper<B, P> {
    pub fn new(binding: B, payloads: P) -> Self {
        Self { binding, payloads }
    }

    pub fn binding(&self) -> &B {
        &self.binding
    }

    /// Methods reachable through the wrapper (overloads are excluded)
    pub fn methods(&self) -> Vec<ContractMethod> {
        self.binding
            .list_methods()
            .into_iter()
            .filter(|m| !m.overloaded)
            .collect()
    }

    fn resolve(&self, method: &str) -> Result<ContractMethod> {
        let found = self
            .binding
            .list_methods()
            .into_iter()
            .find(|m| m.name == method)
            .ok_or_else(|| OracleError::UnknownMethod(method.to_string()))?;
        if found.overloaded {
            return Err(OracleError::OverloadedMethod(method.to_string()));
        }
        Ok(found)
    }

    /// Call `method` with `args` and the provider's payload appended.
    pub async fn call(&self, method: &str, args: Vec<Token>) -> Result<CallOutcome<'_, B>> {
        let target = self.resolve(method)?;
        let call = self.binding.populate_call(method, args)?;
        let mut candidates = self.payloads.payload_candidates().await?;

        let (payload, simulated) = match candidates.len() {
            0 => {
                return Err(OracleError::InvalidParams(
                    "payload provider returned no candidates".to_string(),
                ))
            }
            1 => (candidates.remove(0), None),
            _ => {
                let verified = self.dry_run_to_verify_payload(&call, method, candidates).await?;
                (verified.payload, Some(verified.output))
            }
        };

        if target.read_only {
            if let Some(output) = simulated {
                return Ok(CallOutcome::Value(output));
            }
            let output = self
                .binding
                .static_call(&call.with_appended_payload(&payload))
                .await?;
            return Ok(CallOutcome::Value(self.binding.decode_result(method, &output)?));
        }

        let tx_hash = self
            .binding
            .send_transaction(call.with_appended_payload(&payload))
            .await?;
        info!(method = %method, tx_hash = ?tx_hash, payload_bytes = payload.len(), "Submitted wrapped transaction");
        Ok(CallOutcome::Submitted(TransactionHandle {
            binding: &self.binding,
            tx_hash,
        }))
    }

    /// Simulate candidates one after another; the first that does not revert
    /// and decodes wins.
    pub async fn dry_run_to_verify_payload(
        &self,
        call: &UnsignedCall,
        method: &str,
        candidates: Vec<Bytes>,
    ) -> Result<VerifiedPayload> {
        self.resolve(method)?;

        let mut failures = Vec::with_capacity(candidates.len());
        for (index, payload) in candidates.into_iter().enumerate() {
            let trial = call.with_appended_payload(&payload);
            let attempt = match self.binding.static_call(&trial).await {
                Ok(output) => self.binding.decode_result(method, &output),
                Err(e) => Err(e),
            };
            match attempt {
                Ok(output) => {
                    debug!(method = %method, candidate = index, "Payload passed dry run");
                    return Ok(VerifiedPayload { payload, output });
                }
                Err(e) => {
                    warn!(method = %method, candidate = index, error = %e, "Payload failed dry run");
                    failures.push(format!("candidate {}: {}", index, e));
                }
            }
        }

        Err(OracleError::NoPayloadPassedDryRun { failures })
    }
}
