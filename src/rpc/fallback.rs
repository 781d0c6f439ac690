//! FallbackProvider - a JsonRpcClient that fails over between endpoints
//!
//! Requests go to the current provider. A recoverable failure advances the
//! shared index to the next provider (wrapping), re-installs every filter
//! the caller created, and retries. Each provider is tried at most once per
//! request. Filter ids handed out to callers never change; they are
//! translated to the ids of whichever provider is current.

use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, ProviderError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{OracleError, Result};
use crate::rpc::errors::classify;

const FILTER_INSTALL_METHODS: [&str; 3] = [
    "eth_newFilter",
    "eth_newBlockFilter",
    "eth_newPendingTransactionFilter",
];
const FILTER_ID_METHODS: [&str; 3] = [
    "eth_getFilterChanges",
    "eth_getFilterLogs",
    "eth_uninstallFilter",
];

#[derive(Debug, Clone)]
struct InstalledFilter {
    method: String,
    params: Value,
    /// Id returned to the caller when the filter was first installed
    caller_id: Value,
    /// Id of the filter on the provider currently in use
    active_id: Value,
}

#[derive(Debug, Clone)]
pub struct FallbackProvider<P> {
    providers: Arc<Vec<P>>,
    current: Arc<AtomicUsize>,
    filters: Arc<Mutex<Vec<InstalledFilter>>>,
}

impl<P: JsonRpcClient> FallbackProvider<P> {
    pub fn new(providers: Vec<P>) -> Result<Self> {
        if providers.len() < 2 {
            return Err(OracleError::InvalidParams(format!(
                "fallback provider needs at least 2 providers, got {}",
                providers.len()
            )));
        }
        Ok(Self {
            providers: Arc::new(providers),
            current: Arc::new(AtomicUsize::new(0)),
            filters: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn current_index(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub async fn installed_filters(&self) -> usize {
        self.filters.lock().await.len()
    }

    /// Back to the first provider, forgetting installed filters
    pub async fn reset(&self) {
        self.current.store(0, Ordering::SeqCst);
        self.filters.lock().await.clear();
    }

    async fn dispatch(&self, method: &str, params: Value) -> std::result::Result<Value, ProviderError> {
        let attempts = self.providers.len();
        let mut last_failure = None;

        for _ in 0..attempts {
            let index = self.current_index() % attempts;
            let outgoing = self.translate_params(method, &params).await;

            let error: ProviderError = match self.providers[index]
                .request::<Value, Value>(method, outgoing)
                .await
            {
                Ok(result) => {
                    self.track_filters(method, &params, &result).await;
                    return Ok(result);
                }
                Err(e) => e.into(),
            };

            let kind = classify(&error);
            if kind.is_unrecoverable() {
                debug!(method, provider_index = index, kind = ?kind, error = %error, "Unrecoverable RPC error");
                return Err(error);
            }

            let next = (index + 1) % attempts;
            warn!(
                method,
                provider_index = index,
                next_provider = next,
                error = %error,
                "RPC provider failed, switching"
            );
            // Another request may already have moved on
            let _ = self
                .current
                .compare_exchange(index, next, Ordering::SeqCst, Ordering::SeqCst);
            self.replay_filters(self.current_index() % attempts).await;
            last_failure = Some((index, error));
        }

        // The caller only sees a ProviderError, so the index travels in its message
        match last_failure {
            Some((provider_index, source)) => Err(ProviderError::CustomError(
                OracleError::Rpc {
                    provider_index,
                    source,
                }
                .to_string(),
            )),
            None => Err(ProviderError::UnsupportedRPC),
        }
    }

    async fn translate_params(&self, method: &str, params: &Value) -> Value {
        if !FILTER_ID_METHODS.contains(&method) {
            return params.clone();
        }
        let mut translated = params.clone();
        if let Some(id) = translated.get_mut(0) {
            let filters = self.filters.lock().await;
            if let Some(filter) = filters.iter().find(|f| &f.caller_id == id) {
                *id = filter.active_id.clone();
            }
        }
        translated
    }

    async fn track_filters(&self, method: &str, params: &Value, result: &Value) {
        if FILTER_INSTALL_METHODS.contains(&method) {
            self.filters.lock().await.push(InstalledFilter {
                method: method.to_string(),
                params: params.clone(),
                caller_id: result.clone(),
                active_id: result.clone(),
            });
        } else if method == "eth_uninstallFilter" {
            if let Some(id) = params.get(0) {
                self.filters.lock().await.retain(|f| &f.caller_id != id);
            }
        }
    }

    /// Re-install every tracked filter on `index`
    async fn replay_filters(&self, index: usize) {
        let snapshot = self.filters.lock().await.clone();
        if snapshot.is_empty() {
            return;
        }

        let provider = &self.providers[index];
        let mut replayed = Vec::with_capacity(snapshot.len());
        for filter in snapshot {
            match provider
                .request::<Value, Value>(&filter.method, filter.params.clone())
                .await
            {
                Ok(active_id) => replayed.push((filter.caller_id, active_id)),
                Err(e) => {
                    let error: ProviderError = e.into();
                    warn!(provider_index = index, method = %filter.method, error = %error, "Filter replay failed");
                }
            }
        }

        let mut filters = self.filters.lock().await;
        for (caller_id, active_id) in replayed {
            if let Some(filter) = filters.iter_mut().find(|f| f.caller_id == caller_id) {
                filter.active_id = active_id;
            }
        }
        info!(provider_index = index, filters = filters.len(), "Replayed filters on new provider");
    }
}

#[async_trait]
impl<P: JsonRpcClient> JsonRpcClient for FallbackProvider<P> {
    type Error = ProviderError;

    async fn request<T, R>(&self, method: &str, params: T) -> std::result::Result<R, Self::Error>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        let params = serde_json::to_value(&params)?;
        let result = self.dispatch(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{HttpClientError, JsonRpcError, Middleware, Provider, RpcError};
    use ethers::types::U64;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Default)]
    struct NodeState {
        down: AtomicBool,
        reverts: AtomicBool,
        calls: StdMutex<Vec<(String, Value)>>,
        filters: StdMutex<Vec<String>>,
    }

    /// Scripted JSON-RPC node; `label` is a hex digit used in its filter ids
    #[derive(Debug, Clone)]
    struct ScriptedNode {
        label: char,
        block: u64,
        state: Arc<NodeState>,
    }

    impl ScriptedNode {
        fn new(label: char, block: u64) -> Self {
            Self {
                label,
                block,
                state: Arc::default(),
            }
        }

        fn down(self) -> Self {
            self.state.down.store(true, Ordering::SeqCst);
            self
        }

        fn reverting(self) -> Self {
            self.state.reverts.store(true, Ordering::SeqCst);
            self
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.state.calls.lock().unwrap().clone()
        }

        fn answer(&self, method: &str, params: &Value) -> std::result::Result<Value, ProviderError> {
            if self.state.down.load(Ordering::SeqCst) {
                return Err(ProviderError::CustomError(format!("connection refused ({})", self.label)));
            }
            if self.state.reverts.load(Ordering::SeqCst) {
                return Err(ProviderError::JsonRpcClientError(Box::new(
                    HttpClientError::JsonRpcError(JsonRpcError {
                        code: 3,
                        message: "execution reverted".to_string(),
                        data: None,
                    }),
                )));
            }

            match method {
                "eth_blockNumber" => Ok(json!(format!("0x{:x}", self.block))),
                m if FILTER_INSTALL_METHODS.contains(&m) => {
                    let mut filters = self.state.filters.lock().unwrap();
                    let id = format!("0x{}{}", self.label, filters.len() + 1);
                    filters.push(id.clone());
                    Ok(json!(id))
                }
                m if FILTER_ID_METHODS.contains(&m) => {
                    let id = params.get(0).and_then(Value::as_str).unwrap_or_default();
                    if !self.state.filters.lock().unwrap().iter().any(|f| f == id) {
                        return Err(ProviderError::CustomError(format!("filter {} not found", id)));
                    }
                    if m == "eth_uninstallFilter" {
                        Ok(json!(true))
                    } else {
                        Ok(json!([]))
                    }
                }
                _ => Ok(Value::Null),
            }
        }
    }

    #[async_trait]
    impl JsonRpcClient for ScriptedNode {
        type Error = ProviderError;

        async fn request<T, R>(&self, method: &str, params: T) -> std::result::Result<R, Self::Error>
        where
            T: Debug + Serialize + Send + Sync,
            R: DeserializeOwned + Send,
        {
            let params = serde_json::to_value(&params)?;
            self.state
                .calls
                .lock()
                .unwrap()
                .push((method.to_string(), params.clone()));
            let answer = self.answer(method, &params)?;
            Ok(serde_json::from_value(answer)?)
        }
    }

    #[test]
    fn test_requires_two_providers() {
        assert!(FallbackProvider::new(vec![ScriptedNode::new('a', 1)]).is_err());
        assert!(FallbackProvider::new(vec![ScriptedNode::new('a', 1), ScriptedNode::new('b', 1)]).is_ok());
    }

    #[tokio::test]
    async fn test_fails_over_and_stays_on_healthy_provider() {
        let a = ScriptedNode::new('a', 1).down();
        let b = ScriptedNode::new('b', 7);
        let fallback = FallbackProvider::new(vec![a.clone(), b.clone()]).unwrap();
        let provider = Provider::new(fallback.clone());

        assert_eq!(provider.get_block_number().await.unwrap(), U64::from(7));
        assert_eq!(fallback.current_index(), 1);

        assert_eq!(provider.get_block_number().await.unwrap(), U64::from(7));
        assert_eq!(a.calls().len(), 1);
        assert_eq!(b.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_unrecoverable_error_is_not_retried() {
        let a = ScriptedNode::new('a', 1).reverting();
        let b = ScriptedNode::new('b', 7);
        let fallback = FallbackProvider::new(vec![a, b.clone()]).unwrap();

        let result: std::result::Result<Value, _> = fallback
            .request("eth_call", json!([{"to": "0x0000000000000000000000000000000000000001"}, "latest"]))
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.as_error_response().map(|e| e.code), Some(3));
        assert!(b.calls().is_empty());
        assert_eq!(fallback.current_index(), 0);
    }

    #[tokio::test]
    async fn test_all_failing_returns_last_error() {
        let a = ScriptedNode::new('a', 1).down();
        let b = ScriptedNode::new('b', 1).down();
        let fallback = FallbackProvider::new(vec![a.clone(), b.clone()]).unwrap();

        let err = fallback
            .request::<_, U64>("eth_blockNumber", ())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::CustomError(_)));
        assert!(err.to_string().contains("rpc provider #1 failed"));
        assert!(err.to_string().contains("connection refused (b)"));
        assert_eq!(a.calls().len(), 1);
        assert_eq!(b.calls().len(), 1);
        assert_eq!(fallback.current_index(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_error_names_last_provider_tried() {
        let nodes = vec![
            ScriptedNode::new('a', 1).down(),
            ScriptedNode::new('b', 1).down(),
            ScriptedNode::new('c', 1).down(),
        ];
        let fallback = FallbackProvider::new(nodes).unwrap();

        let err = fallback
            .request::<_, U64>("eth_blockNumber", ())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "custom error: rpc provider #2 failed: connection refused (c)"
        );
        assert_eq!(fallback.current_index(), 0);
    }

    #[tokio::test]
    async fn test_filters_are_replayed_with_stable_ids() {
        let a = ScriptedNode::new('a', 1);
        let b = ScriptedNode::new('b', 1);
        let fallback = FallbackProvider::new(vec![a.clone(), b.clone()]).unwrap();

        let caller_id: Value = fallback.request("eth_newBlockFilter", ()).await.unwrap();
        assert_eq!(caller_id, json!("0xa1"));
        assert_eq!(fallback.installed_filters().await, 1);

        a.state.down.store(true, Ordering::SeqCst);
        let changes: Value = fallback
            .request("eth_getFilterChanges", [caller_id.clone()])
            .await
            .unwrap();
        assert_eq!(changes, json!([]));
        assert_eq!(fallback.current_index(), 1);

        let b_calls = b.calls();
        assert_eq!(b_calls[0].0, "eth_newBlockFilter");
        assert_eq!(b_calls[1], ("eth_getFilterChanges".to_string(), json!(["0xb1"])));

        let removed: bool = fallback
            .request("eth_uninstallFilter", [caller_id])
            .await
            .unwrap();
        assert!(removed);
        assert_eq!(fallback.installed_filters().await, 0);
    }

    #[tokio::test]
    async fn test_reset_restores_first_provider() {
        let a = ScriptedNode::new('a', 1).down();
        let b = ScriptedNode::new('b', 2);
        let fallback = FallbackProvider::new(vec![a, b]).unwrap();

        let _: Value = fallback.request("eth_newBlockFilter", ()).await.unwrap();
        assert_eq!(fallback.current_index(), 1);

        fallback.reset().await;
        assert_eq!(fallback.current_index(), 0);
        assert_eq!(fallback.installed_filters().await, 0);
    }
}
