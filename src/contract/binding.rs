//! Contract binding capability
//!
//! The wrapper only needs to build calldata, simulate it, decode results and
//! submit transactions. [`ContractBinding`] is that surface;
//! [`AbiContractBinding`] implements it over a JSON ABI and any ethers
//! middleware.

use async_trait::async_trait;
use ethers::abi::{Abi, Function, StateMutability, Token};
use ethers::providers::{Middleware, PendingTransaction};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, TransactionRequest, H256, U256};
use std::sync::Arc;
use tracing::debug;

use crate::error::{OracleError, Result};

/// One named entry of a contract's method surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractMethod {
    pub name: String,
    pub read_only: bool,
    /// More than one ABI entry shares this name
    pub overloaded: bool,
}

/// A populated call that has not been sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedCall {
    pub method: String,
    pub to: Address,
    pub data: Bytes,
    pub from: Option<Address>,
    pub value: Option<U256>,
}

impl UnsignedCall {
    /// Same call with `payload` appended after the ABI-encoded arguments
    pub fn with_appended_payload(&self, payload: &[u8]) -> Self {
        let mut data = Vec::with_capacity(self.data.len() + payload.len());
        data.extend_from_slice(&self.data);
        data.extend_from_slice(payload);
        Self {
            data: data.into(),
            ..self.clone()
        }
    }

    pub fn to_transaction_request(&self) -> TransactionRequest {
        let mut tx = TransactionRequest::new().to(self.to).data(self.data.clone());
        if let Some(from) = self.from {
            tx = tx.from(from);
        }
        if let Some(value) = self.value {
            tx = tx.value(value);
        }
        tx
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContractBinding: Send + Sync {
    fn list_methods(&self) -> Vec<ContractMethod>;

    /// ABI-encode a call to `method` without sending it
    fn populate_call(&self, method: &str, args: Vec<Token>) -> Result<UnsignedCall>;

    /// `eth_call` the exact calldata, returning raw output
    async fn static_call(&self, call: &UnsignedCall) -> Result<Bytes>;

    fn decode_result(&self, method: &str, output: &Bytes) -> Result<Vec<Token>>;

    async fn send_transaction(&self, call: UnsignedCall) -> Result<H256>;

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        confirmations: usize,
    ) -> Result<Option<TransactionReceipt>>;
}

/// [`ContractBinding`] over a JSON ABI and an ethers middleware
pub struct AbiContractBinding<M> {
    abi: Abi,
    address: Address,
    client: Arc<M>,
    from: Option<Address>,
}

impl<M: Middleware> AbiContractBinding<M> {
    pub fn new(abi: Abi, address: Address, client: Arc<M>) -> Self {
        Self {
            abi,
            address,
            client,
            from: None,
        }
    }

    /// Parse the ABI from a JSON artifact (`[..]` or `{"abi": [..]}`).
    pub fn from_json(json: &str, address: Address, client: Arc<M>) -> Result<Self> {
        let raw: serde_json::Value = serde_json::from_str(json)?;
        let abi_value = match raw.get("abi") {
            Some(abi) => abi.clone(),
            None => raw,
        };
        let abi: Abi = serde_json::from_value(abi_value)?;
        Ok(Self::new(abi, address, client))
    }

    /// Sender used for simulations and transactions
    pub fn with_from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn function(&self, method: &str) -> Result<&Function> {
        match self.abi.functions.get(method).map(Vec::as_slice) {
            Some([function]) => Ok(function),
            Some([_, _, ..]) => Err(OracleError::OverloadedMethod(method.to_string())),
            _ => Err(OracleError::UnknownMethod(method.to_string())),
        }
    }
}

fn contract_error(method: &str, reason: impl ToString) -> OracleError {
    OracleError::Contract {
        method: method.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl<M: Middleware + 'static> ContractBinding for AbiContractBinding<M> {
    fn list_methods(&self) -> Vec<ContractMethod> {
        self.abi
            .functions
            .iter()
            .map(|(name, overloads)| ContractMethod {
                name: name.clone(),
                read_only: overloads.iter().all(|f| {
                    matches!(f.state_mutability, StateMutability::View | StateMutability::Pure)
                }),
                overloaded: overloads.len() > 1,
            })
            .collect()
    }

    fn populate_call(&self, method: &str, args: Vec<Token>) -> Result<UnsignedCall> {
        let data = self
            .function(method)?
            .encode_input(&args)
            .map_err(|e| contract_error(method, e))?;
        Ok(UnsignedCall {
            method: method.to_string(),
            to: self.address,
            data: data.into(),
            from: self.from,
            value: None,
        })
    }

    async fn static_call(&self, call: &UnsignedCall) -> Result<Bytes> {
        let tx: TypedTransaction = call.to_transaction_request().into();
        self.client
            .call(&tx, None)
            .await
            .map_err(|e| contract_error(&call.method, e))
    }

    fn decode_result(&self, method: &str, output: &Bytes) -> Result<Vec<Token>> {
        self.function(method)?
            .decode_output(output)
            .map_err(|e| contract_error(method, e))
    }

    async fn send_transaction(&self, call: UnsignedCall) -> Result<H256> {
        let pending = self
            .client
            .send_transaction(call.to_transaction_request(), None)
            .await
            .map_err(|e| contract_error(&call.method, e))?;
        let tx_hash = *pending;
        debug!(method = %call.method, tx_hash = ?tx_hash, "Transaction submitted");
        Ok(tx_hash)
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        confirmations: usize,
    ) -> Result<Option<TransactionReceipt>> {
        PendingTransaction::new(tx_hash, self.client.provider())
            .confirmations(confirmations)
            .await
            .map_err(|e| contract_error(&format!("{:?}", tx_hash), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{Http, Provider};

    const ABI: &str = r#"{"abi": [
        {"type":"function","name":"getPrice","stateMutability":"view",
         "inputs":[{"name":"feedId","type":"bytes32"}],
         "outputs":[{"name":"","type":"uint256"}]},
        {"type":"function","name":"updatePrice","stateMutability":"nonpayable",
         "inputs":[],"outputs":[]},
        {"type":"function","name":"save","stateMutability":"nonpayable",
         "inputs":[{"name":"a","type":"uint256"}],"outputs":[]},
        {"type":"function","name":"save","stateMutability":"nonpayable",
         "inputs":[{"name":"a","type":"uint256"},{"name":"b","type":"uint256"}],"outputs":[]}
    ]}"#;

    fn binding() -> AbiContractBinding<Provider<Http>> {
        let provider = Provider::<Http>::try_from("http://localhost:8545").unwrap();
        AbiContractBinding::from_json(ABI, Address::repeat_byte(0x11), Arc::new(provider)).unwrap()
    }

    #[test]
    fn test_list_methods() {
        let mut methods = binding().list_methods();
        methods.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            methods,
            vec![
                ContractMethod { name: "getPrice".into(), read_only: true, overloaded: false },
                ContractMethod { name: "save".into(), read_only: false, overloaded: true },
                ContractMethod { name: "updatePrice".into(), read_only: false, overloaded: false },
            ]
        );
    }

    #[test]
    fn test_populate_and_decode() {
        let binding = binding();
        let call = binding
            .populate_call("getPrice", vec![Token::FixedBytes(vec![0u8; 32])])
            .unwrap();
        assert_eq!(call.to, Address::repeat_byte(0x11));
        assert_eq!(call.data.len(), 4 + 32);

        let mut output = [0u8; 32];
        output[31] = 42;
        let decoded = binding.decode_result("getPrice", &Bytes::from(output.to_vec())).unwrap();
        assert_eq!(decoded, vec![Token::Uint(U256::from(42))]);
    }

    #[test]
    fn test_overloaded_and_unknown_methods_rejected() {
        let binding = binding();
        assert!(matches!(
            binding.populate_call("save", vec![]),
            Err(OracleError::OverloadedMethod(_))
        ));
        assert!(matches!(
            binding.populate_call("nope", vec![]),
            Err(OracleError::UnknownMethod(_))
        ));
    }

    #[test]
    fn test_payload_is_appended() {
        let call = UnsignedCall {
            method: "getPrice".into(),
            to: Address::zero(),
            data: Bytes::from(vec![0xaa, 0xbb]),
            from: None,
            value: None,
        };
        let extended = call.with_appended_payload(&[1, 2, 3]);
        assert_eq!(extended.data.to_vec(), vec![0xaa, 0xbb, 1, 2, 3]);
        assert_eq!(extended.method, "getPrice");
    }
}
