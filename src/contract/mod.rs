//! Contract module - Wrapping contract calls with signed payloads

mod binding;
mod wrapper;

pub use binding::{AbiContractBinding, ContractBinding, ContractMethod, UnsignedCall};
pub use wrapper::{
    CallOutcome, ContractCallWrapper, DataServicePayload, MockedPayload, PayloadProvider,
    TransactionHandle, VerifiedPayload,
};
