//! RPC module - JSON-RPC fail-over for relayers

pub mod errors;
mod fallback;

pub use errors::{classify, RpcFaultKind};
pub use fallback::FallbackProvider;
