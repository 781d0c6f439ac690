//! Classification of JSON-RPC failures
//!
//! Decides whether another endpoint could succeed where this one failed.
//! Reverts and transaction-level rejections would fail identically on every
//! node, so they are surfaced instead of retried.

use ethers::providers::{ProviderError, RpcError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcFaultKind {
    /// Connectivity, rate limits, node-side faults
    Transport,
    /// Execution reverted
    CallException,
    InvalidArgument,
    NonceExpired,
    ReplacementUnderpriced,
    InsufficientFunds,
}

impl RpcFaultKind {
    pub fn is_unrecoverable(self) -> bool {
        !matches!(self, Self::Transport)
    }
}

const INVALID_PARAMS_CODE: i64 = -32602;
const EXECUTION_REVERTED_CODE: i64 = 3;

pub fn classify(error: &ProviderError) -> RpcFaultKind {
    match error {
        ProviderError::JsonRpcClientError(err) => match err.as_error_response() {
            Some(response) => classify_response(response.code, &response.message),
            None => RpcFaultKind::Transport,
        },
        ProviderError::CustomError(message) => {
            classify_message(&message.to_lowercase()).unwrap_or(RpcFaultKind::Transport)
        }
        ProviderError::HexError(_) => RpcFaultKind::InvalidArgument,
        _ => RpcFaultKind::Transport,
    }
}

fn classify_response(code: i64, message: &str) -> RpcFaultKind {
    if let Some(kind) = classify_message(&message.to_lowercase()) {
        return kind;
    }
    match code {
        EXECUTION_REVERTED_CODE => RpcFaultKind::CallException,
        INVALID_PARAMS_CODE => RpcFaultKind::InvalidArgument,
        _ => RpcFaultKind::Transport,
    }
}

fn classify_message(message: &str) -> Option<RpcFaultKind> {
    let kind = if message.contains("execution reverted") || message.contains("revert") {
        RpcFaultKind::CallException
    } else if message.contains("insufficient funds") {
        RpcFaultKind::InsufficientFunds
    } else if message.contains("nonce too low") || message.contains("nonce has already been used") {
        RpcFaultKind::NonceExpired
    } else if message.contains("underpriced") {
        RpcFaultKind::ReplacementUnderpriced
    } else if message.contains("invalid argument") {
        RpcFaultKind::InvalidArgument
    } else {
        return None;
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{HttpClientError, JsonRpcError};

    fn rpc_error(code: i64, message: &str) -> ProviderError {
        ProviderError::JsonRpcClientError(Box::new(HttpClientError::JsonRpcError(JsonRpcError {
            code,
            message: message.to_string(),
            data: None,
        })))
    }

    #[test]
    fn test_unrecoverable_kinds() {
        let cases = [
            (rpc_error(3, "execution reverted: stale data"), RpcFaultKind::CallException),
            (rpc_error(-32602, "invalid params"), RpcFaultKind::InvalidArgument),
            (rpc_error(-32000, "nonce too low"), RpcFaultKind::NonceExpired),
            (
                rpc_error(-32000, "replacement transaction underpriced"),
                RpcFaultKind::ReplacementUnderpriced,
            ),
            (
                rpc_error(-32000, "insufficient funds for gas * price + value"),
                RpcFaultKind::InsufficientFunds,
            ),
        ];
        for (error, expected) in cases {
            let kind = classify(&error);
            assert_eq!(kind, expected, "{error}");
            assert!(kind.is_unrecoverable());
        }
    }

    #[test]
    fn test_transport_faults_are_recoverable() {
        for error in [
            rpc_error(-32005, "daily request count exceeded, request rate limited"),
            rpc_error(-32603, "internal error"),
            rpc_error(-32000, "header not found"),
            ProviderError::CustomError("connection refused".to_string()),
            ProviderError::UnsupportedRPC,
        ] {
            assert_eq!(classify(&error), RpcFaultKind::Transport, "{error}");
        }
    }

    #[test]
    fn test_custom_error_messages_are_classified() {
        let error = ProviderError::CustomError("Execution reverted: SignerNotAuthorised".to_string());
        assert_eq!(classify(&error), RpcFaultKind::CallException);
    }
}
