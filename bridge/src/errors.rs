use thiserror::Error;

/// Errors surfaced by the bridge core.
///
/// Every variant that reaches a miner is rendered as a stratum error frame
/// `[code, message, null]`; none of them close the connection.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BridgeError {
    #[error("node is not synced (progress {0:.4})")]
    NotSynced(f64),

    #[error("node unavailable: {0}")]
    BackendUnavailable(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("unauthorized worker")]
    Unauthorized,

    #[error("not subscribed")]
    NotSubscribed,

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("parse error: {0}")]
    ProtocolParseError(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("session closed")]
    SessionClosed,

    #[error("internal error: {0}")]
    InternalError(String),
}

impl BridgeError {
    /// Stratum error code sent back to the miner
    pub fn code(&self) -> i32 {
        match self {
            BridgeError::JobNotFound(_) => 21,
            BridgeError::Unauthorized => 24,
            BridgeError::NotSubscribed => 25,
            BridgeError::ProtocolParseError(_) => -32700,
            BridgeError::UnknownMethod(_) => -32601,
            BridgeError::InvalidParams(_) => -32602,
            BridgeError::InternalError(_) => -32603,
            BridgeError::NotSynced(_)
            | BridgeError::BackendUnavailable(_)
            | BridgeError::UnsupportedAlgorithm(_)
            | BridgeError::SessionClosed => 20,
        }
    }

    /// Backend conditions that clear up on their own once the node recovers
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BridgeError::NotSynced(_) | BridgeError::BackendUnavailable(_))
    }

    pub fn short_code(&self) -> ErrorShortCode {
        match self {
            BridgeError::NotSynced(_) => ErrorShortCode::NodeNotSynced,
            BridgeError::BackendUnavailable(_) => ErrorShortCode::NodeUnavailable,
            BridgeError::UnsupportedAlgorithm(_) => ErrorShortCode::UnsupportedAlgorithm,
            BridgeError::Unauthorized | BridgeError::NotSubscribed => ErrorShortCode::Unauthorized,
            BridgeError::JobNotFound(_) => ErrorShortCode::StaleJob,
            BridgeError::ProtocolParseError(_) | BridgeError::InvalidParams(_) | BridgeError::UnknownMethod(_) => {
                ErrorShortCode::BadDataFromMiner
            }
            BridgeError::SessionClosed => ErrorShortCode::Disconnected,
            BridgeError::InternalError(_) => ErrorShortCode::Internal,
        }
    }
}

/// Short error labels used for the worker error metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorShortCode {
    NodeNotSynced,
    NodeUnavailable,
    UnsupportedAlgorithm,
    Unauthorized,
    StaleJob,
    BadDataFromMiner,
    FailedSendWork,
    FailedSetDiff,
    SubmitRejected,
    Disconnected,
    Internal,
}

impl ErrorShortCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorShortCode::NodeNotSynced => "err_node_not_synced",
            ErrorShortCode::NodeUnavailable => "err_node_unavailable",
            ErrorShortCode::UnsupportedAlgorithm => "err_unsupported_algorithm",
            ErrorShortCode::Unauthorized => "err_unauthorized",
            ErrorShortCode::StaleJob => "err_stale_job",
            ErrorShortCode::BadDataFromMiner => "err_bad_data_from_miner",
            ErrorShortCode::FailedSendWork => "err_failed_sending_work",
            ErrorShortCode::FailedSetDiff => "err_failed_set_diff",
            ErrorShortCode::SubmitRejected => "err_submit_rejected",
            ErrorShortCode::Disconnected => "err_disconnected",
            ErrorShortCode::Internal => "err_internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(BridgeError::Unauthorized.code(), 24);
        assert_eq!(BridgeError::NotSubscribed.code(), 25);
        assert_eq!(BridgeError::JobNotFound("progpow-1".into()).code(), 21);
        assert_eq!(BridgeError::UnknownMethod("mining.foo".into()).code(), -32601);
        assert_eq!(BridgeError::ProtocolParseError("eof".into()).code(), -32700);
        assert_eq!(BridgeError::InternalError("boom".into()).code(), -32603);
        assert_eq!(BridgeError::NotSynced(0.5).code(), 20);
        assert_eq!(BridgeError::BackendUnavailable("timeout".into()).code(), 20);
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(BridgeError::NotSynced(0.5).is_recoverable());
        assert!(BridgeError::BackendUnavailable("x".into()).is_recoverable());
        assert!(!BridgeError::Unauthorized.is_recoverable());
        assert!(!BridgeError::UnsupportedAlgorithm("scrypt".into()).is_recoverable());
    }

    #[test]
    fn test_not_synced_message_carries_progress() {
        let msg = BridgeError::NotSynced(0.5).to_string();
        assert!(msg.contains("0.5000"), "message was {msg}");
    }
}
