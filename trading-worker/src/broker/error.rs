use thiserror::Error;

/// Errors surfaced by a brokerage session.
///
/// The first group invalidates the session (reconnect fixes it), the second
/// group is a business rejection that must never touch connection state.
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    #[error("session token expired: {0}")]
    TokenExpired(String),

    #[error("brokerage under maintenance: {0}")]
    Maintenance(String),

    #[error("brokerage request timed out: {0}")]
    Timeout(String),

    #[error("contract not found: {0}")]
    ContractNotFound(String),

    #[error("account not signed: {0}")]
    AccountNotSigned(String),

    #[error("account not permitted: {0}")]
    AccountNotPermitted(String),

    /// Anything that escaped the structured classification above.
    #[error("{0}")]
    Other(String),
}

/// Free-text signatures of a dead session. Last-resort adapter for errors
/// that escape the structured kinds; the typed variants are authoritative.
const CONNECTION_ERROR_PATTERNS: &[&str] = &[
    "token is expired",
    "token expired",
    "status_code': 401",
    "statuscode: 401",
    "not ready",
    "session down",
    "connection refused",
    "connection reset",
];

impl BrokerError {
    /// True when the error means the session is no longer usable and the
    /// connection should be invalidated.
    pub fn is_connection_fault(&self) -> bool {
        match self {
            BrokerError::TokenExpired(_)
            | BrokerError::Maintenance(_)
            | BrokerError::Timeout(_) => true,
            BrokerError::ContractNotFound(_)
            | BrokerError::AccountNotSigned(_)
            | BrokerError::AccountNotPermitted(_) => false,
            BrokerError::Other(message) => {
                let lowered = message.to_lowercase();
                CONNECTION_ERROR_PATTERNS
                    .iter()
                    .any(|pattern| lowered.contains(pattern))
            }
        }
    }

    pub fn is_business_rejection(&self) -> bool {
        matches!(
            self,
            BrokerError::ContractNotFound(_)
                | BrokerError::AccountNotSigned(_)
                | BrokerError::AccountNotPermitted(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_kinds_classify_without_string_matching() {
        assert!(BrokerError::TokenExpired("t".into()).is_connection_fault());
        assert!(BrokerError::Maintenance("m".into()).is_connection_fault());
        assert!(BrokerError::Timeout("t".into()).is_connection_fault());
        assert!(!BrokerError::ContractNotFound("MXF".into()).is_connection_fault());
        assert!(!BrokerError::AccountNotSigned("a".into()).is_connection_fault());
        assert!(BrokerError::ContractNotFound("MXF".into()).is_business_rejection());
    }

    #[test]
    fn free_text_fallback_matches_known_signatures() {
        assert!(BrokerError::Other("Token is EXPIRED, please re-login".into())
            .is_connection_fault());
        assert!(
            BrokerError::Other("http error {'status_code': 401}".into()).is_connection_fault()
        );
        assert!(BrokerError::Other("session down, retry later".into()).is_connection_fault());
        assert!(!BrokerError::Other("duplicate order target".into()).is_connection_fault());
    }
}
