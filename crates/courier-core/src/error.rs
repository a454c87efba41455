//! Error types shared by every Courier crate.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, enumerable classification of every failure a leg can surface.
///
/// Presentation layers map these to user instructions; the variants never
/// change meaning between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidParameter,
    InsufficientFunds,
    WalletDecryptionFailed,
    DeviceNotConnected,
    UserRejected,
    WrongAccount,
    WrongNetwork,
    PartiallyFunded,
    Transport,
    DataConsistency,
    InvalidTransition,
    Internal,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid parameter: {0}")] InvalidParameter(String),
    #[error("invalid amount: {0}")] InvalidAmount(String),
    #[error("unsupported crypto type: {0}")] UnsupportedCrypto(String),
    #[error("unsupported wallet type: {0}")] UnsupportedWallet(String),
    #[error("data consistency: {0}")] DataConsistency(String),
    #[error("invalid transition from {from} to {to}")] InvalidTransition { from: String, to: String },
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DataConsistency(_) => ErrorKind::DataConsistency,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            _ => ErrorKind::InvalidParameter,
        }
    }
}

/// Failures reported by a signing capability (hardware device, extension, local key).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("signing device not connected: {0}")] DeviceNotConnected(String),
    #[error("user rejected the request")] UserRejected,
    #[error("wrong account: expected {expected}, got {actual}")] WrongAccount { expected: String, actual: String },
    #[error("wrong network: expected {expected}, got {actual}")] WrongNetwork { expected: String, actual: String },
    #[error("signer: {0}")] Other(String),
}

impl SignerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeviceNotConnected(_) => ErrorKind::DeviceNotConnected,
            Self::UserRejected => ErrorKind::UserRejected,
            Self::WrongAccount { .. } => ErrorKind::WrongAccount,
            Self::WrongNetwork { .. } => ErrorKind::WrongNetwork,
            Self::Other(_) => ErrorKind::Internal,
        }
    }
}

/// Request/response failures talking to the ledger, blob store or chain endpoints.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request failed: {0}")] Request(String),
    #[error("unexpected status {status}: {body}")] Status { status: u16, body: String },
    #[error("malformed response: {0}")] Decode(String),
    #[error("not found: {0}")] NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_error_kinds() {
        assert_eq!(
            CoreError::UnsupportedCrypto("doge".into()).kind(),
            ErrorKind::InvalidParameter
        );
        assert_eq!(
            CoreError::DataConsistency("both hashes".into()).kind(),
            ErrorKind::DataConsistency
        );
    }

    #[test]
    fn signer_error_kinds() {
        assert_eq!(SignerError::UserRejected.kind(), ErrorKind::UserRejected);
        assert_eq!(
            SignerError::DeviceNotConnected("ledger".into()).kind(),
            ErrorKind::DeviceNotConnected
        );
        let wrong = SignerError::WrongNetwork {
            expected: "1".into(),
            actual: "3".into(),
        };
        assert_eq!(wrong.kind(), ErrorKind::WrongNetwork);
        assert_eq!(wrong.to_string(), "wrong network: expected 1, got 3");
    }

    #[test]
    fn error_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorKind::WalletDecryptionFailed).unwrap();
        assert_eq!(json, "\"WALLET_DECRYPTION_FAILED\"");
    }
}
