//! Client error types.

use courier_core::error::TransportError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("configuration: {0}")]
    Config(String),

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("i/o: {0}")]
    Io(String),

    /// Mnemonic or derivation path rejected.
    #[error("key derivation: {0}")]
    KeyDerivation(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Wallet(#[from] courier_wallet::WalletError),
}

impl From<config::ConfigError> for ClientError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Map a reqwest failure onto the transport taxonomy.
pub(crate) fn request_error(e: reqwest::Error) -> TransportError {
    if e.is_decode() {
        TransportError::Decode(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}
