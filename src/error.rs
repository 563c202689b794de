//! Error types for wallet drivers and the session

use thiserror::Error;

/// Errors surfaced by drivers and the session.
///
/// Signature verification never produces one of these: a bad or malformed
/// signature is a `false` result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("{0} wallet not detected")]
    ProviderUnavailable(String),

    #[error("Wallet not connected")]
    NotConnected,

    #[error("Provider rejected request: {0}")]
    ProviderRejected(String),

    #[error("Unknown wallet: {0}")]
    UnknownWallet(String),

    #[error("Connection store: {0}")]
    Store(String),

    #[error("Config: {0}")]
    Config(String),
}

pub type WalletResult<T> = std::result::Result<T, WalletError>;

/// Failure reported by a provider capability call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider (or the user behind it) declined or failed the request.
    #[error("{0}")]
    Rejected(String),

    /// The provider went away between detection and the call.
    #[error("provider unavailable")]
    Unavailable,
}

impl ProviderError {
    pub fn rejected(msg: impl Into<String>) -> Self { Self::Rejected(msg.into()) }

    /// Map into a driver-level error for the named wallet.
    pub fn into_wallet_error(self, wallet: &str) -> WalletError {
        match self {
            ProviderError::Rejected(msg) => WalletError::ProviderRejected(msg),
            ProviderError::Unavailable => WalletError::ProviderUnavailable(wallet.to_string()),
        }
    }
}
