//! Provider capabilities - the wallet extensions drivers talk to
//!
//! Drivers consume these traits; they never define how a provider works. Each
//! family mirrors the RPC surface of a real extension:
//!
//! | Trait | Modelled on | Connect | Sign returns | Disconnect |
//! |-------|-------------|---------|--------------|------------|
//! | [`PhantomBitcoinProvider`] | `window.phantom.bitcoin` | `requestAccounts` | raw bytes | none (local only) |
//! | [`SatsConnectProvider`] | sats-connect `request()` | `wallet_connect` / `getAddresses` | encoded string | `wallet_disconnect` |
//! | [`PhantomSolanaProvider`] | `window.phantom.solana` | `connect` | raw bytes | `disconnect` |
//!
//! Every provider exposes an event channel for account changes that happen
//! inside the extension.

pub mod software;

use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Why an account was handed out by a Bitcoin provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressPurpose {
    Payment,
    Ordinals,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAccount {
    pub address: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    pub purpose: AddressPurpose,
}

/// Select the payment account out of a provider's account list.
pub fn payment_account(accounts: &[ProviderAccount]) -> Option<&ProviderAccount> {
    accounts.iter().find(|a| a.purpose == AddressPurpose::Payment)
}

/// Out-of-band notifications raised by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The user switched accounts inside the extension.
    AccountsChanged,
    /// The extension (re)connected on its own.
    Connected,
    /// The extension revoked the connection.
    Disconnected,
}

#[async_trait]
pub trait PhantomBitcoinProvider: Send + Sync {
    async fn request_accounts(&self) -> ProviderResult<Vec<ProviderAccount>>;
    async fn sign_message(&self, address: &str, message: &[u8]) -> ProviderResult<Vec<u8>>;
    fn events(&self) -> broadcast::Receiver<ProviderEvent>;
}

#[async_trait]
pub trait SatsConnectProvider: Send + Sync {
    /// `wallet_connect`
    async fn wallet_connect(&self) -> ProviderResult<Vec<ProviderAccount>>;
    /// `getAddresses` filtered to `purposes`; `prompt` is shown to the user.
    async fn get_addresses(
        &self,
        purposes: &[AddressPurpose],
        prompt: &str,
    ) -> ProviderResult<Vec<ProviderAccount>>;
    /// `signMessage`; the signature comes back already encoded.
    async fn sign_message(&self, address: &str, message: &str) -> ProviderResult<String>;
    /// `wallet_disconnect`
    async fn wallet_disconnect(&self) -> ProviderResult<()>;
    fn events(&self) -> broadcast::Receiver<ProviderEvent>;
}

#[async_trait]
pub trait PhantomSolanaProvider: Send + Sync {
    /// Returns the base58 public key of the connected account.
    async fn connect(&self) -> ProviderResult<String>;
    async fn disconnect(&self) -> ProviderResult<()>;
    async fn sign_message(&self, message: &[u8]) -> ProviderResult<Vec<u8>>;
    fn events(&self) -> broadcast::Receiver<ProviderEvent>;
}
