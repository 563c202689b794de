//! Xverse - sats-connect `wallet_connect` / `getAddresses` / `signMessage`

use super::{names, DriverCore, WalletDriver};
use crate::error::{WalletError, WalletResult};
use crate::events::DriverEvent;
use crate::network::Network;
use crate::provider::{
    payment_account, AddressPurpose, ProviderAccount, ProviderEvent, SatsConnectProvider,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Prompt shown by the extension when addresses are requested lazily.
const ADDRESS_PROMPT: &str = "Connect to Xverse";

pub struct XverseDriver {
    core: DriverCore,
    provider: Option<Arc<dyn SatsConnectProvider>>,
}

impl XverseDriver {
    pub fn new(
        provider: Option<Arc<dyn SatsConnectProvider>>,
        events: broadcast::Sender<DriverEvent>,
    ) -> Self {
        let core = DriverCore::new(names::XVERSE, Network::Bitcoin, provider.is_some(), events);
        Self { core, provider }
    }

    fn provider(&self) -> WalletResult<&dyn SatsConnectProvider> {
        self.provider
            .as_deref()
            .ok_or_else(|| WalletError::ProviderUnavailable(self.core.name().into()))
    }

    fn payment_address(accounts: &[ProviderAccount]) -> WalletResult<String> {
        payment_account(accounts)
            .map(|a| a.address.clone())
            .ok_or_else(|| WalletError::ProviderRejected("No payment account found".into()))
    }

    async fn request_payment_address(&self) -> WalletResult<String> {
        let accounts = self
            .provider()?
            .get_addresses(&[AddressPurpose::Payment], ADDRESS_PROMPT)
            .await
            .map_err(|e| e.into_wallet_error(self.core.name()))?;
        Self::payment_address(&accounts)
    }
}

#[async_trait]
impl WalletDriver for XverseDriver {
    fn name(&self) -> &str { self.core.name() }
    fn network(&self) -> Network { self.core.network() }
    fn is_detected(&self) -> bool { self.core.is_detected() }
    fn address(&self) -> Option<String> { self.core.address() }
    fn connect_or_disconnect_in_progress(&self) -> bool { self.core.in_progress() }

    async fn connect(&self) -> WalletResult<()> {
        let provider = self.provider()?;
        let Some(_transition) = self.core.begin_connect() else { return Ok(()) };
        let accounts = provider
            .wallet_connect()
            .await
            .map_err(|e| e.into_wallet_error(self.core.name()))?;
        self.core.set_address(Self::payment_address(&accounts)?);
        Ok(())
    }

    async fn disconnect(&self) -> WalletResult<()> {
        let provider = self.provider()?;
        let Some(_transition) = self.core.begin_disconnect() else { return Ok(()) };
        provider.wallet_disconnect().await.map_err(|e| e.into_wallet_error(self.core.name()))?;
        self.core.clear_address();
        Ok(())
    }

    async fn get_address(&self) -> WalletResult<String> {
        self.provider()?;
        if let Some(address) = self.core.address() {
            return Ok(address);
        }
        let address = self.request_payment_address().await?;
        self.core.set_address(address.clone());
        Ok(address)
    }

    /// Requires an established connection; the provider's encoded signature
    /// is returned unchanged.
    async fn sign_message(&self, message: &str) -> WalletResult<String> {
        let provider = self.provider()?;
        let address = self.core.address().ok_or(WalletError::NotConnected)?;
        provider
            .sign_message(&address, message)
            .await
            .map_err(|e| e.into_wallet_error(self.core.name()))
    }

    async fn handle_provider_event(&self, event: ProviderEvent) -> WalletResult<()> {
        match event {
            ProviderEvent::AccountsChanged | ProviderEvent::Connected => {
                if self.core.accepts_refresh() {
                    let address = self.request_payment_address().await?;
                    self.core.set_address(address);
                }
            }
            ProviderEvent::Disconnected => self.core.clear_address(),
        }
        Ok(())
    }

    fn provider_events(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        self.provider.as_ref().map(|p| p.events())
    }
}
