//! Phantom Bitcoin - `requestAccounts` / `signMessage`, no revoke API

use super::{names, DriverCore, WalletDriver};
use crate::error::{WalletError, WalletResult};
use crate::events::DriverEvent;
use crate::network::Network;
use crate::provider::{payment_account, PhantomBitcoinProvider, ProviderEvent};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct PhantomBitcoinDriver {
    core: DriverCore,
    provider: Option<Arc<dyn PhantomBitcoinProvider>>,
}

impl PhantomBitcoinDriver {
    pub fn new(
        provider: Option<Arc<dyn PhantomBitcoinProvider>>,
        events: broadcast::Sender<DriverEvent>,
    ) -> Self {
        let detected = provider.is_some();
        let core = DriverCore::new(names::PHANTOM_BITCOIN, Network::Bitcoin, detected, events);
        Self { core, provider }
    }

    fn provider(&self) -> WalletResult<&dyn PhantomBitcoinProvider> {
        self.provider
            .as_deref()
            .ok_or_else(|| WalletError::ProviderUnavailable(self.core.name().into()))
    }

    async fn request_payment_address(&self) -> WalletResult<String> {
        let accounts = self
            .provider()?
            .request_accounts()
            .await
            .map_err(|e| e.into_wallet_error(self.core.name()))?;
        payment_account(&accounts)
            .map(|a| a.address.clone())
            .ok_or_else(|| WalletError::ProviderRejected("No payment account found".into()))
    }
}

#[async_trait]
impl WalletDriver for PhantomBitcoinDriver {
    fn name(&self) -> &str { self.core.name() }
    fn network(&self) -> Network { self.core.network() }
    fn is_detected(&self) -> bool { self.core.is_detected() }
    fn address(&self) -> Option<String> { self.core.address() }
    fn connect_or_disconnect_in_progress(&self) -> bool { self.core.in_progress() }

    async fn connect(&self) -> WalletResult<()> {
        self.provider()?;
        let Some(_transition) = self.core.begin_connect() else { return Ok(()) };
        let address = self.request_payment_address().await?;
        self.core.set_address(address);
        Ok(())
    }

    /// Phantom has no revoke call for Bitcoin: this only forgets the account.
    async fn disconnect(&self) -> WalletResult<()> {
        self.provider()?;
        let Some(_transition) = self.core.begin_disconnect() else { return Ok(()) };
        self.core.clear_address();
        Ok(())
    }

    async fn get_address(&self) -> WalletResult<String> {
        if let Some(address) = self.core.address() {
            return Ok(address);
        }
        let address = self.request_payment_address().await?;
        self.core.set_address(address.clone());
        Ok(address)
    }

    async fn sign_message(&self, message: &str) -> WalletResult<String> {
        let provider = self.provider()?;
        let address = self.get_address().await?;
        let signature = provider
            .sign_message(&address, message.as_bytes())
            .await
            .map_err(|e| e.into_wallet_error(self.core.name()))?;
        Ok(BASE64.encode(signature))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::software::{SoftwareBitcoin, SoftwareSeed};

    fn driver() -> (PhantomBitcoinDriver, Arc<SoftwareBitcoin>) {
        let seed = SoftwareSeed::new([1u8; 32]);
        let provider = Arc::new(SoftwareBitcoin::new(seed, bitcoin::Network::Bitcoin));
        let (tx, _) = broadcast::channel(8);
        (PhantomBitcoinDriver::new(Some(provider.clone()), tx), provider)
    }

    #[tokio::test]
    async fn connects_to_payment_account() {
        let (driver, provider) = driver();
        driver.connect().await.unwrap();
        assert_eq!(driver.address(), Some(provider.accounts().unwrap()[0].address.clone()));
        assert!(!driver.connect_or_disconnect_in_progress());
    }

    #[tokio::test]
    async fn undetected_provider_is_unavailable() {
        let (tx, _) = broadcast::channel(8);
        let driver = PhantomBitcoinDriver::new(None, tx);
        assert!(!driver.is_detected());
        let unavailable = Err(WalletError::ProviderUnavailable("Phantom Bitcoin".into()));
        assert_eq!(driver.connect().await, unavailable);
        assert!(matches!(driver.sign_message("m").await, Err(WalletError::ProviderUnavailable(_))));
    }

    #[tokio::test]
    async fn disconnect_is_local_only() {
        let (driver, provider) = driver();
        driver.connect().await.unwrap();
        let calls = provider.controls().calls();
        driver.disconnect().await.unwrap();
        assert!(!driver.is_connected());
        assert_eq!(provider.controls().calls(), calls);
        assert!(provider.controls().is_authorized());
    }

    #[tokio::test]
    async fn rejected_connect_leaves_state() {
        let (driver, provider) = driver();
        provider.controls().set_rejecting(Some("User rejected the request."));
        let err = driver.connect().await.unwrap_err();
        assert_eq!(err, WalletError::ProviderRejected("User rejected the request.".into()));
        assert!(!driver.is_connected());
        assert!(!driver.connect_or_disconnect_in_progress());
    }

    #[tokio::test]
    async fn sign_resolves_address_lazily() {
        let (driver, _provider) = driver();
        let sig = driver.sign_message("lazy").await.unwrap();
        assert!(driver.is_connected());
        assert!(driver.verify_signature("lazy", &sig).await.unwrap());
        assert!(!driver.verify_signature("other", &sig).await.unwrap());
    }

    #[tokio::test]
    async fn account_change_re_resolves() {
        let (driver, provider) = driver();
        driver.connect().await.unwrap();
        let before = driver.address();
        provider.controls().switch_account(2);
        driver.handle_provider_event(ProviderEvent::AccountsChanged).await.unwrap();
        assert_ne!(driver.address(), before);
        assert_eq!(driver.address(), Some(provider.accounts().unwrap()[0].address.clone()));
    }
}
