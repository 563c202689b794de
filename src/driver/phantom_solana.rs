//! Phantom Solana - `connect` / `disconnect` / `signMessage`

use super::{names, DriverCore, WalletDriver};
use crate::error::{WalletError, WalletResult};
use crate::events::DriverEvent;
use crate::network::Network;
use crate::provider::{PhantomSolanaProvider, ProviderEvent};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct PhantomSolanaDriver {
    core: DriverCore,
    provider: Option<Arc<dyn PhantomSolanaProvider>>,
}

impl PhantomSolanaDriver {
    pub fn new(
        provider: Option<Arc<dyn PhantomSolanaProvider>>,
        events: broadcast::Sender<DriverEvent>,
    ) -> Self {
        let detected = provider.is_some();
        let core = DriverCore::new(names::PHANTOM_SOLANA, Network::Solana, detected, events);
        Self { core, provider }
    }

    fn provider(&self) -> WalletResult<&dyn PhantomSolanaProvider> {
        self.provider
            .as_deref()
            .ok_or_else(|| WalletError::ProviderUnavailable(self.core.name().into()))
    }

    async fn request_public_key(&self) -> WalletResult<String> {
        self.provider()?.connect().await.map_err(|e| e.into_wallet_error(self.core.name()))
    }
}

#[async_trait]
impl WalletDriver for PhantomSolanaDriver {
    fn name(&self) -> &str { self.core.name() }
    fn network(&self) -> Network { self.core.network() }
    fn is_detected(&self) -> bool { self.core.is_detected() }
    fn address(&self) -> Option<String> { self.core.address() }
    fn connect_or_disconnect_in_progress(&self) -> bool { self.core.in_progress() }

    async fn connect(&self) -> WalletResult<()> {
        self.provider()?;
        let Some(_transition) = self.core.begin_connect() else { return Ok(()) };
        let public_key = self.request_public_key().await?;
        self.core.set_address(public_key);
        Ok(())
    }

    async fn disconnect(&self) -> WalletResult<()> {
        let provider = self.provider()?;
        let Some(_transition) = self.core.begin_disconnect() else { return Ok(()) };
        provider.disconnect().await.map_err(|e| e.into_wallet_error(self.core.name()))?;
        self.core.clear_address();
        Ok(())
    }

    async fn get_address(&self) -> WalletResult<String> {
        self.provider()?;
        if let Some(address) = self.core.address() {
            return Ok(address);
        }
        let public_key = self.request_public_key().await?;
        self.core.set_address(public_key.clone());
        Ok(public_key)
    }

    async fn sign_message(&self, message: &str) -> WalletResult<String> {
        let provider = self.provider()?;
        self.get_address().await?;
        let signature = provider
            .sign_message(message.as_bytes())
            .await
            .map_err(|e| e.into_wallet_error(self.core.name()))?;
        Ok(BASE64.encode(signature))
    }

    async fn handle_provider_event(&self, event: ProviderEvent) -> WalletResult<()> {
        match event {
            ProviderEvent::Connected | ProviderEvent::AccountsChanged => {
                if self.core.accepts_refresh() {
                    let public_key = self.request_public_key().await?;
                    self.core.set_address(public_key);
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
