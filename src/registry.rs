//! Connection registry - every supported driver, in a fixed order
//!
//! Order matters: it is the order wallets are listed in and the order
//! successors are picked in when the active wallet disconnects.
//!
//! ```text
//! Phantom Solana → Phantom Bitcoin → Xverse Wallet
//! ```

use crate::driver::{Driver, PhantomBitcoinDriver, PhantomSolanaDriver, WalletDriver, XverseDriver};
use crate::events::{DriverEvent, Subscription, EVENT_CAPACITY};
use crate::provider::software::SoftwareProviders;
use crate::provider::{PhantomBitcoinProvider, PhantomSolanaProvider, SatsConnectProvider};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Providers found in the runtime environment. `None` means not detected.
#[derive(Default, Clone)]
pub struct Providers {
    pub phantom_bitcoin: Option<Arc<dyn PhantomBitcoinProvider>>,
    pub xverse: Option<Arc<dyn SatsConnectProvider>>,
    pub phantom_solana: Option<Arc<dyn PhantomSolanaProvider>>,
}

impl Providers {
    pub fn none() -> Self { Self::default() }

    pub fn with_phantom_bitcoin(mut self, provider: Arc<dyn PhantomBitcoinProvider>) -> Self {
        self.phantom_bitcoin = Some(provider);
        self
    }

    pub fn with_xverse(mut self, provider: Arc<dyn SatsConnectProvider>) -> Self {
        self.xverse = Some(provider);
        self
    }

    pub fn with_phantom_solana(mut self, provider: Arc<dyn PhantomSolanaProvider>) -> Self {
        self.phantom_solana = Some(provider);
        self
    }
}

impl From<&SoftwareProviders> for Providers {
    fn from(software: &SoftwareProviders) -> Self {
        Self::none()
            .with_phantom_bitcoin(software.phantom_bitcoin.clone())
            .with_xverse(software.xverse.clone())
            .with_phantom_solana(software.phantom_solana.clone())
    }
}

pub struct ConnectionRegistry {
    drivers: Vec<Arc<Driver>>,
    events: broadcast::Sender<DriverEvent>,
}

impl ConnectionRegistry {
    pub fn new(providers: Providers) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let drivers = vec![
            Driver::PhantomSolana(PhantomSolanaDriver::new(
                providers.phantom_solana,
                events.clone(),
            )),
            Driver::PhantomBitcoin(PhantomBitcoinDriver::new(
                providers.phantom_bitcoin,
                events.clone(),
            )),
            Driver::XverseBitcoin(XverseDriver::new(providers.xverse, events.clone())),
        ];
        let registry = Self { drivers: drivers.into_iter().map(Arc::new).collect(), events };
        let detected: Vec<_> = registry.detected().iter().map(|d| d.name()).collect();
        tracing::debug!(?detected, "registry built");
        registry
    }

    pub fn software(providers: &SoftwareProviders) -> Self { Self::new(providers.into()) }

    pub fn drivers(&self) -> &[Arc<Driver>] { &self.drivers }

    pub fn get(&self, name: &str) -> Option<&Arc<Driver>> {
        self.drivers.iter().find(|d| d.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool { self.get(name).is_some() }

    pub fn detected(&self) -> Vec<&Arc<Driver>> {
        self.drivers.iter().filter(|d| d.is_detected()).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> { self.events.subscribe() }

    /// One provider-event listener per detected driver.
    pub fn spawn_listeners(&self) -> Vec<Subscription> {
        self.drivers.iter().filter_map(|d| Driver::spawn_listener(d.clone())).collect()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry").field("drivers", &self.drivers).finish()
    }
}
