//! Wallet drivers - one uniform contract over heterogeneous providers
//!
//! # Architecture
//!
//! ```text
//! Driver (closed enum, implements WalletDriver)
//!   │
//!   ├── PhantomBitcoin ──→ PhantomBitcoinProvider   (bitcoin, local-only disconnect)
//!   ├── XverseBitcoin ───→ SatsConnectProvider      (bitcoin, encoded signatures)
//!   └── PhantomSolana ───→ PhantomSolanaProvider    (solana)
//!                               │
//!                               └── ProviderEvent ──→ handle_provider_event ──→ DriverEvent
//! ```
//!
//! Every driver owns a [`DriverCore`]: its address and the
//! connect/disconnect in-progress flag. A second connect or disconnect that
//! arrives while one is in flight is dropped, not queued.
//!
//! Adding a chain means adding a variant here and a verifier in
//! [`crate::verify`].

mod phantom_bitcoin;
mod phantom_solana;
mod xverse;

pub use phantom_bitcoin::PhantomBitcoinDriver;
pub use phantom_solana::PhantomSolanaDriver;
pub use xverse::XverseDriver;

use crate::error::WalletResult;
use crate::events::{DriverEvent, Subscription};
use crate::network::Network;
use crate::provider::ProviderEvent;
use crate::verify;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};

/// Stable driver names. These are the keys of the persisted connection map.
pub mod names {
    pub const PHANTOM_BITCOIN: &str = "Phantom Bitcoin";
    pub const PHANTOM_SOLANA: &str = "Phantom Solana";
    pub const XVERSE: &str = "Xverse Wallet";
}

#[async_trait]
pub trait WalletDriver: Send + Sync {
    fn name(&self) -> &str;
    fn network(&self) -> Network;
    fn is_detected(&self) -> bool;
    fn address(&self) -> Option<String>;
    fn connect_or_disconnect_in_progress(&self) -> bool;

    fn is_connected(&self) -> bool { self.address().is_some() }

    /// Request account access. No-op when connected or busy.
    async fn connect(&self) -> WalletResult<()>;

    /// Drop the connection. No-op when disconnected or busy.
    async fn disconnect(&self) -> WalletResult<()>;

    /// Cached address, or the same account request `connect` makes.
    async fn get_address(&self) -> WalletResult<String>;

    /// Sign the UTF-8 bytes of `message`; returns the encoded signature.
    async fn sign_message(&self, message: &str) -> WalletResult<String>;

    /// Check `signature` against this driver's address with the verifier for
    /// its network. The wallet's own opinion is never consulted.
    async fn verify_signature(&self, message: &str, signature: &str) -> WalletResult<bool> {
        let address = self.get_address().await?;
        Ok(verify::verify_signature(self.network(), message, signature, &address))
    }

    /// Apply an account change the provider reported out of band.
    async fn handle_provider_event(&self, event: ProviderEvent) -> WalletResult<()>;

    /// Subscribe to the provider's native events, if it is present.
    fn provider_events(&self) -> Option<broadcast::Receiver<ProviderEvent>>;
}

/// Connection state shared by every driver.
#[derive(Debug)]
pub struct DriverCore {
    name: &'static str,
    network: Network,
    detected: bool,
    state: Mutex<DriverState>,
    events: broadcast::Sender<DriverEvent>,
}

#[derive(Debug, Default)]
struct DriverState {
    address: Option<String>,
    in_progress: bool,
}

/// Held for the duration of a connect or disconnect; clears the
/// in-progress flag when the operation ends, whichever way it ends.
pub(crate) struct Transition<'a> {
    core: &'a DriverCore,
}

impl Drop for Transition<'_> {
    fn drop(&mut self) { self.core.state().in_progress = false; }
}

impl DriverCore {
    pub fn new(
        name: &'static str,
        network: Network,
        detected: bool,
        events: broadcast::Sender<DriverEvent>,
    ) -> Self {
        Self { name, network, detected, state: Mutex::new(DriverState::default()), events }
    }

    fn state(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &'static str { self.name }
    pub fn network(&self) -> Network { self.network }
    pub fn is_detected(&self) -> bool { self.detected }
    pub fn address(&self) -> Option<String> { self.state().address.clone() }
    pub fn in_progress(&self) -> bool { self.state().in_progress }

    /// Claim the transition slot for a connect. `None` means the call is a no-op.
    pub(crate) fn begin_connect(&self) -> Option<Transition<'_>> {
        self.begin(|s| s.address.is_none())
    }

    /// Claim the transition slot for a disconnect. `None` means the call is a no-op.
    pub(crate) fn begin_disconnect(&self) -> Option<Transition<'_>> {
        self.begin(|s| s.address.is_some())
    }

    fn begin(&self, applies: impl FnOnce(&DriverState) -> bool) -> Option<Transition<'_>> {
        let mut state = self.state();
        if state.in_progress || !applies(&state) {
            return None;
        }
        state.in_progress = true;
        Some(Transition { core: self })
    }

    /// Store a freshly resolved address and announce it.
    pub(crate) fn set_address(&self, address: String) {
        let previous = self.state().address.replace(address.clone());
        let wallet = self.name.to_string();
        match previous {
            None => {
                tracing::info!(wallet = self.name, %address, "wallet connected");
                self.emit(DriverEvent::Connected { wallet, address });
            }
            Some(prev) if prev != address => {
                tracing::info!(wallet = self.name, %address, "wallet account changed");
                self.emit(DriverEvent::AddressChanged { wallet, address });
            }
            Some(_) => {}
        }
    }

    pub(crate) fn clear_address(&self) {
        if self.state().address.take().is_some() {
            tracing::info!(wallet = self.name, "wallet disconnected");
            self.emit(DriverEvent::Disconnected { wallet: self.name.to_string() });
        }
    }

    /// Whether an out-of-band refresh should run now: the driver is
    /// connected and no connect/disconnect is in flight.
    pub(crate) fn accepts_refresh(&self) -> bool {
        let state = self.state();
        state.address.is_some() && !state.in_progress
    }

    fn emit(&self, event: DriverEvent) { let _ = self.events.send(event); }
}

/// The closed set of supported drivers.
pub enum Driver {
    PhantomBitcoin(PhantomBitcoinDriver),
    XverseBitcoin(XverseDriver),
    PhantomSolana(PhantomSolanaDriver),
}

macro_rules! dispatch {
    ($self:ident, $d:ident => $body:expr) => {
        match $self {
            Driver::PhantomBitcoin($d) => $body,
            Driver::XverseBitcoin($d) => $body,
            Driver::PhantomSolana($d) => $body,
        }
    };
}

#[async_trait]
impl WalletDriver for Driver {
    fn name(&self) -> &str { dispatch!(self, d => d.name()) }
    fn network(&self) -> Network { dispatch!(self, d => d.network()) }
    fn is_detected(&self) -> bool { dispatch!(self, d => d.is_detected()) }
    fn address(&self) -> Option<String> { dispatch!(self, d => d.address()) }
    fn connect_or_disconnect_in_progress(&self) -> bool {
        dispatch!(self, d => d.connect_or_disconnect_in_progress())
    }

    async fn connect(&self) -> WalletResult<()> { dispatch!(self, d => d.connect().await) }
    async fn disconnect(&self) -> WalletResult<()> { dispatch!(self, d => d.disconnect().await) }
    async fn get_address(&self) -> WalletResult<String> {
        dispatch!(self, d => d.get_address().await)
    }
    async fn sign_message(&self, message: &str) -> WalletResult<String> {
        dispatch!(self, d => d.sign_message(message).await)
    }
    async fn verify_signature(&self, message: &str, signature: &str) -> WalletResult<bool> {
        dispatch!(self, d => d.verify_signature(message, signature).await)
    }
    async fn handle_provider_event(&self, event: ProviderEvent) -> WalletResult<()> {
        dispatch!(self, d => d.handle_provider_event(event).await)
    }
    fn provider_events(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        dispatch!(self, d => d.provider_events())
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.name())
            .field("network", &self.network())
            .field("detected", &self.is_detected())
            .field("address", &self.address())
            .finish()
    }
}

impl Driver {
    /// Forward provider events into `handle_provider_event` until the provider
    /// goes away or the returned subscription is dropped.
    pub fn spawn_listener(driver: Arc<Driver>) -> Option<Subscription> {
        let mut rx = driver.provider_events()?;
        Some(Subscription::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Err(e) = driver.handle_provider_event(event.clone()).await {
                            tracing::warn!(
                                wallet = driver.name(),
                                ?event,
                                error = %e,
                                "provider event not applied"
                            );
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(wallet = driver.name(), skipped, "provider events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }
}
