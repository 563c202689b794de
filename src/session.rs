//! Wallet session - the single source of truth for the active wallet
//!
//! # Architecture
//!
//! ```text
//! WalletSession
//!   ├── ConnectionRegistry ──→ Driver × 3 ──→ providers
//!   │         │
//!   │         └── DriverEvent ──→ reconciler ──→ handle_event
//!   └── ConnectionStore ──→ wallet-connection.json
//! ```
//!
//! # Lifecycle
//!
//! 1. `start` spawns the provider listeners
//! 2. Every wallet the store marks connected gets its own restoration task
//! 3. A failed restoration demotes that wallet; a dangling active pointer is repaired
//! 4. The reconciler follows driver events until the session is dropped
//!
//! `start` returns without waiting for restoration; `restored` does.
//! Restoration happens in `start` and nowhere else.

use crate::driver::{Driver, WalletDriver};
use crate::error::{WalletError, WalletResult};
use crate::events::{DriverEvent, Subscription};
use crate::network::Network;
use crate::registry::ConnectionRegistry;
use crate::store::{ConnectionStore, PersistedConnectionState};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    NoActiveWallet,
    Connecting { wallet: String },
    Connected { wallet: String },
    /// The active wallet is being disconnected; its successor is undecided.
    Switching { from: String },
}

/// One row of `wallets()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletSummary {
    pub name: String,
    pub network: Network,
    pub detected: bool,
    pub connected: bool,
    pub address: Option<String>,
    pub active: bool,
}

pub struct WalletSession {
    registry: ConnectionRegistry,
    store: Mutex<ConnectionStore>,
    transient: Mutex<Option<SessionState>>,
    tasks: Mutex<Vec<Subscription>>,
    /// Wallets whose restoration is still running.
    restoring: watch::Sender<BTreeSet<String>>,
}

/// Publishes a transient state for the length of an operation and puts the
/// previous one back afterwards.
struct PhaseGuard<'a> {
    session: &'a WalletSession,
    previous: Option<SessionState>,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) { *self.session.transient() = self.previous.take(); }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Restoration never fails on a store write: the change stays in memory.
fn save_or_warn(result: WalletResult<()>) {
    if let Err(e) = result {
        tracing::warn!(error = %e, "connection store not saved");
    }
}

impl WalletSession {
    /// Build the session and kick off restoration. Must be called from
    /// inside a Tokio runtime.
    pub fn start(registry: ConnectionRegistry, store: ConnectionStore) -> Arc<Self> {
        let listeners = registry.spawn_listeners();
        let (restoring, _) = watch::channel(BTreeSet::new());
        let session = Arc::new(Self {
            registry,
            store: Mutex::new(store),
            transient: Mutex::new(None),
            tasks: Mutex::new(listeners),
            restoring,
        });
        let restorations = session.spawn_restoration();
        let reconciler = session.spawn_reconciler();
        let mut tasks = lock(&session.tasks);
        tasks.extend(restorations);
        tasks.push(reconciler);
        drop(tasks);
        session
    }

    /// Wait until every restoration task has finished. A hung provider keeps
    /// this pending.
    pub async fn restored(&self) {
        let mut pending = self.restoring.subscribe();
        let _ = pending.wait_for(|wallets| wallets.is_empty()).await;
    }

    fn store(&self) -> MutexGuard<'_, ConnectionStore> { lock(&self.store) }
    fn transient(&self) -> MutexGuard<'_, Option<SessionState>> { lock(&self.transient) }

    fn enter(&self, state: SessionState) -> PhaseGuard<'_> {
        let previous = self.transient().replace(state);
        PhaseGuard { session: self, previous }
    }

    fn driver(&self, name: &str) -> WalletResult<&Arc<Driver>> {
        self.registry.get(name).ok_or_else(|| WalletError::UnknownWallet(name.to_string()))
    }

    /// First wallet in registry order, other than `excluding`, that is both
    /// marked connected and actually connected.
    fn successor(&self, state: &PersistedConnectionState, excluding: &str) -> Option<String> {
        self.registry
            .drivers()
            .iter()
            .find(|d| d.name() != excluding && state.is_connected(d.name()) && d.is_connected())
            .map(|d| d.name().to_string())
    }

    /// One task per registered wallet the store marks connected.
    fn spawn_restoration(self: &Arc<Self>) -> Vec<Subscription> {
        let persisted = self.persisted_state();
        let mut targets = Vec::new();
        for name in persisted.connected_wallets() {
            match self.registry.get(&name) {
                Some(driver) => targets.push(driver.clone()),
                None => tracing::debug!(wallet = %name, "skipping unregistered wallet"),
            }
        }
        if targets.is_empty() {
            self.repair_active(&mut self.store());
            return Vec::new();
        }

        self.restoring.send_replace(targets.iter().map(|d| d.name().to_string()).collect());
        targets
            .into_iter()
            .map(|driver| {
                let session = Arc::downgrade(self);
                Subscription::spawn(async move {
                    let result = driver.connect().await;
                    let Some(session) = session.upgrade() else { return };
                    session.finish_restoration(driver.name(), result);
                })
            })
            .collect()
    }

    fn finish_restoration(&self, wallet: &str, result: WalletResult<()>) {
        let mut store = self.store();
        if let Err(e) = result {
            tracing::warn!(wallet, error = %e, "failed to restore wallet connection");
            save_or_warn(store.update(|state| state.set_wallet_connected(wallet, false)));
        }
        self.restoring.send_modify(|pending| {
            pending.remove(wallet);
        });
        self.repair_active(&mut store);
        if self.restoring.borrow().is_empty() {
            tracing::info!(active = ?store.state().active_wallet, "wallet session restored");
        }
    }

    /// Re-point an active wallet that is no longer usable. One whose
    /// restoration is still running counts as usable. Without a successor
    /// the pointer is only cleared once restoration has settled.
    fn repair_active(&self, store: &mut ConnectionStore) {
        let Some(active) = store.state().active_wallet.clone() else { return };
        let (restoring_active, settled) = {
            let pending = self.restoring.borrow();
            (pending.contains(&active), pending.is_empty())
        };
        let usable = store.state().is_connected(&active)
            && self
                .registry
                .get(&active)
                .is_some_and(|d| d.is_connected() || restoring_active);
        if usable {
            return;
        }
        let successor = self.successor(store.state(), &active);
        if successor.is_none() && !settled {
            return;
        }
        tracing::info!(from = %active, to = ?successor, "repairing active wallet");
        save_or_warn(store.update(|state| state.set_active_wallet(successor.as_deref())));
    }

    /// Connect `name` and make it the active wallet. A connect dropped
    /// because another one is in flight leaves the store untouched.
    pub async fn connect(&self, name: &str) -> WalletResult<()> {
        let driver = self.driver(name)?;
        let _phase = self.enter(SessionState::Connecting { wallet: name.to_string() });
        driver.connect().await?;
        if !driver.is_connected() {
            tracing::debug!(wallet = name, "connect already in flight");
            return Ok(());
        }
        self.store().update(|state| {
            state.set_wallet_connected(name, true);
            state.set_active_wallet(Some(name));
        })?;
        tracing::info!(wallet = name, "active wallet set");
        Ok(())
    }

    /// Point the session at another connected wallet. A disconnected target
    /// is ignored.
    pub fn switch_wallet(&self, name: &str) -> WalletResult<()> {
        let driver = self.driver(name)?;
        if !driver.is_connected() {
            tracing::debug!(wallet = name, "switch target not connected");
            return Ok(());
        }
        self.store().update(|state| {
            state.set_wallet_connected(name, true);
            state.set_active_wallet(Some(name));
        })?;
        tracing::info!(wallet = name, "switched active wallet");
        Ok(())
    }

    /// Disconnect the active wallet and promote the next connected one.
    pub async fn disconnect(&self) -> WalletResult<()> {
        let Some(active) = self.active_wallet_name() else { return Ok(()) };
        let Some(driver) = self.registry.get(&active) else {
            return self.store().update(|state| state.set_active_wallet(None));
        };
        let _phase = self.enter(SessionState::Switching { from: active.clone() });
        driver.disconnect().await?;
        if driver.is_connected() {
            tracing::debug!(wallet = %active, "disconnect already in flight");
            return Ok(());
        }
        let mut store = self.store();
        let successor = self.successor(store.state(), &active);
        store.update(|state| {
            state.set_wallet_connected(&active, false);
            state.set_active_wallet(successor.as_deref());
        })?;
        tracing::info!(from = %active, to = ?successor, "active wallet disconnected");
        Ok(())
    }

    pub async fn sign_message(&self, message: &str) -> WalletResult<String> {
        self.active_driver().ok_or(WalletError::NotConnected)?.sign_message(message).await
    }

    pub async fn verify_signature(&self, message: &str, signature: &str) -> WalletResult<bool> {
        self.active_driver()
            .ok_or(WalletError::NotConnected)?
            .verify_signature(message, signature)
            .await
    }

    /// Apply a driver event. A wallet that dropped out on its own is
    /// demoted; if it was active, a successor takes over.
    pub fn handle_event(&self, event: &DriverEvent) -> WalletResult<()> {
        let DriverEvent::Disconnected { wallet } = event else { return Ok(()) };
        let mut store = self.store();
        if !store.state().is_connected(wallet) {
            return Ok(());
        }
        let was_active = store.state().active_wallet.as_deref() == Some(wallet.as_str());
        let successor = if was_active { self.successor(store.state(), wallet) } else { None };
        let result = store.update(|state| {
            state.set_wallet_connected(wallet, false);
            if was_active {
                state.set_active_wallet(successor.as_deref());
            }
        });
        if was_active {
            tracing::info!(from = %wallet, to = ?successor, "active wallet dropped by provider");
        } else {
            tracing::info!(%wallet, "wallet dropped by provider");
        }
        result
    }

    fn spawn_reconciler(self: &Arc<Self>) -> Subscription {
        let session = Arc::downgrade(self);
        let mut rx = self.registry.subscribe();
        Subscription::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let Some(session) = session.upgrade() else { break };
                        if let Err(e) = session.handle_event(&event) {
                            tracing::warn!(?event, error = %e, "driver event not applied");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "driver events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    // Getters

    pub fn registry(&self) -> &ConnectionRegistry { &self.registry }
    pub fn active_wallet_name(&self) -> Option<String> {
        self.store().state().active_wallet.clone()
    }
    pub fn active_driver(&self) -> Option<Arc<Driver>> {
        self.active_wallet_name().and_then(|name| self.registry.get(&name).cloned())
    }
    pub fn active_wallet_address(&self) -> Option<String> {
        self.active_driver().and_then(|d| d.address())
    }
    pub fn active_wallet_network(&self) -> Option<Network> {
        self.active_driver().map(|d| d.network())
    }
    pub fn is_wallet_connected(&self) -> bool {
        self.active_driver().is_some_and(|d| d.is_connected())
    }
    pub fn persisted_state(&self) -> PersistedConnectionState { self.store().state().clone() }

    pub fn detected_wallets(&self) -> Vec<String> {
        self.registry.detected().iter().map(|d| d.name().to_string()).collect()
    }

    pub fn wallets(&self) -> Vec<WalletSummary> {
        let active = self.active_wallet_name();
        self.registry
            .drivers()
            .iter()
            .map(|d| WalletSummary {
                name: d.name().to_string(),
                network: d.network(),
                detected: d.is_detected(),
                connected: d.is_connected(),
                address: d.address(),
                active: active.as_deref() == Some(d.name()),
            })
            .collect()
    }

    pub fn state(&self) -> SessionState {
        if let Some(state) = self.transient().clone() {
            return state;
        }
        match self.active_wallet_name() {
            Some(wallet) => SessionState::Connected { wallet },
            None => SessionState::NoActiveWallet,
        }
    }
}

impl std::fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSession")
            .field("state", &self.state())
            .field("persisted", &self.persisted_state())
            .finish()
    }
}
