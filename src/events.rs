//! Driver events and task subscriptions
//!
//! Drivers publish [`DriverEvent`]s on a broadcast channel owned by the
//! registry. Background listeners are held as [`Subscription`]s; dropping one
//! aborts its task, which is how listeners unsubscribe on teardown.

use serde::Serialize;
use std::future::Future;
use tokio::task::JoinHandle;

/// Capacity of the registry-wide driver event channel.
pub const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DriverEvent {
    Connected { wallet: String, address: String },
    AddressChanged { wallet: String, address: String },
    Disconnected { wallet: String },
}

impl DriverEvent {
    pub fn wallet(&self) -> &str {
        match self {
            DriverEvent::Connected { wallet, .. }
            | DriverEvent::AddressChanged { wallet, .. }
            | DriverEvent::Disconnected { wallet } => wallet,
        }
    }
}

/// Handle to a spawned listener. Aborts the task when dropped.
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn spawn<F>(task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self { handle: tokio::spawn(task) }
    }

    /// Stop listening now rather than at drop.
    pub fn unsubscribe(self) {}

    pub fn is_finished(&self) -> bool { self.handle.is_finished() }
}

impl Drop for Subscription {
    fn drop(&mut self) { self.handle.abort(); }
}
