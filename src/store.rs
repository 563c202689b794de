//! Connection state store - `{connections, activeWallet}` as JSON
//!
//! Loaded once at startup and saved on every mutation. A missing file is an
//! empty state; an unreadable one is logged and replaced on the next save.

use crate::config::SessionConfig;
use crate::error::{WalletError, WalletResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedConnectionState {
    #[serde(default)]
    pub connections: BTreeMap<String, bool>,
    #[serde(rename = "activeWallet", default)]
    pub active_wallet: Option<String>,
}

impl PersistedConnectionState {
    pub fn is_connected(&self, wallet: &str) -> bool {
        self.connections.get(wallet).copied().unwrap_or(false)
    }

    /// Names marked connected, in key order.
    pub fn connected_wallets(&self) -> Vec<String> {
        self.connections.iter().filter(|(_, c)| **c).map(|(n, _)| n.clone()).collect()
    }

    /// Marking the active wallet disconnected also clears the active pointer.
    pub fn set_wallet_connected(&mut self, wallet: &str, connected: bool) {
        self.connections.insert(wallet.to_string(), connected);
        if !connected && self.active_wallet.as_deref() == Some(wallet) {
            self.active_wallet = None;
        }
    }

    pub fn set_active_wallet(&mut self, wallet: Option<&str>) {
        self.active_wallet = wallet.map(str::to_string);
    }
}

#[derive(Debug)]
pub struct ConnectionStore {
    path: Option<PathBuf>,
    state: PersistedConnectionState,
}

impl ConnectionStore {
    /// Load from `path`, or start empty if there is nothing usable there.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "connection store unreadable, starting empty"
                );
                PersistedConnectionState::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                PersistedConnectionState::default()
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "connection store read failed, starting empty"
                );
                PersistedConnectionState::default()
            }
        };
        Self { path: Some(path), state }
    }

    pub fn in_memory() -> Self {
        Self { path: None, state: PersistedConnectionState::default() }
    }

    /// Seed an in-memory store with existing state.
    pub fn with_state(state: PersistedConnectionState) -> Self {
        Self { path: None, state }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        if config.persist {
            Self::open(config.store_path())
        } else {
            Self::in_memory()
        }
    }

    pub fn path(&self) -> Option<&Path> { self.path.as_deref() }
    pub fn state(&self) -> &PersistedConnectionState { &self.state }

    /// Apply `change` in memory, then save once. A failed save keeps the
    /// change in memory and reports the error.
    pub fn update<F>(&mut self, change: F) -> WalletResult<()>
    where
        F: FnOnce(&mut PersistedConnectionState),
    {
        change(&mut self.state);
        self.save()
    }

    pub fn set_wallet_connected(&mut self, wallet: &str, connected: bool) -> WalletResult<()> {
        self.update(|state| state.set_wallet_connected(wallet, connected))
    }

    pub fn set_active_wallet(&mut self, wallet: Option<&str>) -> WalletResult<()> {
        self.update(|state| state.set_active_wallet(wallet))
    }

    /// Write the state through a sibling temp file so a crash never leaves
    /// half a document behind.
    pub fn save(&self) -> WalletResult<()> {
        let Some(path) = &self.path else { return Ok(()) };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| WalletError::Store(format!("mkdir: {e}")))?;
        }
        let json = serde_json::to_string_pretty(&self.state)
            .map_err(|e| WalletError::Store(format!("json: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| WalletError::Store(format!("write: {e}")))?;
        std::fs::rename(&tmp, path).map_err(|e| WalletError::Store(format!("rename: {e}")))?;
        tracing::debug!(path = %path.display(), "connection store saved");
        Ok(())
    }
}
