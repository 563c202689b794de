//! Session configuration - passed from higher layers
//!
//! | Path | Contents |
//! |------|----------|
//! | `$BEESIGN_ROOT/<app>/data/wallet-connection.json` | persisted `{connections, activeWallet}` |
//! | `<local data dir>/<app>/data/wallet-connection.json` | same, when `BEESIGN_ROOT` is unset |

use crate::error::{WalletError, WalletResult};
use crate::provider::software::SoftwareSeed;
use std::path::PathBuf;
use zeroize::Zeroize;

pub const ROOT_ENV: &str = "BEESIGN_ROOT";
pub const SEED_ENV: &str = "BEESIGN_SEED";
pub const STORE_FILE: &str = "wallet-connection.json";
pub const DEFAULT_APP: &str = "beesign";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub app: String,
    pub data_dir: Option<PathBuf>,
    pub persist: bool,
}

impl Default for SessionConfig {
    fn default() -> Self { Self::new(DEFAULT_APP) }
}

impl SessionConfig {
    pub fn new(app: impl Into<String>) -> Self {
        Self { app: app.into(), data_dir: None, persist: true }
    }

    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    pub fn in_memory(mut self) -> Self { self.persist = false; self }

    /// Where the connection store lives. `data_dir` replaces `<root>/<app>`.
    pub fn store_path(&self) -> PathBuf {
        let base = self.data_dir.clone().unwrap_or_else(|| data_root().join(&self.app));
        base.join("data").join(STORE_FILE)
    }
}

fn data_root() -> PathBuf {
    if let Ok(root) = std::env::var(ROOT_ENV) {
        return PathBuf::from(root);
    }
    #[cfg(feature = "native")]
    if let Some(dir) = dirs::data_local_dir() {
        return dir;
    }
    PathBuf::from(".")
}

/// Parse a 64-hex-char seed for the software providers.
pub fn parse_seed(value: &str) -> WalletResult<SoftwareSeed> {
    let mut bytes =
        hex::decode(value.trim()).map_err(|e| WalletError::Config(format!("seed hex: {e}")))?;
    let seed: [u8; 32] = match bytes.as_slice().try_into() {
        Ok(seed) => seed,
        Err(_) => {
            let len = bytes.len();
            bytes.zeroize();
            return Err(WalletError::Config(format!("seed must be 32 bytes, got {len}")));
        }
    };
    bytes.zeroize();
    Ok(SoftwareSeed::new(seed))
}

/// `BEESIGN_SEED`, if set.
pub fn seed_from_env() -> WalletResult<Option<SoftwareSeed>> {
    match std::env::var(SEED_ENV) {
        Ok(value) => parse_seed(&value).map(Some),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(WalletError::Config(format!("{SEED_ENV}: {e}"))),
    }
}
