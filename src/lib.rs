//! Beesign: connect a wallet, sign a message, verify it without trusting the wallet.
//!
//! # Architecture
//!
//! ```text
//! WalletSession (entry point)
//!   │
//!   ├── ConnectionRegistry
//!   │     ├── Phantom Solana  ──→ PhantomSolanaProvider
//!   │     ├── Phantom Bitcoin ──→ PhantomBitcoinProvider
//!   │     └── Xverse Wallet   ──→ SatsConnectProvider
//!   │
//!   ├── ConnectionStore (wallet-connection.json)
//!   │
//!   └── verify (pure, stateless)
//!         ├── bip322  (BIP-322 simple + BIP-137 legacy)
//!         └── solana  (ed25519)
//! ```
//!
//! # Operations
//!
//! | Operation | Method | Description |
//! |-----------|--------|-------------|
//! | connect | `session.connect(name)` | Connect a wallet and make it active |
//! | switch | `session.switch_wallet(name)` | Point at another connected wallet |
//! | disconnect | `session.disconnect()` | Drop the active wallet, promote the next |
//! | sign | `session.sign_message(msg)` | Sign with the active wallet |
//! | verify | `session.verify_signature(msg, sig)` | Check against the active address |
//!
//! # Features
//!
//! - `native` - CLI, filesystem data dir, log subscriber
//!
//! # Usage
//!
//! ```ignore
//! use beesign::{ConnectionRegistry, ConnectionStore, SessionConfig, WalletSession};
//! use beesign::provider::software::{SoftwareProviders, SoftwareSeed};
//!
//! let providers = SoftwareProviders::new(SoftwareSeed::new([7u8; 32]), bitcoin::Network::Bitcoin);
//! let session = WalletSession::start(
//!     ConnectionRegistry::software(&providers),
//!     ConnectionStore::from_config(&SessionConfig::new("myapp")),
//! );
//! session.restored().await;
//!
//! session.connect("Phantom Solana").await?;
//! let signature = session.sign_message("hello").await?;
//! assert!(session.verify_signature("hello", &signature).await?);
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod network;
pub mod provider;
pub mod registry;
pub mod session;
pub mod store;
pub mod verify;

#[cfg(feature = "native")]
pub mod logging;

pub use config::SessionConfig;
pub use driver::{Driver, WalletDriver};
pub use error::{ProviderError, WalletError, WalletResult};
pub use events::{DriverEvent, Subscription};
pub use network::Network;
pub use registry::{ConnectionRegistry, Providers};
pub use session::{SessionState, WalletSession, WalletSummary};
pub use store::{ConnectionStore, PersistedConnectionState};
pub use verify::verify_signature;
