//! Software providers - in-process stand-ins for wallet extensions
//!
//! Each provider holds one seed and derives a key per account index, so the
//! whole connect → sign → verify path runs without a browser. Test controls
//! let callers pause round trips, reject requests, switch accounts and revoke
//! the connection the way a user would inside an extension.
//!
//! Events are only raised through the controls, never by `connect` itself:
//! drivers re-resolve their address on `Connected`, and a provider that echoed
//! every connect would loop.

use super::{
    AddressPurpose, PhantomBitcoinProvider, PhantomSolanaProvider, ProviderAccount, ProviderEvent,
    ProviderResult, SatsConnectProvider,
};
use crate::error::ProviderError;
use crate::verify::bip322;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bitcoin::key::Keypair;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::{Address, CompressedPublicKey, KnownHrp};
use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 32-byte seed all software keys derive from.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SoftwareSeed([u8; 32]);

impl SoftwareSeed {
    pub fn new(bytes: [u8; 32]) -> Self { Self(bytes) }

    /// `SHA256(seed || domain || index)`
    fn derive(&self, domain: &str, index: u32) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.0);
        hasher.update(domain.as_bytes());
        hasher.update(index.to_be_bytes());
        hasher.finalize().into()
    }
}

impl std::fmt::Debug for SoftwareSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SoftwareSeed(..)")
    }
}

/// Knobs shared by every software provider.
#[derive(Debug)]
pub struct Controls {
    calls: AtomicUsize,
    authorized: AtomicBool,
    account: AtomicU32,
    rejecting: Mutex<Option<String>>,
    paused: watch::Sender<bool>,
    events: broadcast::Sender<ProviderEvent>,
}

impl Default for Controls {
    fn default() -> Self {
        let (paused, _) = watch::channel(false);
        let (events, _) = broadcast::channel(16);
        Self {
            calls: AtomicUsize::new(0),
            authorized: AtomicBool::new(false),
            account: AtomicU32::new(0),
            rejecting: Mutex::new(None),
            paused,
            events,
        }
    }
}

impl Controls {
    /// Number of provider round trips served so far.
    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }

    pub fn is_authorized(&self) -> bool { self.authorized.load(Ordering::SeqCst) }

    /// Fail every request with `reason` until cleared with `None`.
    pub fn set_rejecting(&self, reason: Option<&str>) {
        *self.rejecting.lock().unwrap_or_else(PoisonError::into_inner) = reason.map(str::to_string);
    }

    /// Hold round trips in flight until `resume`.
    pub fn pause(&self) { self.paused.send_replace(true); }

    pub fn resume(&self) { self.paused.send_replace(false); }

    /// Switch the extension to another account and announce it.
    pub fn switch_account(&self, index: u32) {
        self.account.store(index, Ordering::SeqCst);
        let _ = self.events.send(ProviderEvent::AccountsChanged);
    }

    /// Revoke the connection from the extension side and announce it.
    pub fn revoke(&self) {
        self.authorized.store(false, Ordering::SeqCst);
        let _ = self.events.send(ProviderEvent::Disconnected);
    }

    /// Raise an arbitrary provider event.
    pub fn emit(&self, event: ProviderEvent) { let _ = self.events.send(event); }

    fn account(&self) -> u32 { self.account.load(Ordering::SeqCst) }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> { self.events.subscribe() }

    async fn round_trip(&self) -> ProviderResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut paused = self.paused.subscribe();
        let _ = paused.wait_for(|p| !*p).await;
        match self.rejecting.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            Some(reason) => Err(ProviderError::Rejected(reason)),
            None => Ok(()),
        }
    }

    fn authorize(&self) { self.authorized.store(true, Ordering::SeqCst); }

    fn require_authorized(&self) -> ProviderResult<()> {
        if self.is_authorized() { Ok(()) } else { Err(ProviderError::rejected("not connected")) }
    }
}

/// Bitcoin extension: payment account is P2WPKH, ordinals account is P2TR.
/// Serves both the Phantom and the sats-connect surfaces.
#[derive(Debug)]
pub struct SoftwareBitcoin {
    seed: SoftwareSeed,
    network: bitcoin::Network,
    controls: Controls,
}

impl SoftwareBitcoin {
    pub fn new(seed: SoftwareSeed, network: bitcoin::Network) -> Self {
        Self { seed, network, controls: Controls::default() }
    }

    pub fn controls(&self) -> &Controls { &self.controls }

    fn secret(&self, purpose: AddressPurpose) -> ProviderResult<SecretKey> {
        let domain = match purpose {
            AddressPurpose::Payment => "bitcoin/payment",
            AddressPurpose::Ordinals => "bitcoin/ordinals",
        };
        SecretKey::from_slice(&self.seed.derive(domain, self.controls.account()))
            .map_err(|e| ProviderError::Rejected(format!("key derivation: {e}")))
    }

    /// Accounts for the current account index.
    pub fn accounts(&self) -> ProviderResult<Vec<ProviderAccount>> {
        let secp = Secp256k1::new();
        let payment = CompressedPublicKey(self.secret(AddressPurpose::Payment)?.public_key(&secp));
        let keypair = Keypair::from_secret_key(&secp, &self.secret(AddressPurpose::Ordinals)?);
        let (internal, _) = keypair.x_only_public_key();
        let hrp = KnownHrp::from(self.network);
        Ok(vec![
            ProviderAccount {
                address: Address::p2wpkh(&payment, hrp).to_string(),
                public_key: payment.to_string(),
                purpose: AddressPurpose::Payment,
            },
            ProviderAccount {
                address: Address::p2tr(&secp, internal, None, hrp).to_string(),
                public_key: internal.to_string(),
                purpose: AddressPurpose::Ordinals,
            },
        ])
    }

    /// BIP-322 simple signature, base64.
    fn sign(&self, address: &str, message: &str) -> ProviderResult<String> {
        self.controls.require_authorized()?;
        let account = self
            .accounts()?
            .into_iter()
            .find(|a| a.address == address)
            .ok_or_else(|| ProviderError::Rejected(format!("address {address} not in wallet")))?;
        let secret = self.secret(account.purpose)?;
        let signed = match account.purpose {
            AddressPurpose::Payment => bip322::sign_simple_p2wpkh(message, &secret),
            AddressPurpose::Ordinals => bip322::sign_simple_p2tr(message, &secret),
        };
        signed.map_err(|e| ProviderError::Rejected(e.to_string()))
    }
}

#[async_trait]
impl PhantomBitcoinProvider for SoftwareBitcoin {
    async fn request_accounts(&self) -> ProviderResult<Vec<ProviderAccount>> {
        self.controls.round_trip().await?;
        self.controls.authorize();
        self.accounts()
    }

    async fn sign_message(&self, address: &str, message: &[u8]) -> ProviderResult<Vec<u8>> {
        self.controls.round_trip().await?;
        let message = std::str::from_utf8(message)
            .map_err(|_| ProviderError::rejected("message is not UTF-8"))?;
        let encoded = self.sign(address, message)?;
        BASE64.decode(encoded).map_err(|e| ProviderError::Rejected(e.to_string()))
    }

    fn events(&self) -> broadcast::Receiver<ProviderEvent> { self.controls.subscribe() }
}

#[async_trait]
impl SatsConnectProvider for SoftwareBitcoin {
    async fn wallet_connect(&self) -> ProviderResult<Vec<ProviderAccount>> {
        self.controls.round_trip().await?;
        self.controls.authorize();
        self.accounts()
    }

    async fn get_addresses(
        &self,
        purposes: &[AddressPurpose],
        _prompt: &str,
    ) -> ProviderResult<Vec<ProviderAccount>> {
        self.controls.round_trip().await?;
        self.controls.authorize();
        Ok(self.accounts()?.into_iter().filter(|a| purposes.contains(&a.purpose)).collect())
    }

    async fn sign_message(&self, address: &str, message: &str) -> ProviderResult<String> {
        self.controls.round_trip().await?;
        self.sign(address, message)
    }

    async fn wallet_disconnect(&self) -> ProviderResult<()> {
        self.controls.round_trip().await?;
        self.controls.authorized.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<ProviderEvent> { self.controls.subscribe() }
}

/// Solana extension: one ed25519 key per account index.
#[derive(Debug)]
pub struct SoftwareSolana {
    seed: SoftwareSeed,
    controls: Controls,
}

impl SoftwareSolana {
    pub fn new(seed: SoftwareSeed) -> Self { Self { seed, controls: Controls::default() } }

    pub fn controls(&self) -> &Controls { &self.controls }

    fn signing_key(&self) -> SigningKey {
        let mut bytes = self.seed.derive("solana", self.controls.account());
        let key = SigningKey::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    /// Base58 public key of the current account.
    pub fn public_key(&self) -> String {
        bs58::encode(self.signing_key().verifying_key().to_bytes()).into_string()
    }
}

#[async_trait]
impl PhantomSolanaProvider for SoftwareSolana {
    async fn connect(&self) -> ProviderResult<String> {
        self.controls.round_trip().await?;
        self.controls.authorize();
        Ok(self.public_key())
    }

    async fn disconnect(&self) -> ProviderResult<()> {
        self.controls.round_trip().await?;
        self.controls.authorized.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn sign_message(&self, message: &[u8]) -> ProviderResult<Vec<u8>> {
        self.controls.round_trip().await?;
        self.controls.require_authorized()?;
        Ok(self.signing_key().sign(message).to_bytes().to_vec())
    }

    fn events(&self) -> broadcast::Receiver<ProviderEvent> { self.controls.subscribe() }
}

/// One software provider per supported extension, sharing a seed.
#[derive(Debug, Clone)]
pub struct SoftwareProviders {
    pub phantom_bitcoin: Arc<SoftwareBitcoin>,
    pub xverse: Arc<SoftwareBitcoin>,
    pub phantom_solana: Arc<SoftwareSolana>,
}

impl SoftwareProviders {
    pub fn new(seed: SoftwareSeed, network: bitcoin::Network) -> Self {
        Self {
            phantom_bitcoin: Arc::new(SoftwareBitcoin::new(seed.clone(), network)),
            xverse: Arc::new(SoftwareBitcoin::new(seed.clone(), network)),
            phantom_solana: Arc::new(SoftwareSolana::new(seed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify;

    fn bitcoin() -> SoftwareBitcoin {
        SoftwareBitcoin::new(SoftwareSeed::new([3u8; 32]), bitcoin::Network::Bitcoin)
    }

    #[tokio::test]
    async fn bitcoin_accounts_and_signature() {
        let provider = bitcoin();
        let accounts = PhantomBitcoinProvider::request_accounts(&provider).await.unwrap();
        assert!(accounts[0].address.starts_with("bc1q"));
        assert!(accounts[1].address.starts_with("bc1p"));

        for account in &accounts {
            let sig = SatsConnectProvider::sign_message(&provider, &account.address, "hi")
                .await
                .unwrap();
            assert!(verify::bip322::verify("hi", &sig, &account.address));
        }
        assert_eq!(provider.controls().calls(), 3);
    }

    #[tokio::test]
    async fn signing_requires_authorization() {
        let provider = bitcoin();
        let address = provider.accounts().unwrap()[0].address.clone();
        let err = SatsConnectProvider::sign_message(&provider, &address, "hi").await.unwrap_err();
        assert_eq!(err, ProviderError::rejected("not connected"));
    }

    #[tokio::test]
    async fn rejection_is_reported() {
        let provider = SoftwareSolana::new(SoftwareSeed::new([4u8; 32]));
        provider.controls().set_rejecting(Some("User rejected the request."));
        assert!(provider.connect().await.is_err());
        provider.controls().set_rejecting(None);
        assert_eq!(provider.connect().await.unwrap(), provider.public_key());
    }

    #[tokio::test]
    async fn account_switch_changes_key() {
        let provider = SoftwareSolana::new(SoftwareSeed::new([4u8; 32]));
        let mut events = provider.events();
        let first = provider.public_key();
        provider.controls().switch_account(1);
        assert_ne!(first, provider.public_key());
        assert_eq!(events.recv().await.unwrap(), ProviderEvent::AccountsChanged);
    }

    #[test]
    fn seed_debug_is_redacted() {
        assert_eq!(format!("{:?}", SoftwareSeed::new([9u8; 32])), "SoftwareSeed(..)");
    }
}
