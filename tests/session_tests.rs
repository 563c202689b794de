//! Session tests - connection lifecycle end to end over software providers
//!
//! These tests verify:
//! 1. Connect is idempotent and promotes the wallet to active
//! 2. Disconnect promotes the next connected wallet, or none
//! 3. Restoration reconnects only wallets marked connected, demoting failures
//! 4. Switching to a disconnected wallet changes nothing
//! 5. Sign → verify round trips for every driver
//! 6. A connect arriving while one is in flight is dropped
//! 7. The store file follows every mutation and survives restarts
//! 8. Restoration runs in the background and survives hung providers and
//!    unwritable stores

use beesign::driver::{names, WalletDriver};
use beesign::provider::software::{SoftwareProviders, SoftwareSeed};
use beesign::provider::ProviderEvent;
use beesign::config::STORE_FILE;
use beesign::{
    ConnectionRegistry, ConnectionStore, PersistedConnectionState, SessionState, WalletError,
    WalletSession,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn software() -> SoftwareProviders {
    SoftwareProviders::new(SoftwareSeed::new([42u8; 32]), bitcoin::Network::Bitcoin)
}

/// Start a session and wait for restoration to settle.
async fn start(sw: &SoftwareProviders, store: ConnectionStore) -> Arc<WalletSession> {
    let session = WalletSession::start(ConnectionRegistry::software(sw), store);
    session.restored().await;
    session
}

fn persisted(connections: &[(&str, bool)], active: Option<&str>) -> PersistedConnectionState {
    PersistedConnectionState {
        connections: connections
            .iter()
            .map(|(n, c)| (n.to_string(), *c))
            .collect::<BTreeMap<_, _>>(),
        active_wallet: active.map(str::to_string),
    }
}

/// Poll until `check` holds; background listeners run on the same runtime.
async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn connect_twice_is_one_round_trip() {
    let sw = software();
    let session = start(&sw, ConnectionStore::in_memory()).await;
    for name in [names::PHANTOM_SOLANA, names::PHANTOM_BITCOIN, names::XVERSE] {
        session.connect(name).await.unwrap();
        session.connect(name).await.unwrap();
    }
    assert_eq!(sw.phantom_solana.controls().calls(), 1);
    assert_eq!(sw.phantom_bitcoin.controls().calls(), 1);
    assert_eq!(sw.xverse.controls().calls(), 1);
    assert_eq!(session.active_wallet_name().as_deref(), Some(names::XVERSE));
}

#[tokio::test]
async fn disconnect_promotes_next_connected_wallet() {
    let sw = software();
    let session = start(&sw, ConnectionStore::in_memory()).await;
    session.connect(names::XVERSE).await.unwrap();
    session.connect(names::PHANTOM_BITCOIN).await.unwrap();
    assert_eq!(session.active_wallet_name().as_deref(), Some(names::PHANTOM_BITCOIN));

    session.disconnect().await.unwrap();
    assert_eq!(session.active_wallet_name().as_deref(), Some(names::XVERSE));
    assert!(!session.persisted_state().is_connected(names::PHANTOM_BITCOIN));

    session.disconnect().await.unwrap();
    assert_eq!(session.active_wallet_name(), None);
    assert_eq!(session.state(), SessionState::NoActiveWallet);
    assert!(!session.is_wallet_connected());

    // Nothing left to disconnect.
    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn restoration_connects_only_marked_wallets() {
    let sw = software();
    let store = ConnectionStore::with_state(persisted(
        &[(names::PHANTOM_SOLANA, true), (names::XVERSE, false)],
        Some(names::PHANTOM_SOLANA),
    ));
    let session = start(&sw, store).await;
    assert_eq!(sw.phantom_solana.controls().calls(), 1);
    assert_eq!(sw.xverse.controls().calls(), 0);
    assert_eq!(session.active_wallet_name().as_deref(), Some(names::PHANTOM_SOLANA));
    assert_eq!(session.active_wallet_address(), Some(sw.phantom_solana.public_key()));
}

#[tokio::test]
async fn failed_restoration_demotes_and_clears_active() {
    let sw = software();
    sw.phantom_solana.controls().set_rejecting(Some("User rejected the request."));
    let store = ConnectionStore::with_state(persisted(
        &[(names::PHANTOM_SOLANA, true), (names::XVERSE, false)],
        Some(names::PHANTOM_SOLANA),
    ));
    let session = start(&sw, store).await;
    assert_eq!(sw.xverse.controls().calls(), 0);
    assert!(!session.persisted_state().is_connected(names::PHANTOM_SOLANA));
    assert_eq!(session.active_wallet_name(), None);
}

#[tokio::test]
async fn restoration_skips_unknown_and_repoints_active() {
    let sw = software();
    let store = ConnectionStore::with_state(persisted(
        &[("Unisat", true), (names::PHANTOM_BITCOIN, true)],
        Some("Unisat"),
    ));
    let session = start(&sw, store).await;
    assert_eq!(session.active_wallet_name().as_deref(), Some(names::PHANTOM_BITCOIN));
    assert!(session.persisted_state().is_connected("Unisat"));
}

#[tokio::test]
async fn undetected_wallet_is_demoted_on_restore() {
    let sw = software();
    let providers = beesign::registry::Providers::none().with_xverse(sw.xverse.clone());
    let store = ConnectionStore::with_state(persisted(
        &[(names::PHANTOM_SOLANA, true)],
        Some(names::PHANTOM_SOLANA),
    ));
    let session = WalletSession::start(ConnectionRegistry::new(providers), store);
    session.restored().await;
    assert_eq!(session.detected_wallets(), vec![names::XVERSE.to_string()]);
    assert_eq!(session.persisted_state(), persisted(&[(names::PHANTOM_SOLANA, false)], None));
    assert_eq!(
        session.connect(names::PHANTOM_SOLANA).await,
        Err(WalletError::ProviderUnavailable(names::PHANTOM_SOLANA.into()))
    );
}

#[tokio::test]
async fn switch_to_disconnected_wallet_is_ignored() {
    let sw = software();
    let session = start(&sw, ConnectionStore::in_memory()).await;
    session.connect(names::PHANTOM_SOLANA).await.unwrap();
    session.switch_wallet(names::XVERSE).unwrap();
    assert_eq!(session.active_wallet_name().as_deref(), Some(names::PHANTOM_SOLANA));

    session.connect(names::XVERSE).await.unwrap();
    session.switch_wallet(names::PHANTOM_SOLANA).unwrap();
    assert_eq!(session.active_wallet_name().as_deref(), Some(names::PHANTOM_SOLANA));
    assert_eq!(session.active_wallet_network(), Some(beesign::Network::Solana));
}

#[tokio::test]
async fn sign_and_verify_round_trip_every_wallet() {
    let sw = software();
    let session = start(&sw, ConnectionStore::in_memory()).await;
    let message = "Sign in to beesign\nnonce: 7f1c";
    for name in [names::PHANTOM_SOLANA, names::PHANTOM_BITCOIN, names::XVERSE] {
        session.connect(name).await.unwrap();
        let signature = session.sign_message(message).await.unwrap();
        assert!(session.verify_signature(message, &signature).await.unwrap(), "{name}");
        assert!(!session.verify_signature("another message", &signature).await.unwrap(), "{name}");

        let address = session.active_wallet_address().unwrap();
        let network = session.active_wallet_network().unwrap();
        assert!(beesign::verify::verify_signature(network, message, &signature, &address));
    }
}

#[tokio::test]
async fn connect_in_flight_is_dropped() {
    let sw = software();
    let session = start(&sw, ConnectionStore::in_memory()).await;
    let driver = session.registry().get(names::XVERSE).unwrap().clone();
    sw.xverse.controls().pause();

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.connect(names::XVERSE).await }
    });
    eventually(|| driver.connect_or_disconnect_in_progress()).await;
    assert_eq!(session.state(), SessionState::Connecting { wallet: names::XVERSE.into() });

    session.connect(names::XVERSE).await.unwrap();
    assert_eq!(sw.xverse.controls().calls(), 1);
    assert_eq!(session.persisted_state(), PersistedConnectionState::default());

    sw.xverse.controls().resume();
    first.await.unwrap().unwrap();
    assert!(!driver.connect_or_disconnect_in_progress());
    assert_eq!(session.active_wallet_name().as_deref(), Some(names::XVERSE));
    assert_eq!(session.state(), SessionState::Connected { wallet: names::XVERSE.into() });
}

#[tokio::test]
async fn disconnect_in_flight_reports_switching() {
    let sw = software();
    let session = start(&sw, ConnectionStore::in_memory()).await;
    session.connect(names::PHANTOM_BITCOIN).await.unwrap();
    session.connect(names::PHANTOM_SOLANA).await.unwrap();
    let driver = session.registry().get(names::PHANTOM_SOLANA).unwrap().clone();
    sw.phantom_solana.controls().pause();

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.disconnect().await }
    });
    eventually(|| driver.connect_or_disconnect_in_progress()).await;
    assert_eq!(session.state(), SessionState::Switching { from: names::PHANTOM_SOLANA.into() });
    assert_eq!(session.active_wallet_name().as_deref(), Some(names::PHANTOM_SOLANA));

    sw.phantom_solana.controls().resume();
    pending.await.unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Connected { wallet: names::PHANTOM_BITCOIN.into() });

    session.disconnect().await.unwrap();
    assert_eq!(session.state(), SessionState::NoActiveWallet);
}

#[tokio::test]
async fn hung_restoration_does_not_hold_back_start() {
    let sw = software();
    sw.xverse.controls().pause();
    let store = ConnectionStore::with_state(persisted(
        &[(names::XVERSE, true), (names::PHANTOM_SOLANA, true)],
        Some(names::PHANTOM_SOLANA),
    ));
    let session = WalletSession::start(ConnectionRegistry::software(&sw), store);
    let xverse = session.registry().get(names::XVERSE).unwrap().clone();

    eventually(|| session.is_wallet_connected()).await;
    assert_eq!(session.active_wallet_name().as_deref(), Some(names::PHANTOM_SOLANA));
    assert!(xverse.connect_or_disconnect_in_progress());
    assert!(tokio::time::timeout(Duration::from_millis(50), session.restored()).await.is_err());

    let signature = session.sign_message("still usable").await.unwrap();
    assert!(session.verify_signature("still usable", &signature).await.unwrap());

    sw.xverse.controls().resume();
    session.restored().await;
    assert!(xverse.is_connected());
    assert_eq!(
        session.persisted_state(),
        persisted(
            &[(names::PHANTOM_SOLANA, true), (names::XVERSE, true)],
            Some(names::PHANTOM_SOLANA)
        )
    );
}

#[tokio::test]
async fn active_wallet_waits_for_its_own_restoration() {
    let sw = software();
    sw.xverse.controls().pause();
    let store = ConnectionStore::with_state(persisted(
        &[(names::XVERSE, true), (names::PHANTOM_SOLANA, true)],
        Some(names::XVERSE),
    ));
    let session = WalletSession::start(ConnectionRegistry::software(&sw), store);
    let solana = session.registry().get(names::PHANTOM_SOLANA).unwrap().clone();

    eventually(|| solana.is_connected()).await;
    assert_eq!(session.active_wallet_name().as_deref(), Some(names::XVERSE));
    assert!(!session.is_wallet_connected());

    sw.xverse.controls().resume();
    session.restored().await;
    assert_eq!(session.active_wallet_name().as_deref(), Some(names::XVERSE));
    assert!(session.is_wallet_connected());
}

#[tokio::test]
async fn unwritable_store_does_not_stop_restoration() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join(STORE_FILE);
    let before = persisted(
        &[(names::PHANTOM_SOLANA, true), (names::XVERSE, true)],
        Some(names::XVERSE),
    );
    std::fs::write(&path, serde_json::to_string(&before).unwrap()).unwrap();
    std::fs::create_dir(path.with_extension("json.tmp")).unwrap();

    let sw = software();
    sw.phantom_solana.controls().set_rejecting(Some("User rejected the request."));
    let session = start(&sw, ConnectionStore::open(&path)).await;

    assert_eq!(sw.xverse.controls().calls(), 1);
    assert_eq!(session.active_wallet_name().as_deref(), Some(names::XVERSE));
    assert!(session.is_wallet_connected());
    assert_eq!(
        session.persisted_state(),
        persisted(&[(names::PHANTOM_SOLANA, false), (names::XVERSE, true)], Some(names::XVERSE))
    );
    // The file still holds the last successful write.
    let on_disk: PersistedConnectionState =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(on_disk, before);

    // Caller-driven writes surface the failure but keep the change.
    let result = session.switch_wallet(names::XVERSE);
    assert!(matches!(result, Err(WalletError::Store(_))));
    assert_eq!(session.active_wallet_name().as_deref(), Some(names::XVERSE));
}

#[tokio::test]
async fn provider_revoke_is_reconciled() {
    let sw = software();
    let session = start(&sw, ConnectionStore::in_memory()).await;
    session.connect(names::PHANTOM_SOLANA).await.unwrap();
    session.connect(names::XVERSE).await.unwrap();

    sw.xverse.controls().revoke();
    eventually(|| session.active_wallet_name().as_deref() == Some(names::PHANTOM_SOLANA)).await;
    assert!(!session.persisted_state().is_connected(names::XVERSE));
}

#[tokio::test]
async fn account_switch_updates_active_address() {
    let sw = software();
    let session = start(&sw, ConnectionStore::in_memory()).await;
    session.connect(names::PHANTOM_SOLANA).await.unwrap();
    let before = session.active_wallet_address();

    sw.phantom_solana.controls().switch_account(3);
    eventually(|| session.active_wallet_address() == Some(sw.phantom_solana.public_key())).await;
    assert_ne!(session.active_wallet_address(), before);

    // A provider-side reconnect while connected re-resolves to the same key.
    sw.phantom_solana.controls().emit(ProviderEvent::Connected);
    eventually(|| sw.phantom_solana.controls().calls() == 3).await;
    assert_eq!(session.active_wallet_address(), Some(sw.phantom_solana.public_key()));
    assert_eq!(session.active_wallet_name().as_deref(), Some(names::PHANTOM_SOLANA));
}

#[test]
fn store_file_survives_restart() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("beesign").join("data").join("wallet-connection.json");
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let sw = software();

    rt.block_on(async {
        let session = start(&sw, ConnectionStore::open(&path)).await;
        session.connect(names::PHANTOM_SOLANA).await.unwrap();
        session.connect(names::PHANTOM_BITCOIN).await.unwrap();
    });

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(
        raw,
        json!({
            "connections": {"Phantom Bitcoin": true, "Phantom Solana": true},
            "activeWallet": "Phantom Bitcoin"
        })
    );

    // Fresh providers: nothing is authorized until restoration reconnects.
    let sw = software();
    rt.block_on(async {
        let session = start(&sw, ConnectionStore::open(&path)).await;
        assert_eq!(session.active_wallet_name().as_deref(), Some(names::PHANTOM_BITCOIN));
        assert!(session.is_wallet_connected());
        assert_eq!(sw.phantom_solana.controls().calls(), 1);
        assert_eq!(sw.phantom_bitcoin.controls().calls(), 1);
        session.disconnect().await.unwrap();
    });

    let store = ConnectionStore::open(&path);
    assert_eq!(store.state().active_wallet.as_deref(), Some(names::PHANTOM_SOLANA));
    assert!(!store.state().is_connected(names::PHANTOM_BITCOIN));
}
