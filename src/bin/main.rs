//! Beesign CLI - connect, sign and verify from the terminal
//!
//! Wallet operations run against the active wallet:
//!   beesign wallets                    → every wallet, detected/connected/active
//!   beesign status                     → session state and active address
//!   beesign connect <wallet>           → connect and make active
//!   beesign switch <wallet>            → make another connected wallet active
//!   beesign disconnect                 → drop the active wallet
//!   beesign sign <message>             → {"signature": "..."}
//!   beesign verify <message> <sig>     → {"valid": true|false}
//!
//! Standalone verification, no wallet needed:
//!   beesign check --network bitcoin --address bc1q... --message hi --signature AkcwR...
//!
//! Environment:
//!   BEESIGN_ROOT        data root (default: platform local data dir)
//!   BEESIGN_SEED        64 hex chars, seed of the built-in software providers
//!   BEESIGN_PROVIDERS   comma list of providers to expose (default: all)
//!   BEESIGN_LOG_JSON=1  JSON log lines on stderr
//!
//! Output format:
//!   --json     Compact JSON (default for non-tty)
//!   --pretty   Pretty-print JSON (default for tty)

use anyhow::{anyhow, bail, Context};
use beesign::config::{parse_seed, seed_from_env, SessionConfig};
use beesign::driver::names;
use beesign::logging::init_logging;
use beesign::provider::software::SoftwareProviders;
use beesign::{
    verify_signature, ConnectionRegistry, ConnectionStore, Network, Providers, WalletSession,
};
use serde_json::{json, Value};
use std::env;
use std::io::IsTerminal;
use std::sync::Arc;
use tracing::{debug, warn};

const PROVIDERS_ENV: &str = "BEESIGN_PROVIDERS";

/// Seed used when `BEESIGN_SEED` is unset. Development only.
const DEV_SEED: &str = "0000000000000000000000000000000000000000000000000000000000000001";

fn main() {
    init_logging();

    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);

    if opts.help {
        print_usage();
        return;
    }

    if opts.version {
        println!("beesign {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let Some(command) = opts.command.clone() else {
        print_usage();
        return;
    };

    let pretty = opts.pretty || (!opts.json && std::io::stdout().is_terminal());
    match run(&command, &opts) {
        Ok(output) => println!("{}", render(&output, pretty)),
        Err(e) => {
            eprintln!("{}", render(&json!({"error": format!("{e:#}")}), pretty));
            std::process::exit(1);
        }
    }
}

fn render(value: &Value, pretty: bool) -> String {
    if pretty {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

fn run(command: &str, opts: &ParsedArgs) -> anyhow::Result<Value> {
    if command == "check" {
        return cmd_check(opts);
    }
    let rt = tokio::runtime::Runtime::new().context("tokio runtime")?;
    rt.block_on(async {
        let session = open_session(opts).await?;
        match command {
            "wallets" | "ls" => cmd_wallets(&session),
            "status" => cmd_status(&session),
            "connect" => cmd_connect(&session, opts).await,
            "switch" => cmd_switch(&session, opts),
            "disconnect" => cmd_disconnect(&session).await,
            "sign" => cmd_sign(&session, opts).await,
            "verify" => cmd_verify(&session, opts).await,
            other => Err(anyhow!("Unknown command: {other}")),
        }
    })
}

async fn open_session(opts: &ParsedArgs) -> anyhow::Result<Arc<WalletSession>> {
    let app = opts.app.clone().unwrap_or_else(|| beesign::config::DEFAULT_APP.into());
    let mut config = SessionConfig::new(app);
    if let Some(dir) = &opts.data_dir {
        config = config.with_data_dir(dir);
    }
    if opts.in_memory {
        config = config.in_memory();
    }
    debug!(path = %config.store_path().display(), persist = config.persist, "opening session");

    let seed = match seed_from_env()? {
        Some(seed) => seed,
        None => {
            warn!("BEESIGN_SEED not set, using the development seed");
            parse_seed(DEV_SEED)?
        }
    };
    let network = bitcoin_network(opts.bitcoin_network.as_deref())?;
    let software = SoftwareProviders::new(seed, network);
    let providers = enabled_providers(&software, env::var(PROVIDERS_ENV).ok().as_deref())?;

    let registry = ConnectionRegistry::new(providers);
    let store = ConnectionStore::from_config(&config);
    let session = WalletSession::start(registry, store);
    session.restored().await;
    Ok(session)
}

fn bitcoin_network(value: Option<&str>) -> anyhow::Result<bitcoin::Network> {
    Ok(match value.map(str::to_ascii_lowercase).as_deref() {
        None | Some("mainnet") | Some("bitcoin") => bitcoin::Network::Bitcoin,
        Some("testnet") => bitcoin::Network::Testnet,
        Some("signet") => bitcoin::Network::Signet,
        Some("regtest") => bitcoin::Network::Regtest,
        Some(other) => bail!("Unknown bitcoin network: {other}"),
    })
}

/// Restrict the software providers to a comma list, e.g. `xverse,phantom-solana`.
fn enabled_providers(
    software: &SoftwareProviders,
    list: Option<&str>,
) -> anyhow::Result<Providers> {
    let Some(list) = list else { return Ok(software.into()) };
    let mut providers = Providers::none();
    for entry in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        providers = match wallet_name(entry)? {
            names::PHANTOM_BITCOIN => {
                providers.with_phantom_bitcoin(software.phantom_bitcoin.clone())
            }
            names::XVERSE => providers.with_xverse(software.xverse.clone()),
            _ => providers.with_phantom_solana(software.phantom_solana.clone()),
        };
    }
    Ok(providers)
}

/// Accept the display name or a short alias.
fn wallet_name(value: &str) -> anyhow::Result<&'static str> {
    let normalized = value.trim().to_ascii_lowercase().replace([' ', '_'], "-");
    Ok(match normalized.as_str() {
        "phantom-bitcoin" | "phantom-btc" => names::PHANTOM_BITCOIN,
        "phantom-solana" | "phantom-sol" | "phantom" => names::PHANTOM_SOLANA,
        "xverse" | "xverse-wallet" => names::XVERSE,
        _ => bail!("Unknown wallet: {value}"),
    })
}

fn status(session: &WalletSession) -> Value {
    json!({
        "state": session.state(),
        "activeWallet": session.active_wallet_name(),
        "address": session.active_wallet_address(),
        "network": session.active_wallet_network(),
        "connected": session.is_wallet_connected(),
    })
}

fn cmd_wallets(session: &WalletSession) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(session.wallets())?)
}

fn cmd_status(session: &WalletSession) -> anyhow::Result<Value> { Ok(status(session)) }

async fn cmd_connect(session: &WalletSession, opts: &ParsedArgs) -> anyhow::Result<Value> {
    let name = wallet_name(opts.arg(0, "wallet")?)?;
    session.connect(name).await?;
    Ok(status(session))
}

fn cmd_switch(session: &WalletSession, opts: &ParsedArgs) -> anyhow::Result<Value> {
    let name = wallet_name(opts.arg(0, "wallet")?)?;
    session.switch_wallet(name)?;
    Ok(status(session))
}

async fn cmd_disconnect(session: &WalletSession) -> anyhow::Result<Value> {
    session.disconnect().await?;
    Ok(status(session))
}

async fn cmd_sign(session: &WalletSession, opts: &ParsedArgs) -> anyhow::Result<Value> {
    let message = opts.arg(0, "message")?;
    let signature = session.sign_message(message).await?;
    Ok(json!({
        "wallet": session.active_wallet_name(),
        "address": session.active_wallet_address(),
        "message": message,
        "signature": signature,
    }))
}

async fn cmd_verify(session: &WalletSession, opts: &ParsedArgs) -> anyhow::Result<Value> {
    let message = opts.arg(0, "message")?;
    let signature = opts.arg(1, "signature")?;
    let valid = session.verify_signature(message, signature).await?;
    Ok(json!({"address": session.active_wallet_address(), "valid": valid}))
}

fn cmd_check(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let network = opts.network.as_deref().context("--network is required")?;
    let network = Network::from_str(network).ok_or_else(|| anyhow!("Unknown network: {network}"))?;
    let address = opts.address.as_deref().context("--address is required")?;
    let message = opts.message.as_deref().context("--message is required")?;
    let signature = opts.signature.as_deref().context("--signature is required")?;
    let valid = verify_signature(network, message, signature, address);
    Ok(json!({"network": network, "address": address, "valid": valid}))
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    positional: Vec<String>,
    // Session options
    app: Option<String>,
    data_dir: Option<String>,
    in_memory: bool,
    bitcoin_network: Option<String>,
    // Check options
    network: Option<String>,
    address: Option<String>,
    message: Option<String>,
    signature: Option<String>,
    // Output options
    json: bool,
    pretty: bool,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        let mut opts = ParsedArgs::default();
        let mut positional = Vec::new();
        let mut iter = args.iter();

        while let Some(arg) = iter.next() {
            let slot = match arg.as_str() {
                "--help" | "-h" => { opts.help = true; continue; }
                "--version" | "-V" => { opts.version = true; continue; }
                "--json" => { opts.json = true; continue; }
                "--pretty" => { opts.pretty = true; continue; }
                "--in-memory" => { opts.in_memory = true; continue; }
                "--app" | "-a" => &mut opts.app,
                "--data-dir" | "-d" => &mut opts.data_dir,
                "--bitcoin-network" => &mut opts.bitcoin_network,
                "--network" | "-n" => &mut opts.network,
                "--address" => &mut opts.address,
                "--message" | "-m" => &mut opts.message,
                "--signature" | "-s" => &mut opts.signature,
                _ => {
                    positional.push(arg.clone());
                    continue;
                }
            };
            *slot = iter.next().cloned();
        }

        let mut positional = positional.into_iter();
        opts.command = positional.next();
        opts.positional = positional.collect();
        opts
    }

    fn arg(&self, index: usize, name: &str) -> anyhow::Result<&str> {
        self.positional.get(index).map(String::as_str).with_context(|| format!("missing <{name}>"))
    }
}

fn print_usage() {
    println!(
        r#"beesign - connect a wallet, sign a message, verify it

USAGE:
    beesign <command> [args] [options]

COMMANDS:
    wallets                      List wallets (detected, connected, active)
    status                       Show the session state
    connect <wallet>             Connect a wallet and make it active
    switch <wallet>              Make another connected wallet active
    disconnect                   Disconnect the active wallet
    sign <message>               Sign with the active wallet
    verify <message> <sig>       Verify against the active wallet's address
    check                        Verify any signature (needs --network --address --message --signature)

WALLETS:
    phantom-solana, phantom-bitcoin, xverse (or the full display name)

OPTIONS:
    -a, --app <name>             App name under the data root [default: beesign]
    -d, --data-dir <path>        Data directory (replaces <root>/<app>)
        --in-memory              Do not read or write the connection store
        --bitcoin-network <net>  mainnet, testnet, signet, regtest [default: mainnet]
    -n, --network <net>          bitcoin or solana (check)
        --address <addr>         Claimed address (check)
    -m, --message <text>         Signed message (check)
    -s, --signature <sig>        Base64 signature (check)
        --json                   Compact JSON output
        --pretty                 Pretty JSON output
    -h, --help                   Show this help
    -V, --version                Show version

ENVIRONMENT:
    BEESIGN_ROOT                 Data root
    BEESIGN_SEED                 Software provider seed (64 hex chars)
    BEESIGN_PROVIDERS            Comma list of providers to expose
    BEESIGN_LOG_JSON=1           JSON logs on stderr
    RUST_LOG                     Log filter [default: info]"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use beesign::provider::software::SoftwareSeed;

    fn parse(args: &[&str]) -> ParsedArgs {
        ParsedArgs::parse(&args.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn parses_command_and_options() {
        let opts = parse(&["verify", "hello", "sig==", "--app", "demo", "--in-memory"]);
        assert_eq!(opts.command.as_deref(), Some("verify"));
        assert_eq!(opts.arg(0, "message").unwrap(), "hello");
        assert_eq!(opts.arg(1, "signature").unwrap(), "sig==");
        assert!(opts.arg(2, "extra").is_err());
        assert_eq!(opts.app.as_deref(), Some("demo"));
        assert!(opts.in_memory);
    }

    #[test]
    fn wallet_aliases() {
        assert_eq!(wallet_name("Xverse Wallet").unwrap(), names::XVERSE);
        assert_eq!(wallet_name("phantom_bitcoin").unwrap(), names::PHANTOM_BITCOIN);
        assert_eq!(wallet_name("Phantom Solana").unwrap(), names::PHANTOM_SOLANA);
        assert!(wallet_name("unisat").is_err());
    }

    #[test]
    fn provider_list_limits_detection() {
        let software =
            SoftwareProviders::new(SoftwareSeed::new([1u8; 32]), bitcoin::Network::Bitcoin);
        let providers = enabled_providers(&software, Some("xverse, phantom-solana")).unwrap();
        assert!(providers.xverse.is_some() && providers.phantom_solana.is_some());
        assert!(providers.phantom_bitcoin.is_none());
        assert!(enabled_providers(&software, Some("metamask")).is_err());
    }

    #[test]
    fn check_command() {
        let opts = parse(&[
            "check",
            "--network",
            "solana",
            "--address",
            "x",
            "--message",
            "m",
            "--signature",
            "s",
        ]);
        assert_eq!(cmd_check(&opts).unwrap()["valid"], false);
        assert!(cmd_check(&parse(&["check"])).is_err());
    }
}
