//! Signature verification - one pure routine per chain family
//!
//! | Network | Scheme | Signature | Address |
//! |---------|--------|-----------|---------|
//! | bitcoin | BIP-322 simple, BIP-137 legacy | base64 witness / 65-byte compact | any Bitcoin address |
//! | solana | ed25519 detached | base64, 64 bytes | base58 public key, 32 bytes |
//!
//! Nothing here trusts the wallet that produced the signature. Every routine
//! returns `false` for malformed input instead of failing.

pub mod bip322;
pub mod solana;

use crate::network::Network;

/// Verify `signature` over `message` against the claimed `address`.
pub fn verify_signature(network: Network, message: &str, signature: &str, address: &str) -> bool {
    let valid = match network {
        Network::Bitcoin => bip322::verify(message, signature, address),
        Network::Solana => solana::verify(message, signature, address),
    };
    tracing::debug!(network = %network, address, valid, "signature checked");
    valid
}
