//! Solana message signatures: ed25519 detached, base58 public key, base64 signature

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

/// Verify a detached ed25519 signature over the UTF-8 bytes of `message`.
pub fn verify(message: &str, signature_b64: &str, pubkey_b58: &str) -> bool {
    let Some(key) = decode_pubkey(pubkey_b58) else { return false };
    let Ok(sig) = BASE64.decode(signature_b64) else { return false };
    let Ok(sig) = Signature::from_slice(&sig) else { return false };
    key.verify(message.as_bytes(), &sig).is_ok()
}

/// Decode a base58 Solana address into an ed25519 verifying key.
pub fn decode_pubkey(pubkey_b58: &str) -> Option<VerifyingKey> {
    let bytes = bs58::decode(pubkey_b58).into_vec().ok()?;
    let bytes: [u8; 32] = bytes.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}
