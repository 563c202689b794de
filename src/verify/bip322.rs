//! BIP-322 - Generic Signed Message Format
//!
//! Verifies "simple" BIP-322 signatures (a consensus-encoded witness stack,
//! base64) for P2WPKH, P2SH-P2WPKH and P2TR key-path addresses, and legacy
//! BIP-137 compact signatures (65 bytes, base64) for P2PKH, the single-key
//! segwit address types and P2TR. Legacy checks are loose: the header's
//! address-type bits are ignored and the recovered key is matched against
//! every address type it can produce, taking it as the taproot internal key
//! for P2TR.
//!
//! Reference: https://github.com/bitcoin/bips/blob/master/bip-0322.mediawiki
//!
//! ```text
//! to_spend:  in  0000..00:ffffffff  scriptSig = OP_0 PUSH32[tagged_hash(msg)]
//!            out 0 sat → address scriptPubKey
//! to_sign:   in  to_spend:0         witness   = signature
//!            out 0 sat → OP_RETURN
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bitcoin::address::NetworkUnchecked;
use bitcoin::consensus::{deserialize, serialize};
use bitcoin::hashes::Hash;
use bitcoin::key::{Keypair, TapTweak, XOnlyPublicKey};
use bitcoin::opcodes::all::{OP_PUSHBYTES_0, OP_RETURN};
use bitcoin::script::Builder;
use bitcoin::secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::{
    absolute, ecdsa, taproot, transaction, Address, Amount, CompressedPublicKey, OutPoint,
    PublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
};
use sha2::{Digest, Sha256};
use std::str::FromStr;

/// BIP-340 tag for the message hash committed to by `to_spend`.
pub const MESSAGE_TAG: &[u8] = b"BIP0322-signed-message";

/// Length of a BIP-137 compact signature (header byte + r + s).
const LEGACY_SIG_LEN: usize = 65;

#[derive(Debug, thiserror::Error)]
pub enum Bip322Error {
    #[error("Sighash: {0}")]
    Sighash(String),
}

/// Verify `signature` over `message` for `address`. Never fails: any
/// malformed input yields `false`.
pub fn verify(message: &str, signature: &str, address: &str) -> bool {
    let Ok(address) = Address::<NetworkUnchecked>::from_str(address) else { return false };
    let script_pubkey = address.assume_checked().script_pubkey();
    let Ok(raw) = BASE64.decode(signature) else { return false };

    if raw.len() == LEGACY_SIG_LEN {
        verify_legacy(message, &raw, &script_pubkey)
    } else {
        verify_simple(message, &raw, &script_pubkey)
    }
}

/// `SHA256(SHA256(tag) || SHA256(tag) || message)`
pub fn message_hash(message: &[u8]) -> [u8; 32] {
    let tag = Sha256::digest(MESSAGE_TAG);
    let mut hasher = Sha256::new();
    hasher.update(tag);
    hasher.update(tag);
    hasher.update(message);
    hasher.finalize().into()
}

/// The virtual transaction whose only output the signer "spends".
pub fn to_spend(script_pubkey: &ScriptBuf, message: &[u8]) -> Transaction {
    let script_sig = Builder::new()
        .push_opcode(OP_PUSHBYTES_0)
        .push_slice(message_hash(message))
        .into_script();
    Transaction {
        version: transaction::Version(0),
        lock_time: absolute::LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig,
            sequence: Sequence::ZERO,
            witness: Witness::new(),
        }],
        output: vec![TxOut { value: Amount::ZERO, script_pubkey: script_pubkey.clone() }],
    }
}

/// The virtual transaction carrying the signature in its witness.
pub fn to_sign(to_spend: &Transaction, witness: Witness) -> Transaction {
    Transaction {
        version: transaction::Version(0),
        lock_time: absolute::LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint { txid: to_spend.compute_txid(), vout: 0 },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ZERO,
            witness,
        }],
        output: vec![TxOut {
            value: Amount::ZERO,
            script_pubkey: Builder::new().push_opcode(OP_RETURN).into_script(),
        }],
    }
}

fn verify_simple(message: &str, raw: &[u8], script_pubkey: &ScriptBuf) -> bool {
    let Ok(witness) = deserialize::<Witness>(raw) else { return false };
    let to_spend = to_spend(script_pubkey, message.as_bytes());
    let to_sign = to_sign(&to_spend, witness.clone());

    if script_pubkey.is_p2wpkh() || script_pubkey.is_p2sh() {
        verify_wpkh(&to_sign, &witness, script_pubkey)
    } else if script_pubkey.is_p2tr() {
        verify_p2tr(&to_sign, &witness, script_pubkey)
    } else {
        false
    }
}

/// P2WPKH, or P2SH-wrapped P2WPKH when `script_pubkey` is P2SH.
fn verify_wpkh(to_sign: &Transaction, witness: &Witness, script_pubkey: &ScriptBuf) -> bool {
    if witness.len() != 2 {
        return false;
    }
    let (Some(sig), Some(pk)) = (witness.nth(0), witness.nth(1)) else { return false };
    let Ok(sig) = ecdsa::Signature::from_slice(sig) else { return false };
    if sig.sighash_type != EcdsaSighashType::All {
        return false;
    }
    let Ok(pk) = CompressedPublicKey::from_slice(pk) else { return false };

    let program = ScriptBuf::new_p2wpkh(&pk.wpubkey_hash());
    let owns_address = if script_pubkey.is_p2sh() {
        *script_pubkey == ScriptBuf::new_p2sh(&program.script_hash())
    } else {
        *script_pubkey == program
    };
    if !owns_address {
        return false;
    }

    let mut cache = SighashCache::new(to_sign);
    let sighash = cache.p2wpkh_signature_hash(0, &program, Amount::ZERO, sig.sighash_type);
    let Ok(sighash) = sighash else { return false };
    let msg = Message::from_digest(sighash.to_byte_array());
    Secp256k1::verification_only().verify_ecdsa(&msg, &sig.signature, &pk.0).is_ok()
}

/// Taproot key-path spend against the output key in `script_pubkey`.
fn verify_p2tr(to_sign: &Transaction, witness: &Witness, script_pubkey: &ScriptBuf) -> bool {
    if witness.len() != 1 {
        return false;
    }
    let Some(sig) = witness.nth(0) else { return false };
    let Ok(sig) = taproot::Signature::from_slice(sig) else { return false };
    if !matches!(sig.sighash_type, TapSighashType::Default | TapSighashType::All) {
        return false;
    }
    // OP_1 PUSH32 <output key>
    let Ok(output_key) = XOnlyPublicKey::from_slice(&script_pubkey.as_bytes()[2..34]) else {
        return false;
    };

    let prevouts = [TxOut { value: Amount::ZERO, script_pubkey: script_pubkey.clone() }];
    let mut cache = SighashCache::new(to_sign);
    let sighash =
        cache.taproot_key_spend_signature_hash(0, &Prevouts::All(&prevouts), sig.sighash_type);
    let Ok(sighash) = sighash else { return false };
    let msg = Message::from_digest(sighash.to_byte_array());
    Secp256k1::verification_only().verify_schnorr(&sig.signature, &msg, &output_key).is_ok()
}

/// BIP-137: recover the signing key and check it produces the address.
///
/// Header ranges: 27-30 P2PKH uncompressed, 31-34 P2PKH compressed,
/// 35-38 P2SH-P2WPKH, 39-42 P2WPKH. Segwit headers are matched loosely
/// (any compressed-key header is accepted for any single-key address type).
fn verify_legacy(message: &str, raw: &[u8], script_pubkey: &ScriptBuf) -> bool {
    let header = raw[0];
    if !(27..=42).contains(&header) {
        return false;
    }
    let Ok(recid) = RecoveryId::from_i32(((header - 27) & 0x03) as i32) else { return false };
    let Ok(sig) = RecoverableSignature::from_compact(&raw[1..], recid) else { return false };

    let digest = bitcoin::sign_message::signed_msg_hash(message);
    let msg = Message::from_digest(digest.to_byte_array());
    let secp = Secp256k1::verification_only();
    let Ok(recovered) = secp.recover_ecdsa(&msg, &sig) else { return false };

    let compressed = header >= 31;
    if script_pubkey.is_p2pkh() {
        let pubkey = PublicKey { compressed, inner: recovered };
        return *script_pubkey == ScriptBuf::new_p2pkh(&pubkey.pubkey_hash());
    }
    if !compressed {
        return false;
    }
    let program = ScriptBuf::new_p2wpkh(&CompressedPublicKey(recovered).wpubkey_hash());
    if script_pubkey.is_p2wpkh() {
        *script_pubkey == program
    } else if script_pubkey.is_p2sh() {
        *script_pubkey == ScriptBuf::new_p2sh(&program.script_hash())
    } else if script_pubkey.is_p2tr() {
        let (internal_key, _) = recovered.x_only_public_key();
        *script_pubkey == ScriptBuf::new_p2tr(&secp, internal_key, None)
    } else {
        false
    }
}

/// Produce a simple BIP-322 signature for the P2WPKH address of `secret`.
pub fn sign_simple_p2wpkh(message: &str, secret: &SecretKey) -> Result<String, Bip322Error> {
    let secp = Secp256k1::new();
    let pk = CompressedPublicKey(secret.public_key(&secp));
    let program = ScriptBuf::new_p2wpkh(&pk.wpubkey_hash());

    let unsigned = to_sign(&to_spend(&program, message.as_bytes()), Witness::new());
    let mut cache = SighashCache::new(&unsigned);
    let sighash = cache
        .p2wpkh_signature_hash(0, &program, Amount::ZERO, EcdsaSighashType::All)
        .map_err(|e| Bip322Error::Sighash(e.to_string()))?;

    let signature = ecdsa::Signature {
        signature: secp.sign_ecdsa(&Message::from_digest(sighash.to_byte_array()), secret),
        sighash_type: EcdsaSighashType::All,
    };
    Ok(BASE64.encode(serialize(&Witness::p2wpkh(&signature, &pk.0))))
}

/// Produce a simple BIP-322 signature for the key-path P2TR address of `secret`.
pub fn sign_simple_p2tr(message: &str, secret: &SecretKey) -> Result<String, Bip322Error> {
    let secp = Secp256k1::new();
    let keypair = Keypair::from_secret_key(&secp, secret);
    let (internal_key, _) = keypair.x_only_public_key();
    let script_pubkey = ScriptBuf::new_p2tr(&secp, internal_key, None);

    let unsigned = to_sign(&to_spend(&script_pubkey, message.as_bytes()), Witness::new());
    let prevouts = [TxOut { value: Amount::ZERO, script_pubkey }];
    let mut cache = SighashCache::new(&unsigned);
    let sighash = cache
        .taproot_key_spend_signature_hash(0, &Prevouts::All(&prevouts), TapSighashType::Default)
        .map_err(|e| Bip322Error::Sighash(e.to_string()))?;

    let tweaked = keypair.tap_tweak(&secp, None).to_keypair();
    let msg = Message::from_digest(sighash.to_byte_array());
    let signature = taproot::Signature {
        signature: secp.sign_schnorr_no_aux_rand(&msg, &tweaked),
        sighash_type: TapSighashType::Default,
    };
    Ok(BASE64.encode(serialize(&Witness::p2tr_key_spend(&signature))))
}
