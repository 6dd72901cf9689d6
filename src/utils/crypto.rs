use ring::digest::{Context, SHA256};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, ECDSA_P256_SHA256_FIXED, ECDSA_P256_SHA256_FIXED_SIGNING};
use ripemd::{Digest as RipemdDigest, Ripemd160};

use crate::error::{BlockchainError, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Width in bytes of one P-256 scalar or field coordinate.
pub const P256_COORDINATE_LEN: usize = 32;

const UNCOMPRESSED_POINT_TAG: u8 = 0x04;

/// Seconds since the Unix epoch.
pub fn current_timestamp() -> Result<i64> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| BlockchainError::Crypto(format!("System time error: {e}")))?
        .as_secs();

    i64::try_from(secs).map_err(|_| BlockchainError::Crypto("Timestamp overflow".to_string()))
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    digest.as_ref().to_vec()
}

pub fn ripemd160_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn base58_decode(data: &str) -> Result<Vec<u8>> {
    bs58::decode(data)
        .into_vec()
        .map_err(|e| BlockchainError::InvalidAddress(format!("Invalid base58 encoding: {e}")))
}

/// Generates a fresh P-256 key pair, returned as a PKCS#8 document.
pub fn new_key_pair() -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
        .map_err(|e| BlockchainError::Crypto(format!("Failed to generate ECDSA key pair: {e}")))?
        .as_ref()
        .to_vec();
    Ok(pkcs8)
}

/// Signs `message` (hashed with SHA-256) and returns the raw `r ‖ s` concatenation.
pub fn ecdsa_p256_sha256_sign_digest(pkcs8: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| {
            BlockchainError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
        })?;
    let signature = key_pair
        .sign(&rng, message)
        .map_err(|e| BlockchainError::Crypto(format!("Failed to sign message: {e}")))?
        .as_ref()
        .to_vec();
    Ok(signature)
}

/// Verifies a raw `r ‖ s` signature against a raw `x ‖ y` public key.
///
/// Both byte strings are split exactly in half. Each half is read as a
/// big-endian integer, so short halves are left-padded to the curve width.
/// Anything that does not fit the curve is a failed verification, not an error.
pub fn ecdsa_p256_sha256_sign_verify(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    let (x, y) = public_key.split_at(public_key.len() / 2);
    let (r, s) = signature.split_at(signature.len() / 2);

    let (Some(x), Some(y), Some(r), Some(s)) = (
        left_pad(x, P256_COORDINATE_LEN),
        left_pad(y, P256_COORDINATE_LEN),
        left_pad(r, P256_COORDINATE_LEN),
        left_pad(s, P256_COORDINATE_LEN),
    ) else {
        return false;
    };

    let mut point = Vec::with_capacity(1 + 2 * P256_COORDINATE_LEN);
    point.push(UNCOMPRESSED_POINT_TAG);
    point.extend(x);
    point.extend(y);

    let mut fixed_signature = r;
    fixed_signature.extend(s);

    let peer_public_key = ring::signature::UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, point);
    peer_public_key
        .verify(message, fixed_signature.as_slice())
        .is_ok()
}

fn left_pad(bytes: &[u8], width: usize) -> Option<Vec<u8>> {
    if bytes.is_empty() || bytes.len() > width {
        return None;
    }
    let mut padded = vec![0u8; width - bytes.len()];
    padded.extend_from_slice(bytes);
    Some(padded)
}
