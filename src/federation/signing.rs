//! Content signing primitive
//!
//! Seals a canonical payload with the issuer's private key and derives the
//! content fingerprint. The fingerprint is the hash of the RSA PKCS#1 v1.5
//! signature, not of the content itself; downstream verifiers depend on
//! this exact two-step derivation, so it must not be simplified to a plain
//! content hash.

use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// Result of sealing a payload
#[derive(Debug, Clone)]
pub struct SealedPayload {
    /// Raw RSA PKCS#1 v1.5 signature over sha256(payload)
    pub signature: Vec<u8>,
    /// hex(sha256(signature)) - the content fingerprint
    pub fingerprint: String,
}

/// Sign a canonical payload and derive its fingerprint.
///
/// PKCS#1 v1.5 signing is deterministic: for a fixed key and payload the
/// signature, and therefore the fingerprint, is byte-identical across
/// invocations. Re-sealing the same grant state reproduces the same
/// fingerprint, which is what makes sealing idempotently verifiable.
pub fn seal_payload(private_key_pem: &str, payload: &[u8]) -> Result<SealedPayload, AppError> {
    let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| AppError::Signing(format!("Invalid private key: {}", e)))?;

    let digest = Sha256::digest(payload);
    let signature = private_key
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|e| AppError::Signing(format!("Failed to sign payload: {}", e)))?;

    let fingerprint = hex_encode(&Sha256::digest(&signature));

    Ok(SealedPayload {
        signature,
        fingerprint,
    })
}

/// Lowercase hex encoding.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// hex(sha256(input)) - used for recipient hashing in note identifiers.
pub fn sha256_hex(input: &[u8]) -> String {
    hex_encode(&Sha256::digest(input))
}
