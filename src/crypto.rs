//! Cryptographic primitives
//!
//! # Algorithms
//!
//! - **Session keys**: Ed25519, generated fresh for every session credential
//! - **Local wallet keys**: Ed25519, loaded from a hex key file
//! - **Digests**: SHA-256 for code digests, proof fingerprints and addresses

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

// =============================================================================
// Constants
// =============================================================================

/// Ed25519 private key length (32 bytes)
pub const PRIVATE_KEY_LEN: usize = 32;

/// Ed25519 signature length (64 bytes)
pub const SIGNATURE_LEN: usize = 64;

/// Address length in bytes (20, rendered as 0x-prefixed hex)
pub const ADDRESS_LEN: usize = 20;

// =============================================================================
// Key Generation
// =============================================================================

/// Generate a new Ed25519 signing keypair from the OS random number generator.
pub fn generate_keypair() -> (SigningKey, VerifyingKey) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();
    (signing_key, verifying_key)
}

/// Generate cryptographically secure random bytes.
pub fn generate_random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

// =============================================================================
// Signing
// =============================================================================

/// Sign a payload with an Ed25519 key.
pub fn sign_payload(signing_key: &SigningKey, payload: &[u8]) -> Signature {
    signing_key.sign(payload)
}

/// Verify a hex-encoded (optionally 0x-prefixed) signature over a payload.
pub fn verify_hex_signature(
    verifying_key: &VerifyingKey,
    payload: &[u8],
    signature_hex: &str,
) -> Result<()> {
    let bytes = hex::decode(signature_hex.trim_start_matches("0x"))
        .map_err(|e| Error::MalformedInput(format!("Invalid signature encoding: {e}")))?;
    let bytes: [u8; SIGNATURE_LEN] = bytes.try_into().map_err(|_| {
        Error::MalformedInput("Invalid signature length".to_string())
    })?;
    verifying_key
        .verify(payload, &Signature::from_bytes(&bytes))
        .map_err(|e| Error::MalformedInput(format!("Signature does not verify: {e}")))
}

// =============================================================================
// Digests
// =============================================================================

/// Hex-encoded SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Derive a 0x-prefixed account address from an Ed25519 public key.
pub fn derive_address(verifying_key: &VerifyingKey) -> String {
    let digest = Sha256::digest(verifying_key.as_bytes());
    format!("0x{}", hex::encode(&digest[..ADDRESS_LEN]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify_hex() {
        let (signing_key, verifying_key) = generate_keypair();
        let payload = b"authorize session";
        let signature = sign_payload(&signing_key, payload);
        let encoded = format!("0x{}", hex::encode(signature.to_bytes()));

        assert!(verify_hex_signature(&verifying_key, payload, &encoded).is_ok());
        assert!(verify_hex_signature(&verifying_key, b"other", &encoded).is_err());
    }

    #[test]
    fn test_bad_signature_encoding() {
        let (_, verifying_key) = generate_keypair();
        assert!(verify_hex_signature(&verifying_key, b"x", "0xzz").is_err());
        assert!(verify_hex_signature(&verifying_key, b"x", "0xabcd").is_err());
    }

    #[test]
    fn test_address_shape() {
        let (_, verifying_key) = generate_keypair();
        let address = derive_address(&verifying_key);
        assert!(address.starts_with("0x"));
        assert_eq!(address.len(), 2 + ADDRESS_LEN * 2);
    }

    #[test]
    fn test_random_bytes_differ() {
        let a: [u8; 16] = generate_random_bytes();
        let b: [u8; 16] = generate_random_bytes();
        assert_ne!(a, b);
    }
}
