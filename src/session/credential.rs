//! Session credentials
//!
//! Short-lived, capability-scoped and secret. Never persisted. A credential is
//! invalid once it expires or once the connection it was issued under is torn
//! down.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use zeroize::Zeroizing;

use crate::capability::CapabilitySet;
use crate::crypto::{sign_payload, PRIVATE_KEY_LEN};
use crate::network::NetworkId;

/// Ed25519 session key. The seed is wiped on drop.
#[derive(Clone)]
pub struct SessionKey {
    seed: Zeroizing<[u8; PRIVATE_KEY_LEN]>,
    public_key: String,
}

impl SessionKey {
    pub(crate) fn from_seed(seed: Zeroizing<[u8; PRIVATE_KEY_LEN]>) -> Self {
        let public_key = hex::encode(SigningKey::from_bytes(&seed).verifying_key().as_bytes());
        Self { seed, public_key }
    }

    /// Hex-encoded public key
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Hex-encoded signature over `payload`
    pub fn sign(&self, payload: &[u8]) -> String {
        let key = SigningKey::from_bytes(&self.seed);
        hex::encode(sign_payload(&key, payload).to_bytes())
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Credential derived from a signed authorization statement
#[derive(Clone)]
pub struct SessionCredential {
    signed_statement: Vec<u8>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    granted: CapabilitySet,
    network: NetworkId,
    epoch: u64,
    session_key: SessionKey,
    session: serde_json::Value,
}

impl SessionCredential {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        signed_statement: Vec<u8>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        granted: CapabilitySet,
        network: NetworkId,
        epoch: u64,
        session_key: SessionKey,
        session: serde_json::Value,
    ) -> Self {
        Self {
            signed_statement,
            issued_at,
            expires_at,
            granted,
            network,
            epoch,
            session_key,
            session,
        }
    }

    /// Serialized signed statement. Secret.
    pub fn signed_statement(&self) -> &[u8] {
        &self.signed_statement
    }

    pub fn signed_statement_base64(&self) -> String {
        BASE64.encode(&self.signed_statement)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn granted(&self) -> &CapabilitySet {
        &self.granted
    }

    pub fn network(&self) -> NetworkId {
        self.network
    }

    /// Connection epoch this credential is bound to
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    /// Session object returned by the network
    pub fn session(&self) -> &serde_json::Value {
        &self.session
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self) -> chrono::Duration {
        (self.expires_at - Utc::now()).max(chrono::Duration::zero())
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("expires_at", &self.expires_at)
            .field("granted", &self.granted)
            .field("network", &self.network)
            .field("epoch", &self.epoch)
            .field("session_key", &self.session_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityRequest, ResourceKind};
    use crate::crypto::{generate_random_bytes, verify_hex_signature};
    use ed25519_dalek::VerifyingKey;

    fn session_key() -> SessionKey {
        SessionKey::from_seed(Zeroizing::new(generate_random_bytes()))
    }

    #[test]
    fn test_session_key_signature_verifies() {
        let key = session_key();
        let bytes: [u8; 32] = hex::decode(key.public_key()).unwrap().try_into().unwrap();
        let verifying_key = VerifyingKey::from_bytes(&bytes).unwrap();

        let signature = key.sign(b"payload");
        assert!(verify_hex_signature(&verifying_key, b"payload", &signature).is_ok());
    }

    #[test]
    fn test_expiry_and_debug() {
        let now = Utc::now();
        let credential = SessionCredential::new(
            b"{\"sig\":\"0xsecretsig\"}".to_vec(),
            now - chrono::Duration::minutes(11),
            now - chrono::Duration::minutes(1),
            CapabilitySet::new().with(CapabilityRequest::wildcard(ResourceKind::ActionExecution)),
            NetworkId::DatilDev,
            0,
            session_key(),
            serde_json::json!({ "token": "opaque" }),
        );

        assert!(credential.is_expired());
        assert_eq!(credential.remaining(), chrono::Duration::zero());

        let debug = format!("{:?}", credential);
        assert!(!debug.contains("secretsig"));
        assert!(!debug.contains("opaque"));
    }
}
