//! Identity proofs
//!
//! Every supported authentication path ends in one [`IdentityProof`]:
//!
//! - **Wallet**: the proof is a placeholder carrying the account address. The
//!   actual signature is produced lazily by the wallet signer when a session is
//!   issued, because a wallet signature is single-use and tied to one message.
//! - **OAuth**: the proof carries the provider's `id_token` and is persisted in
//!   the [`SessionStore`](crate::store::SessionStore) for reuse across restarts.
//!
//! The credential is secret. It is never logged or displayed in full; use
//! [`IdentityProof::redacted`] for anything user-visible.

pub mod oauth;
pub mod wallet;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use oauth::{
    AuthSurface, ConsoleSurface, OAuthAuthenticator, OAuthConfig, OAuthProvider, SignInState,
    SurfaceOutcome,
};
pub use wallet::{
    LocalWallet, WalletAuthenticator, WalletHandle, WalletProvider, WalletSession, WalletSigner,
};

/// Wire tag for wallet signature auth methods
pub const AUTH_METHOD_ETH_WALLET: u32 = 1;

/// Wire tag for Discord OAuth auth methods
pub const AUTH_METHOD_DISCORD: u32 = 4;

/// Wire tag for Google OAuth auth methods
pub const AUTH_METHOD_GOOGLE: u32 = 6;

/// Show at most the first few characters of a secret.
pub fn redact(secret: &str) -> String {
    const VISIBLE: usize = 6;
    if secret.chars().count() <= VISIBLE {
        return "***".to_string();
    }
    let prefix: String = secret.chars().take(VISIBLE).collect();
    format!("{}...", prefix)
}

/// How an identity proof was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "provider", rename_all = "snake_case")]
pub enum MethodKind {
    /// Browser or local wallet; signature derived on demand
    WalletSignature,
    /// OAuth identity token from the named provider
    OAuthIdToken(OAuthProvider),
}

impl MethodKind {
    /// Integer tag the relay and network use for this method
    pub fn auth_method_type(&self) -> u32 {
        match self {
            MethodKind::WalletSignature => AUTH_METHOD_ETH_WALLET,
            MethodKind::OAuthIdToken(OAuthProvider::Google) => AUTH_METHOD_GOOGLE,
            MethodKind::OAuthIdToken(OAuthProvider::Discord) => AUTH_METHOD_DISCORD,
        }
    }

    /// Whether proofs of this kind may be written to durable storage
    pub fn is_persistable(&self) -> bool {
        matches!(self, MethodKind::OAuthIdToken(_))
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodKind::WalletSignature => write!(f, "wallet"),
            MethodKind::OAuthIdToken(provider) => write!(f, "oauth:{}", provider),
        }
    }
}

/// Provider-agnostic evidence that a user has authenticated.
///
/// Immutable once created.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProof {
    credential: String,
    method_kind: MethodKind,
    captured_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl IdentityProof {
    /// Placeholder proof for a connected wallet account
    pub fn wallet(address: impl Into<String>) -> Self {
        Self {
            credential: address.into(),
            method_kind: MethodKind::WalletSignature,
            captured_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Proof backed by an OAuth identity token
    pub fn oauth(
        provider: OAuthProvider,
        id_token: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            credential: id_token.into(),
            method_kind: MethodKind::OAuthIdToken(provider),
            captured_at: Utc::now(),
            expires_at,
        }
    }

    /// The opaque credential. Secret: do not log.
    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn method_kind(&self) -> MethodKind {
        self.method_kind
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the underlying token is past its expiry
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| Utc::now() >= exp).unwrap_or(false)
    }

    /// Stable, non-secret identifier for this proof.
    ///
    /// Used to key in-flight mint guards and session caches.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method_kind.auth_method_type().to_be_bytes());
        hasher.update(self.credential.as_bytes());
        hex::encode(&hasher.finalize()[..16])
    }

    /// Redacted credential for display
    pub fn redacted(&self) -> String {
        redact(&self.credential)
    }

    /// Wire form sent to the relay and network
    pub fn to_auth_method(&self) -> AuthMethod {
        AuthMethod {
            auth_method_type: self.method_kind.auth_method_type(),
            access_token: self.credential.clone(),
        }
    }
}

impl fmt::Debug for IdentityProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityProof")
            .field("credential", &self.redacted())
            .field("method_kind", &self.method_kind)
            .field("captured_at", &self.captured_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Auth method as exchanged with the relay
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthMethod {
    pub auth_method_type: u32,
    pub access_token: String,
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthMethod")
            .field("auth_method_type", &self.auth_method_type)
            .field("access_token", &redact(&self.access_token))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_never_shows_full_secret() {
        assert_eq!(redact("abc"), "***");
        assert_eq!(redact("eyJhbGciOiJSUzI1NiJ9.payload"), "eyJhbG...");
    }

    #[test]
    fn test_debug_is_redacted() {
        let token = "eyJhbGciOiJSUzI1NiJ9.secret-payload.signature";
        let proof = IdentityProof::oauth(OAuthProvider::Google, token, None);
        let debug = format!("{:?}", proof);
        assert!(!debug.contains("secret-payload"));
        assert!(debug.contains("eyJhbG..."));
    }

    #[test]
    fn test_auth_method_types() {
        assert_eq!(IdentityProof::wallet("0xABCD").to_auth_method().auth_method_type, 1);
        let google = IdentityProof::oauth(OAuthProvider::Google, "tok", None);
        assert_eq!(google.to_auth_method().auth_method_type, 6);
        let discord = IdentityProof::oauth(OAuthProvider::Discord, "tok", None);
        assert_eq!(discord.to_auth_method().auth_method_type, 4);
    }

    #[test]
    fn test_fingerprint_is_stable_and_distinct() {
        let a = IdentityProof::wallet("0xABCD");
        let b = IdentityProof::wallet("0xABCD");
        let c = IdentityProof::wallet("0xEF01");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert!(!a.fingerprint().contains("ABCD"));
    }

    #[test]
    fn test_expiry() {
        let past = Utc::now() - chrono::Duration::minutes(1);
        let proof = IdentityProof::oauth(OAuthProvider::Google, "tok", Some(past));
        assert!(proof.is_expired());
        assert!(!IdentityProof::wallet("0xABCD").is_expired());
    }

    #[test]
    fn test_persistable_kinds() {
        assert!(!MethodKind::WalletSignature.is_persistable());
        assert!(MethodKind::OAuthIdToken(OAuthProvider::Google).is_persistable());
    }
}
