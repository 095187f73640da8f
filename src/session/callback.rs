//! Authorization callbacks
//!
//! The issuer decides *what* must be signed; the callback decides *how*. A
//! wallet identity signs the statement with its live signer at this point. An
//! OAuth identity presents its stored proof instead.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identity::{IdentityProof, MethodKind, WalletSession, WalletSigner};
use crate::keys::SigningKey;

use super::statement::{AuthSig, AuthStatement, DERIVED_VIA_WALLET};

/// Produces a signed authorization statement on demand
#[async_trait]
pub trait AuthCallback: Send + Sync {
    /// Address the statement is issued for
    fn address(&self) -> &str;

    /// Sign exactly `statement`
    async fn authorize(&self, statement: &AuthStatement) -> Result<AuthSig>;
}

/// Signs statements with a connected wallet
pub struct WalletAuthCallback {
    signer: Arc<dyn WalletSigner>,
}

impl WalletAuthCallback {
    pub fn new(signer: Arc<dyn WalletSigner>) -> Self {
        Self { signer }
    }
}

impl From<&WalletSession> for WalletAuthCallback {
    fn from(session: &WalletSession) -> Self {
        Self::new(session.signer())
    }
}

#[async_trait]
impl AuthCallback for WalletAuthCallback {
    fn address(&self) -> &str {
        self.signer.address()
    }

    async fn authorize(&self, statement: &AuthStatement) -> Result<AuthSig> {
        let message = statement.to_message();
        debug!(address = %self.signer.address(), "Requesting wallet signature for session");
        let sig = self.signer.sign_message(&message).await?;

        Ok(AuthSig {
            sig,
            derived_via: DERIVED_VIA_WALLET.to_string(),
            signed_message: message,
            address: self.signer.address().to_string(),
        })
    }
}

/// Presents a stored OAuth proof on behalf of a bound key
pub struct OAuthAuthCallback {
    proof: IdentityProof,
    address: String,
}

impl OAuthAuthCallback {
    /// `key` is the signing key the session acts through; it must be bound to `proof`.
    pub fn new(proof: IdentityProof, key: &SigningKey) -> Result<Self> {
        if !proof.method_kind().is_persistable() {
            return Err(Error::AuthCallbackFailed(
                "Wallet identities sign with the wallet, not a stored proof".to_string(),
            ));
        }
        Ok(Self {
            proof,
            address: key.controlled_address.clone(),
        })
    }
}

#[async_trait]
impl AuthCallback for OAuthAuthCallback {
    fn address(&self) -> &str {
        &self.address
    }

    async fn authorize(&self, statement: &AuthStatement) -> Result<AuthSig> {
        if self.proof.is_expired() {
            return Err(Error::AuthCallbackFailed(
                "Stored identity token has expired; sign in again".to_string(),
            ));
        }

        let derived_via = match self.proof.method_kind() {
            MethodKind::OAuthIdToken(provider) => format!("oauth.{}", provider),
            MethodKind::WalletSignature => DERIVED_VIA_WALLET.to_string(),
        };

        Ok(AuthSig {
            sig: self.proof.credential().to_string(),
            derived_via,
            signed_message: statement.to_message(),
            address: self.address.clone(),
        })
    }
}
