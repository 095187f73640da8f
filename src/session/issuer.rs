//! Session issuance
//!
//! Derives a short-lived, capability-scoped [`SessionCredential`] from a
//! long-lived identity:
//!
//! 1. Connect to the signing network, or reuse the live connection
//! 2. Generate a fresh session key
//! 3. Build the authorization statement (endpoint, expiry, exact capability set)
//! 4. Have the identity owner sign it through an [`AuthCallback`], bounded by a timeout
//! 5. Exchange the signed statement for a network session
//!
//! Expiry is kept in minutes. A leaked credential grants its whole capability
//! set until it expires.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::capability::CapabilitySet;
use crate::crypto::generate_random_bytes;
use crate::error::{Error, Result};
use crate::network::{NetworkContext, SessionRequest};

use super::callback::AuthCallback;
use super::credential::{SessionCredential, SessionKey};
use super::statement::AuthStatement;

/// Session issuance settings
#[derive(Debug, Clone)]
pub struct IssuerConfig {
    /// Lifetime used when the caller does not ask for one
    pub default_ttl: Duration,
    /// Longer requests are clamped to this
    pub max_ttl: Duration,
    /// How long the authorization callback may take
    pub callback_timeout: Duration,
    /// Domain named in the statement
    pub domain: String,
    /// Human-readable statement text
    pub statement: String,
    pub chain_id: u64,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(600),
            max_ttl: Duration::from_secs(1800),
            callback_timeout: Duration::from_secs(120),
            domain: "localhost".to_string(),
            statement: "Authorize a session for the listed resources.".to_string(),
            chain_id: 1,
        }
    }
}

/// Issues session credentials against one network context
pub struct SessionIssuer {
    ctx: Arc<NetworkContext>,
    config: IssuerConfig,
}

impl SessionIssuer {
    pub fn new(ctx: Arc<NetworkContext>, config: IssuerConfig) -> Self {
        Self { ctx, config }
    }

    pub fn config(&self) -> &IssuerConfig {
        &self.config
    }

    fn effective_ttl(&self, requested: Option<Duration>) -> Result<Duration> {
        let ttl = requested.unwrap_or(self.config.default_ttl);
        if ttl.is_zero() {
            return Err(Error::MalformedInput(
                "Session lifetime must be positive".to_string(),
            ));
        }
        if ttl > self.config.max_ttl {
            warn!(
                requested_secs = ttl.as_secs(),
                max_secs = self.config.max_ttl.as_secs(),
                "Clamping session lifetime to the maximum"
            );
            return Ok(self.config.max_ttl);
        }
        Ok(ttl)
    }

    /// Issue a credential for exactly `capabilities`.
    ///
    /// `ttl` of `None` uses the configured default.
    pub async fn issue(
        &self,
        callback: &dyn AuthCallback,
        capabilities: &CapabilitySet,
        ttl: Option<Duration>,
    ) -> Result<SessionCredential> {
        if capabilities.is_empty() {
            return Err(Error::MalformedInput(
                "A session needs at least one capability".to_string(),
            ));
        }
        let ttl = self.effective_ttl(ttl)?;

        let handshake = self.ctx.connect().await?;
        let epoch = self.ctx.epoch();

        let session_key = SessionKey::from_seed(Zeroizing::new(generate_random_bytes()));
        let issued_at = Utc::now();
        let expires_at = issued_at
            + chrono::Duration::from_std(ttl)
                .map_err(|e| Error::Config(format!("Session lifetime out of range: {}", e)))?;

        let statement = AuthStatement {
            domain: self.config.domain.clone(),
            address: callback.address().to_string(),
            statement: self.config.statement.clone(),
            uri: AuthStatement::session_uri(session_key.public_key()),
            version: "1".to_string(),
            chain_id: self.config.chain_id,
            nonce: handshake.latest_blockhash,
            issued_at,
            expiration_time: expires_at,
            resources: capabilities.resource_lines(),
        };

        debug!(
            address = %statement.address,
            capabilities = capabilities.len(),
            expires_at = %expires_at,
            "Requesting statement authorization"
        );
        let auth_sig = tokio::time::timeout(self.config.callback_timeout, callback.authorize(&statement))
            .await
            .map_err(|_| {
                Error::AuthCallbackFailed(format!(
                    "No signature within {}s",
                    self.config.callback_timeout.as_secs()
                ))
            })?
            .map_err(|e| match e {
                err @ Error::AuthCallbackFailed(_) => err,
                other => Error::AuthCallbackFailed(other.to_string()),
            })?;

        if auth_sig.signed_message != statement.to_message() {
            return Err(Error::AuthCallbackFailed(
                "Callback signed a different statement".to_string(),
            ));
        }

        let request = SessionRequest {
            auth_sig,
            session_key: session_key.public_key().to_string(),
            resources: statement.resources.clone(),
            expiration: expires_at,
        };

        let client = self.ctx.client().await?;
        let session = client.issue_session(&request).await.map_err(|e| match e {
            err @ (Error::NetworkUnreachable(_) | Error::AuthCallbackFailed(_) | Error::NotConnected) => err,
            other => Error::AuthCallbackFailed(other.to_string()),
        })?;

        if self.ctx.epoch() != epoch {
            warn!("Connection changed while the session was being issued");
            return Err(Error::SessionRevoked);
        }

        let signed_statement = serde_json::to_vec(&request.auth_sig)?;
        info!(
            network = %self.ctx.network(),
            address = %statement.address,
            session_key = %session_key.public_key(),
            ttl_secs = ttl.as_secs(),
            "Issued session credential"
        );

        Ok(SessionCredential::new(
            signed_statement,
            issued_at,
            expires_at,
            capabilities.clone(),
            self.ctx.network(),
            epoch,
            session_key,
            session,
        ))
    }

    /// Reuse `existing` when it is still live and was issued for exactly
    /// `capabilities`; otherwise issue a new credential.
    pub async fn ensure(
        &self,
        existing: Option<&SessionCredential>,
        callback: &dyn AuthCallback,
        capabilities: &CapabilitySet,
        ttl: Option<Duration>,
    ) -> Result<SessionCredential> {
        if let Some(credential) = existing {
            let reason = if credential.is_expired() {
                Some("expired")
            } else if !self.ctx.is_current(credential.epoch()).await {
                Some("connection changed")
            } else if credential.granted() != capabilities {
                Some("capability set changed")
            } else {
                None
            };

            match reason {
                None => {
                    debug!(remaining = %credential.remaining(), "Reusing session credential");
                    return Ok(credential.clone());
                }
                Some(reason) => info!(reason, "Re-issuing session credential"),
            }
        }

        self.issue(callback, capabilities, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_clamped_and_validated() {
        let ctx = Arc::new(NetworkContext::new(
            Default::default(),
            Arc::new(crate::network::HttpNetwork::new(Default::default()).unwrap()),
        ));
        let issuer = SessionIssuer::new(ctx, IssuerConfig::default());

        assert_eq!(issuer.effective_ttl(None).unwrap(), Duration::from_secs(600));
        assert_eq!(
            issuer.effective_ttl(Some(Duration::from_secs(86_400))).unwrap(),
            Duration::from_secs(1800)
        );
        assert_eq!(
            issuer.effective_ttl(Some(Duration::from_secs(60))).unwrap(),
            Duration::from_secs(60)
        );
        assert!(issuer.effective_ttl(Some(Duration::ZERO)).is_err());
    }
}
