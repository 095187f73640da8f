//! Authorization statements
//!
//! The statement an identity owner signs to delegate a capability set to a
//! session key. Rendered in the sign-in-with-ethereum message layout.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::redact;

/// Derivation tag for signatures produced by a wallet
pub const DERIVED_VIA_WALLET: &str = "web3.eth.personal.sign";

/// Statement describing what a session may do and until when
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatement {
    pub domain: String,
    /// Address of the identity owner (wallet account or bound key)
    pub address: String,
    pub statement: String,
    /// `lit:session:<hex session public key>`
    pub uri: String,
    pub version: String,
    pub chain_id: u64,
    /// Latest block hash at issuance
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
    /// One `<kind>://<pattern>#<ability>` line per capability
    pub resources: Vec<String>,
}

impl AuthStatement {
    /// Session URI for a hex-encoded session public key
    pub fn session_uri(session_public_key: &str) -> String {
        format!("lit:session:{}", session_public_key)
    }

    /// The exact text the identity owner signs
    pub fn to_message(&self) -> String {
        let mut message = format!(
            "{} wants you to sign in with your Ethereum account:\n{}\n\n{}\n\n\
             URI: {}\nVersion: {}\nChain ID: {}\nNonce: {}\nIssued At: {}\nExpiration Time: {}",
            self.domain,
            self.address,
            self.statement,
            self.uri,
            self.version,
            self.chain_id,
            self.nonce,
            self.issued_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.expiration_time
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        );

        if !self.resources.is_empty() {
            message.push_str("\nResources:");
            for resource in &self.resources {
                message.push_str("\n- ");
                message.push_str(resource);
            }
        }
        message
    }
}

impl fmt::Display for AuthStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_message())
    }
}

/// A signed authorization statement
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSig {
    pub sig: String,
    pub derived_via: String,
    pub signed_message: String,
    pub address: String,
}

impl fmt::Debug for AuthSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSig")
            .field("sig", &redact(&self.sig))
            .field("derived_via", &self.derived_via)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
