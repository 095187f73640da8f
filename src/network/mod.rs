//! Signing network boundary
//!
//! [`SigningNetwork`] is everything the client needs from the remote network:
//! handshake, mint, lookup by auth method, session issuance and code execution.
//! [`NetworkContext`] owns one connection to it for the lifetime of a session
//! and is passed explicitly to every component that talks to the network.
//!
//! ## Connection epochs
//!
//! Every `disconnect` bumps the context's epoch. Session credentials record the
//! epoch they were issued under and are rejected once it changes, so a
//! credential never outlives the connection it was issued for.

pub mod http;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identity::AuthMethod;
use crate::session::AuthSig;

pub use http::HttpNetwork;

// =============================================================================
// Configuration
// =============================================================================

/// Networks the client can connect to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkId {
    #[default]
    DatilDev,
    DatilTest,
    Datil,
}

impl NetworkId {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkId::DatilDev => "datil-dev",
            NetworkId::DatilTest => "datil-test",
            NetworkId::Datil => "datil",
        }
    }

    /// Relay used for minting and key lookup on this network
    pub fn default_relay_url(&self) -> &'static str {
        match self {
            NetworkId::DatilDev => "https://datil-dev-relayer.getlit.dev",
            NetworkId::DatilTest => "https://datil-test-relayer.getlit.dev",
            NetworkId::Datil => "https://datil-relayer.getlit.dev",
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "datil-dev" => Ok(NetworkId::DatilDev),
            "datil-test" => Ok(NetworkId::DatilTest),
            "datil" => Ok(NetworkId::Datil),
            other => Err(Error::Config(format!(
                "Unknown network '{}' (expected datil-dev, datil-test or datil)",
                other
            ))),
        }
    }
}

/// Network client configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub network: NetworkId,
    /// Base URL of the network gateway
    pub network_url: String,
    /// Base URL of the minting relay
    pub relay_url: String,
    /// API key sent to the relay
    pub relay_api_key: Option<String>,
    pub request_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let network = NetworkId::default();
        Self {
            network,
            network_url: "http://127.0.0.1:7470".to_string(),
            relay_url: network.default_relay_url().to_string(),
            relay_api_key: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

/// Result of connecting to the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub connected_nodes: u32,
    pub min_node_count: u32,
    /// Non-fatal errors reported by individual nodes
    #[serde(default)]
    pub soft_errors: Vec<String>,
    /// Latest block hash, used as the statement nonce
    pub latest_blockhash: String,
}

impl Handshake {
    pub fn has_quorum(&self) -> bool {
        self.min_node_count > 0 && self.connected_nodes >= self.min_node_count
    }
}

/// A signing key as reported by the network or the relay.
///
/// The two sources describe keys in different shapes; both convert into
/// [`SigningKey`](crate::keys::SigningKey).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum KeyRecord {
    /// Minted directly on the network
    Network {
        token_id: String,
        public_key: String,
        eth_address: String,
        #[serde(default)]
        minted_at: DateTime<Utc>,
    },
    /// Minted through the relay
    Relay {
        token_id: String,
        public_key: String,
        eth_address: String,
        #[serde(default)]
        btc_address: Option<String>,
        #[serde(default)]
        cosmos_address: Option<String>,
        #[serde(default)]
        is_new: bool,
        #[serde(default)]
        minted_at: DateTime<Utc>,
    },
}

impl KeyRecord {
    pub fn token_id(&self) -> &str {
        match self {
            KeyRecord::Network { token_id, .. } | KeyRecord::Relay { token_id, .. } => token_id,
        }
    }

    pub fn minted_at(&self) -> DateTime<Utc> {
        match self {
            KeyRecord::Network { minted_at, .. } | KeyRecord::Relay { minted_at, .. } => *minted_at,
        }
    }
}

/// One page of keys bound to an auth method
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPage {
    pub records: Vec<KeyRecord>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Request to turn a signed statement into a network session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub auth_sig: AuthSig,
    /// Hex-encoded session public key the statement delegates to
    pub session_key: String,
    /// Resource lines exactly as they appear in the statement
    pub resources: Vec<String>,
    pub expiration: DateTime<Utc>,
}

/// Code execution request, signed with the session key
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// Session object returned by `issue_session`
    pub session: serde_json::Value,
    /// Base64 of the signed authorization statement the session came from
    pub auth_sig: String,
    pub code: String,
    pub js_params: serde_json::Value,
    /// Hex SHA-256 of `code`
    pub code_digest: String,
    pub expiration: DateTime<Utc>,
    pub session_key: String,
    /// Hex signature over [`ExecutionRequest::signing_payload`]
    pub signature: String,
}

impl ExecutionRequest {
    /// Bytes covered by the session key signature
    pub fn signing_payload(
        code_digest: &str,
        js_params: &serde_json::Value,
        expiration: &DateTime<Utc>,
    ) -> Vec<u8> {
        format!("{}\n{}\n{}", code_digest, js_params, expiration.to_rfc3339()).into_bytes()
    }
}

impl fmt::Debug for ExecutionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionRequest")
            .field("code_digest", &self.code_digest)
            .field("expiration", &self.expiration)
            .field("session_key", &self.session_key)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Network Boundary
// =============================================================================

/// Remote signing network operations
#[async_trait]
pub trait SigningNetwork: Send + Sync {
    async fn connect(&self, network: NetworkId) -> Result<Handshake>;

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Mint a new key bound to `auth_method`. Costs a fee; never retried.
    async fn mint(&self, auth_method: &AuthMethod) -> Result<KeyRecord>;

    /// One page of keys bound to `auth_method`, starting at `cursor`
    async fn list_by_proof(
        &self,
        auth_method: &AuthMethod,
        cursor: Option<String>,
    ) -> Result<KeyPage>;

    /// Turn a signed statement into a session object
    async fn issue_session(&self, request: &SessionRequest) -> Result<serde_json::Value>;

    /// Run code under a session. Single request/response.
    async fn execute_code(&self, request: &ExecutionRequest) -> Result<serde_json::Value>;
}

// =============================================================================
// Network Context
// =============================================================================

#[derive(Debug, Clone)]
struct Connection {
    handshake: Handshake,
    connected_at: DateTime<Utc>,
}

/// Owned connection to one signing network.
///
/// Created once per session and threaded through [`KeyBinder`](crate::keys::KeyBinder),
/// [`SessionIssuer`](crate::session::SessionIssuer) and
/// [`ActionExecutor`](crate::action::ActionExecutor).
pub struct NetworkContext {
    network: NetworkId,
    client: Arc<dyn SigningNetwork>,
    connection: RwLock<Option<Connection>>,
    epoch: AtomicU64,
}

impl NetworkContext {
    pub fn new(network: NetworkId, client: Arc<dyn SigningNetwork>) -> Self {
        Self {
            network,
            client,
            connection: RwLock::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn network(&self) -> NetworkId {
        self.network
    }

    /// Current connection epoch
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Connect, or reuse the existing connection.
    ///
    /// Soft errors are tolerated with a warning as long as the node quorum is
    /// reached. Below quorum the context stays disconnected.
    pub async fn connect(&self) -> Result<Handshake> {
        {
            let connection = self.connection.read().await;
            if let Some(conn) = connection.as_ref() {
                debug!(network = %self.network, "Reusing network connection");
                return Ok(conn.handshake.clone());
            }
        }

        let mut connection = self.connection.write().await;
        if let Some(conn) = connection.as_ref() {
            return Ok(conn.handshake.clone());
        }

        info!(network = %self.network, "Connecting to signing network");
        let handshake = self.client.connect(self.network).await.map_err(|e| match e {
            err @ Error::NetworkUnreachable(_) => err,
            other => Error::NetworkUnreachable(other.to_string()),
        })?;

        if !handshake.has_quorum() {
            return Err(Error::NetworkUnreachable(format!(
                "Only {} of {} required nodes connected",
                handshake.connected_nodes, handshake.min_node_count
            )));
        }

        for soft_error in &handshake.soft_errors {
            warn!(network = %self.network, "Handshake reported: {}", soft_error);
        }

        info!(
            network = %self.network,
            nodes = handshake.connected_nodes,
            epoch = self.epoch(),
            "Connected to signing network"
        );
        *connection = Some(Connection {
            handshake: handshake.clone(),
            connected_at: Utc::now(),
        });
        Ok(handshake)
    }

    /// Tear down the connection. Credentials issued under it become invalid.
    pub async fn disconnect(&self) {
        let mut connection = self.connection.write().await;
        let Some(conn) = connection.take() else {
            return;
        };

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if let Err(e) = self.client.disconnect().await {
            warn!(network = %self.network, "Disconnect reported an error: {}", e);
        }
        info!(
            network = %self.network,
            epoch,
            connected_for = %(Utc::now() - conn.connected_at),
            "Disconnected from signing network"
        );
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.read().await.is_some()
    }

    /// Whether a credential issued under `epoch` is still bound to a live connection
    pub async fn is_current(&self, epoch: u64) -> bool {
        self.is_connected().await && self.epoch() == epoch
    }

    /// Handshake of the live connection
    pub async fn handshake(&self) -> Result<Handshake> {
        self.connection
            .read()
            .await
            .as_ref()
            .map(|conn| conn.handshake.clone())
            .ok_or(Error::NotConnected)
    }

    /// Network client, available only while connected
    pub async fn client(&self) -> Result<Arc<dyn SigningNetwork>> {
        if self.is_connected().await {
            Ok(Arc::clone(&self.client))
        } else {
            Err(Error::NotConnected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct HandshakeOnly {
        handshake: Handshake,
        connects: AtomicUsize,
    }

    impl HandshakeOnly {
        fn new(connected_nodes: u32, soft_errors: Vec<String>) -> Self {
            Self {
                handshake: Handshake {
                    connected_nodes,
                    min_node_count: 2,
                    soft_errors,
                    latest_blockhash: "0xblock".into(),
                },
                connects: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SigningNetwork for HandshakeOnly {
        async fn connect(&self, _network: NetworkId) -> Result<Handshake> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(self.handshake.clone())
        }

        async fn mint(&self, _auth_method: &AuthMethod) -> Result<KeyRecord> {
            Err(Error::MintFailed("unsupported".into()))
        }

        async fn list_by_proof(&self, _: &AuthMethod, _: Option<String>) -> Result<KeyPage> {
            Ok(KeyPage::default())
        }

        async fn issue_session(&self, _request: &SessionRequest) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        async fn execute_code(&self, _request: &ExecutionRequest) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    #[tokio::test]
    async fn test_soft_errors_with_quorum_connect() {
        let client = Arc::new(HandshakeOnly::new(3, vec!["node 4 timed out".into()]));
        let ctx = NetworkContext::new(NetworkId::DatilDev, client.clone());

        let handshake = ctx.connect().await.unwrap();
        assert_eq!(handshake.soft_errors.len(), 1);
        assert!(ctx.is_connected().await);

        ctx.connect().await.unwrap();
        assert_eq!(client.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_below_quorum_fails_closed() {
        let ctx = NetworkContext::new(NetworkId::DatilDev, Arc::new(HandshakeOnly::new(1, vec![])));
        assert!(matches!(ctx.connect().await, Err(Error::NetworkUnreachable(_))));
        assert!(!ctx.is_connected().await);
        assert!(matches!(ctx.client().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_bumps_epoch() {
        let ctx = NetworkContext::new(NetworkId::Datil, Arc::new(HandshakeOnly::new(2, vec![])));
        ctx.connect().await.unwrap();
        let epoch = ctx.epoch();
        assert!(ctx.is_current(epoch).await);

        ctx.disconnect().await;
        assert!(!ctx.is_current(epoch).await);

        ctx.connect().await.unwrap();
        assert!(!ctx.is_current(epoch).await);
        assert!(ctx.is_current(ctx.epoch()).await);
    }

    #[test]
    fn test_network_id_parse() {
        assert_eq!("datil-test".parse::<NetworkId>().unwrap(), NetworkId::DatilTest);
        assert!("mainnet".parse::<NetworkId>().is_err());
        assert_eq!(NetworkId::default().to_string(), "datil-dev");
    }

    #[test]
    fn test_key_record_tagging() {
        let json = r#"{"source":"relay","token_id":"7","public_key":"0x04aa","eth_address":"0xEF01","is_new":true}"#;
        let record: KeyRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.token_id(), "7");
        assert!(matches!(record, KeyRecord::Relay { is_new: true, .. }));
    }
}
