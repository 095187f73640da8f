//! Shared fixtures: in-memory signing network, scripted wallet and auth surface

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ed25519_dalek::VerifyingKey;
use serde_json::json;
use tokio::sync::RwLock;
use url::Url;

use pkp_orchestrator::crypto::{generate_keypair, sign_payload, verify_hex_signature};
use pkp_orchestrator::identity::AUTH_METHOD_ETH_WALLET;
use pkp_orchestrator::network::{ExecutionRequest, SessionRequest};
use pkp_orchestrator::{
    AuthCallback, AuthMethod, AuthSig, AuthStatement, AuthSurface, Error, Handshake, KeyPage,
    KeyRecord, NetworkContext, NetworkId, Result, SigningNetwork, SurfaceOutcome, WalletProvider,
    WalletSigner,
};

// ============================================================================
// Signing network
// ============================================================================

/// In-memory signing network that counts every call
pub struct MockNetwork {
    pub handshake: Handshake,
    keys: RwLock<HashMap<String, Vec<KeyRecord>>>,
    scripted_mints: Mutex<VecDeque<KeyRecord>>,
    next_id: AtomicU64,
    pub page_size: usize,
    pub mint_delay: Duration,
    pub fail_mint: AtomicBool,
    pub connects: AtomicUsize,
    pub mints: AtomicUsize,
    pub lists: AtomicUsize,
    pub sessions: AtomicUsize,
    pub executions: AtomicUsize,
    pub last_session: Mutex<Option<SessionRequest>>,
    pub last_mint: Mutex<Option<AuthMethod>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self {
            handshake: Handshake {
                connected_nodes: 3,
                min_node_count: 2,
                soft_errors: vec![],
                latest_blockhash: "0x5f3c9a".to_string(),
            },
            keys: RwLock::new(HashMap::new()),
            scripted_mints: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            page_size: 10,
            mint_delay: Duration::ZERO,
            fail_mint: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            mints: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
            sessions: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
            last_session: Mutex::new(None),
            last_mint: Mutex::new(None),
        }
    }

    pub fn with_handshake(mut self, handshake: Handshake) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn with_mint_delay(mut self, delay: Duration) -> Self {
        self.mint_delay = delay;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// The next mint returns exactly this record
    pub fn script_mint(&self, record: KeyRecord) {
        self.scripted_mints.lock().unwrap().push_back(record);
    }

    /// Bind a pre-existing key to an auth method
    pub async fn seed_key(&self, auth_method: &AuthMethod, record: KeyRecord) {
        self.keys
            .write()
            .await
            .entry(Self::method_key(auth_method))
            .or_default()
            .push(record);
    }

    fn method_key(auth_method: &AuthMethod) -> String {
        format!("{}:{}", auth_method.auth_method_type, auth_method.access_token)
    }

    /// Owner of a mint: a wallet mint carries a signed statement, and the keys
    /// it creates are listed by the signing address.
    fn mint_owner(auth_method: &AuthMethod) -> Result<String> {
        if auth_method.auth_method_type != AUTH_METHOD_ETH_WALLET {
            return Ok(Self::method_key(auth_method));
        }
        let auth_sig: AuthSig = serde_json::from_str(&auth_method.access_token)
            .map_err(|_| Error::MintFailed("wallet mint is not signed".to_string()))?;
        Ok(format!("{}:{}", AUTH_METHOD_ETH_WALLET, auth_sig.address))
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SigningNetwork for MockNetwork {
    async fn connect(&self, _network: NetworkId) -> Result<Handshake> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.handshake.clone())
    }

    async fn mint(&self, auth_method: &AuthMethod) -> Result<KeyRecord> {
        self.mints.fetch_add(1, Ordering::SeqCst);
        if !self.mint_delay.is_zero() {
            tokio::time::sleep(self.mint_delay).await;
        }
        if self.fail_mint.load(Ordering::SeqCst) {
            return Err(Error::MintFailed("relay rejected the mint".to_string()));
        }
        let owner = Self::mint_owner(auth_method)?;
        *self.last_mint.lock().unwrap() = Some(auth_method.clone());

        let scripted = self.scripted_mints.lock().unwrap().pop_front();
        let record = scripted.unwrap_or_else(|| {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            KeyRecord::Network {
                token_id: id.to_string(),
                public_key: format!("0x04{:064x}", id),
                eth_address: format!("0x{:040x}", id),
                minted_at: Utc::now(),
            }
        });

        self.keys
            .write()
            .await
            .entry(owner)
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn list_by_proof(
        &self,
        auth_method: &AuthMethod,
        cursor: Option<String>,
    ) -> Result<KeyPage> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let keys = self.keys.read().await;
        let all = keys
            .get(&Self::method_key(auth_method))
            .cloned()
            .unwrap_or_default();

        let start: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
        let end = (start + self.page_size).min(all.len());
        let next_cursor = (end < all.len()).then(|| end.to_string());
        Ok(KeyPage {
            records: all[start..end].to_vec(),
            next_cursor,
        })
    }

    async fn issue_session(&self, request: &SessionRequest) -> Result<serde_json::Value> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        for resource in &request.resources {
            if !request.auth_sig.signed_message.contains(resource.as_str()) {
                return Err(Error::AuthCallbackFailed(format!(
                    "statement does not list {}",
                    resource
                )));
            }
        }
        *self.last_session.lock().unwrap() = Some(request.clone());
        Ok(json!({
            "sessionId": uuid::Uuid::new_v4().to_string(),
            "sessionKey": request.session_key,
            "resources": request.resources,
        }))
    }

    async fn execute_code(&self, request: &ExecutionRequest) -> Result<serde_json::Value> {
        self.executions.fetch_add(1, Ordering::SeqCst);

        let key_bytes: [u8; 32] = hex::decode(&request.session_key)
            .unwrap()
            .try_into()
            .unwrap();
        let verifying_key = VerifyingKey::from_bytes(&key_bytes).unwrap();
        let payload = ExecutionRequest::signing_payload(
            &request.code_digest,
            &request.js_params,
            &request.expiration,
        );
        if verify_hex_signature(&verifying_key, &payload, &request.signature).is_err() {
            return Err(Error::RemoteExecution("invalid session signature".to_string()));
        }

        if request.code.contains("throw") {
            return Err(Error::RemoteExecution("Error: boom".to_string()));
        }
        Ok(json!({
            "success": true,
            "response": request.js_params,
            "logs": "",
        }))
    }
}

pub async fn connected(network: Arc<MockNetwork>) -> Arc<NetworkContext> {
    let ctx = Arc::new(NetworkContext::new(NetworkId::DatilDev, network));
    ctx.connect().await.unwrap();
    ctx
}

// ============================================================================
// Wallet
// ============================================================================

/// Wallet with a fixed address and a real signing key
#[derive(Clone)]
pub struct MockWallet {
    address: String,
    signing_key: Arc<ed25519_dalek::SigningKey>,
    pub reject: bool,
    /// Shared by every clone, so a connected session can start declining
    pub decline_signing: Arc<AtomicBool>,
}

impl MockWallet {
    pub fn new(address: &str) -> Self {
        let (signing_key, _) = generate_keypair();
        Self {
            address: address.to_string(),
            signing_key: Arc::new(signing_key),
            reject: false,
            decline_signing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    async fn request_accounts(&self) -> Result<Vec<String>> {
        if self.reject {
            return Err(Error::UserRejected("User denied account access".to_string()));
        }
        Ok(vec![self.address.clone()])
    }

    fn signer(&self, _address: &str) -> Result<Arc<dyn WalletSigner>> {
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl WalletSigner for MockWallet {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign_message(&self, message: &str) -> Result<String> {
        if self.reject || self.decline_signing.load(Ordering::SeqCst) {
            return Err(Error::UserRejected("User denied message signature".to_string()));
        }
        let signature = sign_payload(&self.signing_key, message.as_bytes());
        Ok(format!("0x{}", hex::encode(signature.to_bytes())))
    }

    async fn balance(&self) -> Result<u128> {
        Ok(0)
    }
}

/// Callback that never answers
pub struct StalledCallback;

#[async_trait]
impl AuthCallback for StalledCallback {
    fn address(&self) -> &str {
        "0xABCD"
    }

    async fn authorize(&self, _statement: &AuthStatement) -> Result<AuthSig> {
        std::future::pending().await
    }
}

// ============================================================================
// Auth surface
// ============================================================================

pub enum SurfaceScript {
    /// Redirect with the request's state plus these fragment params
    Redirect(String),
    /// Redirect with exactly these fragment params (no state echo)
    RawRedirect(String),
    Close,
    Hang,
}

pub struct ScriptedSurface {
    script: SurfaceScript,
    pub opens: AtomicUsize,
}

impl ScriptedSurface {
    pub fn new(script: SurfaceScript) -> Self {
        Self {
            script,
            opens: AtomicUsize::new(0),
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthSurface for ScriptedSurface {
    async fn open(&self, auth_url: &Url, redirect_target: &str) -> Result<SurfaceOutcome> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let state = auth_url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();

        match &self.script {
            SurfaceScript::Redirect(params) => {
                let url = format!("{}#state={}&{}", redirect_target, state, params);
                Ok(SurfaceOutcome::Redirected(Url::parse(&url).unwrap()))
            }
            SurfaceScript::RawRedirect(params) => {
                let url = format!("{}#{}", redirect_target, params);
                Ok(SurfaceOutcome::Redirected(Url::parse(&url).unwrap()))
            }
            SurfaceScript::Close => Ok(SurfaceOutcome::Closed),
            SurfaceScript::Hang => std::future::pending().await,
        }
    }
}

/// Unsigned-verification JWT with `exp` offset from now
pub fn id_token(exp_offset_secs: i64) -> String {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &json!({ "sub": "user-1", "exp": Utc::now().timestamp() + exp_offset_secs }),
        &jsonwebtoken::EncodingKey::from_secret(b"provider-secret"),
    )
    .unwrap()
}
