//! Key binding
//!
//! [`KeyBinder`] mints new signing keys bound to an identity proof and lists the
//! keys already bound to one.
//!
//! ## Concurrency
//!
//! Per identity proof:
//!
//! - at most one mint is in flight; a second mint is rejected with
//!   [`Error::MintInProgress`], never queued or run in parallel
//! - listings wait for an in-flight mint to finish, and may overlap each other
//! - the refresh after a mint runs strictly after the mint's acknowledgment
//!
//! Mints are never retried. A failed mint surfaces as [`Error::MintFailed`] and
//! the caller decides whether to try again.
//!
//! ## Mint authorization
//!
//! An OAuth proof is presented as is. A wallet identity has no reusable
//! credential, so every mint asks the wallet to sign a short-lived statement and
//! sends the signed statement as the auth method's token. The address alone is
//! only ever used to look keys up.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, DashSet};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::identity::{
    AuthMethod, IdentityProof, MethodKind, WalletSession, AUTH_METHOD_ETH_WALLET,
};
use crate::network::{KeyRecord, NetworkContext, SigningNetwork};
use crate::session::{AuthCallback, AuthStatement, WalletAuthCallback};

/// Statement a wallet signs to authorize one mint
pub const MINT_STATEMENT: &str = "Authorize minting a signing key bound to this account.";

/// How long a signed mint authorization stays valid
const MINT_AUTH_TTL_MINUTES: i64 = 5;

// =============================================================================
// Signing Keys
// =============================================================================

/// Cached view of a network-held signing key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningKey {
    pub id: String,
    pub public_key: String,
    pub controlled_address: String,
    /// Fingerprints of the identity proofs this key is known to be bound to
    #[serde(default)]
    pub bound_methods: BTreeSet<String>,
    #[serde(default)]
    pub minted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub btc_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cosmos_address: Option<String>,
}

impl SigningKey {
    fn bound_to(mut self, proof: &IdentityProof) -> Self {
        self.bound_methods.insert(proof.fingerprint());
        self
    }
}

impl From<KeyRecord> for SigningKey {
    fn from(record: KeyRecord) -> Self {
        match record {
            KeyRecord::Network {
                token_id,
                public_key,
                eth_address,
                minted_at,
            } => Self {
                id: token_id,
                public_key,
                controlled_address: eth_address,
                bound_methods: BTreeSet::new(),
                minted_at,
                btc_address: None,
                cosmos_address: None,
            },
            KeyRecord::Relay {
                token_id,
                public_key,
                eth_address,
                btc_address,
                cosmos_address,
                minted_at,
                ..
            } => Self {
                id: token_id,
                public_key,
                controlled_address: eth_address,
                bound_methods: BTreeSet::new(),
                minted_at,
                btc_address,
                cosmos_address,
            },
        }
    }
}

/// Lazy, finite sequence of keys bound to one proof.
///
/// Pages are fetched as the stream is polled. Consuming it is the only way to
/// read it; list again for a fresh view.
pub type BoundKeys = BoxStream<'static, Result<SigningKey>>;

/// Identity a new key is bound to
#[derive(Debug, Clone, Copy)]
pub enum KeyOwner<'a> {
    /// Stored OAuth proof, presented as is
    Proof(&'a IdentityProof),
    /// Connected wallet; each mint is authorized by a fresh signature
    Wallet(&'a WalletSession),
}

impl<'a> KeyOwner<'a> {
    pub fn proof(&self) -> &'a IdentityProof {
        match self {
            KeyOwner::Proof(proof) => proof,
            KeyOwner::Wallet(session) => session.proof(),
        }
    }
}

impl<'a> From<&'a IdentityProof> for KeyOwner<'a> {
    fn from(proof: &'a IdentityProof) -> Self {
        KeyOwner::Proof(proof)
    }
}

impl<'a> From<&'a WalletSession> for KeyOwner<'a> {
    fn from(session: &'a WalletSession) -> Self {
        KeyOwner::Wallet(session)
    }
}

fn mint_statement(address: &str, nonce: String) -> AuthStatement {
    let issued_at = Utc::now();
    AuthStatement {
        domain: "localhost".to_string(),
        address: address.to_string(),
        statement: MINT_STATEMENT.to_string(),
        uri: format!("lit:mint:{}", address),
        version: "1".to_string(),
        chain_id: 1,
        nonce,
        issued_at,
        expiration_time: issued_at + Duration::minutes(MINT_AUTH_TTL_MINUTES),
        resources: Vec::new(),
    }
}

// =============================================================================
// Key Binder
// =============================================================================

/// Removes the in-flight marker when a mint finishes, however it finishes.
struct MintInFlight<'a> {
    minting: &'a DashSet<String>,
    fingerprint: String,
}

impl Drop for MintInFlight<'_> {
    fn drop(&mut self) {
        self.minting.remove(&self.fingerprint);
    }
}

type Gates = DashMap<String, Arc<RwLock<()>>>;

/// Per-proof lock shared by mints and listings. The map entry is dropped with
/// the last handle.
struct Gate {
    gates: Arc<Gates>,
    fingerprint: String,
    lock: Arc<RwLock<()>>,
}

impl Drop for Gate {
    fn drop(&mut self) {
        // Two owners left: the map and this handle
        self.gates
            .remove_if(&self.fingerprint, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

struct ListState {
    client: Arc<dyn SigningNetwork>,
    auth_method: AuthMethod,
    proof: IdentityProof,
    gate: Option<Gate>,
    buffer: VecDeque<SigningKey>,
    cursor: Option<String>,
    exhausted: bool,
}

/// Mints and looks up keys bound to identity proofs
pub struct KeyBinder {
    ctx: Arc<NetworkContext>,
    minting: DashSet<String>,
    gates: Arc<Gates>,
}

impl KeyBinder {
    pub fn new(ctx: Arc<NetworkContext>) -> Self {
        Self {
            ctx,
            minting: DashSet::new(),
            gates: Arc::new(DashMap::new()),
        }
    }

    fn gate(&self, fingerprint: &str) -> Gate {
        let lock = self
            .gates
            .entry(fingerprint.to_string())
            .or_default()
            .value()
            .clone();
        Gate {
            gates: Arc::clone(&self.gates),
            fingerprint: fingerprint.to_string(),
            lock,
        }
    }

    /// Number of identities with a mint or listing still holding the gate
    pub fn active_gates(&self) -> usize {
        self.gates.len()
    }

    fn begin_mint(&self, fingerprint: &str) -> Result<MintInFlight<'_>> {
        if !self.minting.insert(fingerprint.to_string()) {
            warn!(proof = %fingerprint, "Mint already in flight for this identity");
            return Err(Error::MintInProgress);
        }
        Ok(MintInFlight {
            minting: &self.minting,
            fingerprint: fingerprint.to_string(),
        })
    }

    /// Whether a mint is currently in flight for `proof`
    pub fn is_minting(&self, proof: &IdentityProof) -> bool {
        self.minting.contains(&proof.fingerprint())
    }

    /// Mint a new key bound to `owner`.
    ///
    /// Wallet identities must be passed as their [`WalletSession`]; a bare wallet
    /// proof carries no signature and is refused before anything is sent.
    pub async fn mint<'a>(&self, owner: impl Into<KeyOwner<'a>>) -> Result<SigningKey> {
        let owner = owner.into();
        let fingerprint = owner.proof().fingerprint();
        let _in_flight = self.begin_mint(&fingerprint)?;
        let gate = self.gate(&fingerprint);
        let _write = gate.lock.write().await;
        self.mint_locked(owner, &fingerprint).await
    }

    /// Mint a new key, then list the owner's keys once the mint is acknowledged.
    ///
    /// No listing for the same proof can interleave between the two steps.
    pub async fn mint_and_refresh<'a>(
        &self,
        owner: impl Into<KeyOwner<'a>>,
    ) -> Result<(SigningKey, Vec<SigningKey>)> {
        let owner = owner.into();
        let proof = owner.proof();
        let fingerprint = proof.fingerprint();
        let _in_flight = self.begin_mint(&fingerprint)?;
        let gate = self.gate(&fingerprint);
        let write = gate.lock.write().await;

        let minted = self.mint_locked(owner, &fingerprint).await?;

        let _read = write.downgrade();
        let client = self.ctx.client().await?;
        let keys: Vec<SigningKey> = Self::pages(client, proof, None).try_collect().await?;

        if !keys.iter().any(|k| k.id == minted.id) {
            warn!(
                proof = %fingerprint,
                key_id = %minted.id,
                "Network listing does not include the key that was just minted"
            );
        }
        info!(proof = %fingerprint, count = keys.len(), "Refreshed bound keys after mint");
        Ok((minted, keys))
    }

    /// Auth method that authorizes a mint for `owner`
    async fn mint_authorization(&self, owner: KeyOwner<'_>) -> Result<AuthMethod> {
        match owner {
            KeyOwner::Proof(proof) if proof.method_kind() == MethodKind::WalletSignature => {
                Err(Error::MintFailed(
                    "A wallet identity mints through its wallet session".to_string(),
                ))
            }
            KeyOwner::Proof(proof) => Ok(proof.to_auth_method()),
            KeyOwner::Wallet(session) => {
                let handshake = self.ctx.handshake().await?;
                let statement = mint_statement(session.address(), handshake.latest_blockhash);
                let auth_sig = WalletAuthCallback::from(session)
                    .authorize(&statement)
                    .await?;
                debug!(address = %session.address(), "Wallet signed mint authorization");
                Ok(AuthMethod {
                    auth_method_type: AUTH_METHOD_ETH_WALLET,
                    access_token: serde_json::to_string(&auth_sig)?,
                })
            }
        }
    }

    async fn mint_locked(&self, owner: KeyOwner<'_>, fingerprint: &str) -> Result<SigningKey> {
        let client = self.ctx.client().await?;
        let proof = owner.proof();
        let auth_method = self.mint_authorization(owner).await?;
        info!(proof = %fingerprint, method = %proof.method_kind(), "Minting signing key");

        let record = client.mint(&auth_method).await.map_err(|e| {
            error!(proof = %fingerprint, "Mint failed: {}", e);
            match e {
                err @ (Error::MintFailed(_) | Error::NotConnected) => err,
                other => Error::MintFailed(other.to_string()),
            }
        })?;

        let key = SigningKey::from(record).bound_to(proof);
        info!(
            proof = %fingerprint,
            key_id = %key.id,
            address = %key.controlled_address,
            "Minted signing key"
        );
        Ok(key)
    }

    /// Keys bound to `proof`, in the order the network reports them.
    ///
    /// An empty sequence is a normal outcome. Each page waits for any mint in
    /// flight for the same proof.
    pub async fn list_bound_keys(&self, proof: &IdentityProof) -> Result<BoundKeys> {
        let client = self.ctx.client().await?;
        let gate = self.gate(&proof.fingerprint());
        Ok(Self::pages(client, proof, Some(gate)))
    }

    /// Collect every key bound to `proof`.
    pub async fn collect_bound_keys(&self, proof: &IdentityProof) -> Result<Vec<SigningKey>> {
        self.list_bound_keys(proof).await?.try_collect().await
    }

    fn pages(
        client: Arc<dyn SigningNetwork>,
        proof: &IdentityProof,
        gate: Option<Gate>,
    ) -> BoundKeys {
        let state = ListState {
            client,
            auth_method: proof.to_auth_method(),
            proof: proof.clone(),
            gate,
            buffer: VecDeque::new(),
            cursor: None,
            exhausted: false,
        };

        stream::try_unfold(state, next_key).boxed()
    }
}

async fn next_key(mut state: ListState) -> Result<Option<(SigningKey, ListState)>> {
    loop {
        if let Some(key) = state.buffer.pop_front() {
            return Ok(Some((key, state)));
        }
        if state.exhausted {
            return Ok(None);
        }

        let page = {
            let _read = match &state.gate {
                Some(gate) => Some(gate.lock.read().await),
                None => None,
            };
            state
                .client
                .list_by_proof(&state.auth_method, state.cursor.take())
                .await?
        };

        debug!(
            proof = %state.proof.fingerprint(),
            count = page.records.len(),
            more = page.next_cursor.is_some(),
            "Fetched key page"
        );

        state.buffer.extend(
            page.records
                .into_iter()
                .map(|record| SigningKey::from(record).bound_to(&state.proof)),
        );
        state.exhausted = page.next_cursor.is_none();
        state.cursor = page.next_cursor;
    }
}

// =============================================================================
// Key Ring
// =============================================================================

/// Client-side cache of listed keys, with at most one selected
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: Vec<SigningKey>,
    selected: Option<String>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cache with a fresh listing. The selection survives only if
    /// the selected key is still listed.
    pub fn replace(&mut self, keys: Vec<SigningKey>) {
        self.keys = keys;
        if let Some(id) = &self.selected {
            if !self.keys.iter().any(|k| &k.id == id) {
                debug!(key_id = %id, "Selected key no longer listed");
                self.selected = None;
            }
        }
    }

    /// Add or update one key
    pub fn upsert(&mut self, key: SigningKey) {
        match self.keys.iter_mut().find(|k| k.id == key.id) {
            Some(existing) => {
                let mut merged = key;
                merged.bound_methods.extend(existing.bound_methods.iter().cloned());
                *existing = merged;
            }
            None => self.keys.push(key),
        }
    }

    pub fn select(&mut self, id: &str) -> Result<&SigningKey> {
        let key = self
            .keys
            .iter()
            .find(|k| k.id == id)
            .ok_or_else(|| Error::MalformedInput(format!("Unknown key: {}", id)))?;
        self.selected = Some(key.id.clone());
        Ok(key)
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<&SigningKey> {
        let id = self.selected.as_ref()?;
        self.keys.iter().find(|k| &k.id == id)
    }

    pub fn keys(&self) -> &[SigningKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
