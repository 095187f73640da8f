//! Wallet authentication
//!
//! Requesting account access is a blocking, user-interactive step that may be
//! rejected. On success the caller gets a [`WalletSession`]: a usable signer plus
//! a placeholder [`IdentityProof`]. The signature that actually authenticates
//! the user is produced later, when a session statement exists to be signed.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ed25519_dalek::{SigningKey, VerifyingKey};
use tracing::{debug, info, warn};

use crate::balance::BalanceSource;
use crate::crypto::{derive_address, generate_keypair, sign_payload, PRIVATE_KEY_LEN};
use crate::error::{Error, Result};
use crate::store::write_secret_file;

use super::IdentityProof;

// =============================================================================
// Provider Boundary
// =============================================================================

/// A wallet provider (browser extension, hardware wallet, local key file).
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Ask the user for account access.
    ///
    /// Implementations return [`Error::UserRejected`] when the user declines
    /// and [`Error::ProviderError`] for anything else.
    async fn request_accounts(&self) -> Result<Vec<String>>;

    /// A signer for one of the authorized accounts.
    fn signer(&self, address: &str) -> Result<Arc<dyn WalletSigner>>;
}

/// Signs messages on behalf of one wallet account.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// The account address this signer controls
    fn address(&self) -> &str;

    /// Sign a UTF-8 message, returning a 0x-prefixed hex signature
    async fn sign_message(&self, message: &str) -> Result<String>;

    /// Native-token balance of the account, in the chain's smallest unit
    async fn balance(&self) -> Result<u128>;
}

// =============================================================================
// Authenticator
// =============================================================================

/// Handle to a detected wallet provider
#[derive(Clone)]
pub struct WalletHandle {
    provider: Arc<dyn WalletProvider>,
}

/// Result of a successful wallet authentication
#[derive(Clone)]
pub struct WalletSession {
    signer: Arc<dyn WalletSigner>,
    proof: IdentityProof,
}

impl WalletSession {
    pub fn address(&self) -> &str {
        self.signer.address()
    }

    pub fn signer(&self) -> Arc<dyn WalletSigner> {
        Arc::clone(&self.signer)
    }

    /// Placeholder proof; held in memory only
    pub fn proof(&self) -> &IdentityProof {
        &self.proof
    }
}

impl fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletSession")
            .field("address", &self.address())
            .finish()
    }
}

/// Obtains identity proofs from a connected wallet
pub struct WalletAuthenticator {
    provider: Option<Arc<dyn WalletProvider>>,
}

impl WalletAuthenticator {
    /// Create an authenticator. `None` means no wallet was found in this context.
    pub fn new(provider: Option<Arc<dyn WalletProvider>>) -> Self {
        Self { provider }
    }

    /// Detect the wallet provider.
    pub fn connect(&self) -> Result<WalletHandle> {
        match &self.provider {
            Some(provider) => Ok(WalletHandle {
                provider: Arc::clone(provider),
            }),
            None => {
                warn!("No wallet provider available");
                Err(Error::NoWalletDetected)
            }
        }
    }

    /// Request account access and build the wallet session.
    pub async fn authenticate(&self, handle: &WalletHandle) -> Result<WalletSession> {
        let accounts = handle.provider.request_accounts().await?;
        let address = accounts
            .into_iter()
            .next()
            .ok_or_else(|| Error::UserRejected("No account was authorized".to_string()))?;

        let signer = handle.provider.signer(&address)?;
        info!(address = %address, "Wallet connected");

        Ok(WalletSession {
            signer,
            proof: IdentityProof::wallet(address),
        })
    }
}

// =============================================================================
// Local Wallet
// =============================================================================

/// Wallet backed by a local Ed25519 key, for headless use.
///
/// Account access is always granted; the key holder has already consented by
/// providing the key.
#[derive(Clone)]
pub struct LocalWallet {
    signing_key: SigningKey,
    address: String,
    balance_source: Option<(Arc<dyn BalanceSource>, String)>,
}

impl LocalWallet {
    /// Create a wallet with a freshly generated key.
    pub fn generate() -> Self {
        let (signing_key, _) = generate_keypair();
        Self::from_signing_key(signing_key)
    }

    /// Create a wallet from raw private key bytes.
    pub fn from_bytes(bytes: &[u8; PRIVATE_KEY_LEN]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(bytes))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = derive_address(&signing_key.verifying_key());
        Self {
            signing_key,
            address,
            balance_source: None,
        }
    }

    /// Load a wallet from a file holding the hex-encoded private key.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        let bytes = hex::decode(contents.trim().trim_start_matches("0x"))
            .map_err(|e| Error::Config(format!("Invalid wallet key encoding: {e}")))?;
        let bytes: [u8; PRIVATE_KEY_LEN] = bytes.try_into().map_err(|_| {
            Error::Config(format!("Wallet key must be {PRIVATE_KEY_LEN} bytes"))
        })?;
        debug!(path = %path.display(), "Loaded local wallet key");
        Ok(Self::from_bytes(&bytes))
    }

    /// Write the hex-encoded private key to a file only the owner can read.
    pub async fn save(&self, path: &Path) -> Result<()> {
        write_secret_file(path, hex::encode(self.signing_key.to_bytes())).await?;
        debug!(path = %path.display(), "Saved local wallet key");
        Ok(())
    }

    /// Read balances through the given source and RPC endpoint.
    pub fn with_balance_source(
        mut self,
        source: Arc<dyn BalanceSource>,
        rpc_url: impl Into<String>,
    ) -> Self {
        self.balance_source = Some((source, rpc_url.into()));
        self
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

#[async_trait]
impl WalletProvider for LocalWallet {
    async fn request_accounts(&self) -> Result<Vec<String>> {
        Ok(vec![self.address.clone()])
    }

    fn signer(&self, address: &str) -> Result<Arc<dyn WalletSigner>> {
        if !address.eq_ignore_ascii_case(&self.address) {
            return Err(Error::ProviderError(format!(
                "Account {} is not managed by this wallet",
                address
            )));
        }
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl WalletSigner for LocalWallet {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign_message(&self, message: &str) -> Result<String> {
        let signature = sign_payload(&self.signing_key, message.as_bytes());
        Ok(format!("0x{}", hex::encode(signature.to_bytes())))
    }

    async fn balance(&self) -> Result<u128> {
        match &self.balance_source {
            Some((source, rpc_url)) => source.balance(&self.address, rpc_url).await,
            None => Err(Error::ProviderError(
                "No balance source configured for this wallet".to_string(),
            )),
        }
    }
}
