//! Credential and session orchestration for programmable key pairs
//!
//! A user authenticates with a wallet or an OAuth provider, binds network-held
//! signing keys to that identity, derives short-lived capability-scoped session
//! credentials from it, and runs code on the signing network under them.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pkp_orchestrator::{
//!     ActionExecutor, CapabilityRequest, CapabilitySet, HttpNetwork, IssuerConfig,
//!     KeyBinder, LocalWallet, NetworkConfig, NetworkContext, ResourceKind,
//!     SessionIssuer, WalletAuthCallback, WalletAuthenticator,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = NetworkConfig::default();
//! let network = config.network;
//! let ctx = Arc::new(NetworkContext::new(network, Arc::new(HttpNetwork::new(config)?)));
//! ctx.connect().await?;
//!
//! // Authenticate with a wallet
//! let wallets = WalletAuthenticator::new(Some(Arc::new(LocalWallet::generate())));
//! let wallet = wallets.authenticate(&wallets.connect()?).await?;
//!
//! // Mint a key and refresh the bound keys
//! let binder = KeyBinder::new(ctx.clone());
//! let (key, keys) = binder.mint_and_refresh(&wallet).await?;
//!
//! // Issue a session and run code
//! let capabilities = CapabilitySet::new()
//!     .with(CapabilityRequest::wildcard(ResourceKind::ActionExecution))
//!     .with(CapabilityRequest::wildcard(ResourceKind::KeySigning));
//! let issuer = SessionIssuer::new(ctx.clone(), IssuerConfig::default());
//! let credential = issuer
//!     .issue(&WalletAuthCallback::from(&wallet), &capabilities, None)
//!     .await?;
//!
//! let executor = ActionExecutor::new(ctx.clone());
//! let response = executor.run(&credential, "(async () => {})()", r#"{"n": 1}"#).await;
//! println!("{}", response.display());
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod balance;
pub mod capability;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod keys;
pub mod network;
pub mod session;
pub mod store;

// Re-export main types
pub use action::{ActionExecutor, ActionResponse};
pub use balance::{BalanceSource, JsonRpcBalance};
pub use capability::{CapabilityRequest, CapabilitySet, ResourceKind};
pub use error::{Error, ErrorCategory, Result};
pub use identity::{
    AuthMethod, AuthSurface, ConsoleSurface, IdentityProof, LocalWallet, MethodKind,
    OAuthAuthenticator, OAuthConfig, OAuthProvider, SignInState, SurfaceOutcome,
    WalletAuthenticator, WalletHandle, WalletProvider, WalletSession, WalletSigner,
};
pub use keys::{BoundKeys, KeyBinder, KeyOwner, KeyRing, SigningKey};
pub use network::{
    Handshake, HttpNetwork, KeyPage, KeyRecord, NetworkConfig, NetworkContext, NetworkId,
    SigningNetwork,
};
pub use session::{
    AuthCallback, AuthSig, AuthStatement, IssuerConfig, OAuthAuthCallback, SessionCredential,
    SessionIssuer, WalletAuthCallback,
};
pub use store::{FileStore, KeyValueStore, MemoryStore, SessionStore};
