//! pkp - programmable key pair orchestration
//!
//! Headless driver for the orchestration library: OAuth sign-in through the
//! console, wallet identities from a local key file, key minting and listing,
//! and action execution under short-lived session credentials.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pkp_orchestrator::{
    action::parse_params,
    config::{Args, Command},
    ActionExecutor, ActionResponse, AuthCallback, BalanceSource, CapabilityRequest,
    CapabilitySet, ConsoleSurface, Error, FileStore, HttpNetwork, IdentityProof, JsonRpcBalance,
    KeyBinder, KeyOwner, KeyRing, LocalWallet, NetworkContext, OAuthAuthCallback,
    OAuthAuthenticator, OAuthProvider, ResourceKind, SessionIssuer, SessionStore,
    WalletAuthCallback, WalletAuthenticator, WalletSession, WalletSigner,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(&args);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(args).await {
        match e.downcast_ref::<Error>() {
            Some(err) if err.is_retryable() => {
                error!(category = ?err.category(), "{:#}", e);
                eprintln!("Error: {:#}\nNothing was retried; run the command again to retry.", e);
            }
            Some(err) => {
                error!(category = ?err.category(), "{:#}", e);
                eprintln!("Error: {:#}", e);
            }
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("pkp_orchestrator={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if args.log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

// =============================================================================
// Commands
// =============================================================================

async fn run(args: Args) -> anyhow::Result<()> {
    let store = SessionStore::new(Arc::new(FileStore::new(&args.store_dir)));

    match args.command.clone() {
        Command::Status => status(&store).await,
        Command::SignIn { provider } => sign_in(&args, store, provider).await,
        Command::SignOut => {
            store.clear().await?;
            println!("Signed out");
            Ok(())
        }
        Command::NewWallet { out } => {
            let wallet = LocalWallet::generate();
            wallet.save(&out).await?;
            println!("{}", wallet.address());
            Ok(())
        }
        Command::Balance { address } => balance(&args, address).await,
        Command::Keys => keys(&args, &store).await,
        Command::Mint => mint(&args, &store).await,
        Command::Exec {
            code_file,
            params,
            key,
        } => {
            let code = tokio::fs::read_to_string(&code_file)
                .await
                .with_context(|| format!("Failed to read {}", code_file.display()))?;
            exec(&args, &store, &code, &params, key.as_deref()).await
        }
    }
}

async fn status(store: &SessionStore) -> anyhow::Result<()> {
    match store.load().await? {
        Some(proof) => {
            println!("Method:      {}", proof.method_kind());
            println!("Credential:  {}", proof.redacted());
            println!("Captured at: {}", proof.captured_at());
            match proof.expires_at() {
                Some(exp) if proof.is_expired() => println!("Expired at:  {}", exp),
                Some(exp) => println!("Expires at:  {}", exp),
                None => println!("Expires at:  unknown"),
            }
        }
        None => println!("Not signed in"),
    }
    Ok(())
}

async fn sign_in(args: &Args, store: SessionStore, provider: OAuthProvider) -> anyhow::Result<()> {
    let config = args.oauth_config();
    if config.client_id.is_empty() {
        bail!("PKP_OAUTH_CLIENT_ID is required to sign in");
    }
    let redirect_uri = config.redirect_uri.clone();

    let authenticator = OAuthAuthenticator::new(config, store, Arc::new(ConsoleSurface::new()));
    let proof = authenticator.sign_in(provider, &redirect_uri).await?;
    println!("Signed in with {} ({})", proof.method_kind(), proof.redacted());
    Ok(())
}

async fn balance(args: &Args, address: Option<String>) -> anyhow::Result<()> {
    let address = match (address, &args.wallet_key) {
        (Some(address), _) => address,
        (None, Some(path)) => LocalWallet::load(path).await?.address().to_string(),
        (None, None) => bail!("Pass --address or --wallet-key"),
    };

    let source = JsonRpcBalance::new(Duration::from_millis(args.request_timeout_ms))?;
    match source.balance(&address, &args.rpc_url).await {
        Ok(balance) => println!("{} {}", address, balance),
        Err(e) => {
            warn!(address = %address, "Balance lookup failed: {}", e);
            println!("{} unavailable ({})", address, e);
        }
    }
    Ok(())
}

async fn keys(args: &Args, store: &SessionStore) -> anyhow::Result<()> {
    let identity = resolve_identity(args, store).await?;
    let ctx = connect(args).await?;

    let binder = KeyBinder::new(ctx.clone());
    let keys = binder.collect_bound_keys(identity.proof()).await?;
    ctx.disconnect().await;

    if keys.is_empty() {
        println!("No keys bound to this identity");
    } else {
        println!("{}", serde_json::to_string_pretty(&keys)?);
    }
    Ok(())
}

async fn mint(args: &Args, store: &SessionStore) -> anyhow::Result<()> {
    let identity = resolve_identity(args, store).await?;
    let ctx = connect(args).await?;

    let binder = KeyBinder::new(ctx.clone());
    let result = binder.mint_and_refresh(identity.owner()).await;
    ctx.disconnect().await;

    let (minted, keys) = result?;
    info!(key_id = %minted.id, total = keys.len(), "Mint complete");
    println!("{}", serde_json::to_string_pretty(&minted)?);
    Ok(())
}

async fn exec(
    args: &Args,
    store: &SessionStore,
    code: &str,
    params: &str,
    key_id: Option<&str>,
) -> anyhow::Result<()> {
    // Malformed params are reported before any signature is requested
    if let Err(e) = parse_params(params) {
        println!("{}", ActionResponse::error(e.to_string()).display());
        return Ok(());
    }

    let identity = resolve_identity(args, store).await?;
    let ctx = connect(args).await?;

    let callback: Box<dyn AuthCallback> = match &identity {
        Identity::Wallet(session) => Box::new(WalletAuthCallback::from(session)),
        Identity::OAuth(proof) => {
            let binder = KeyBinder::new(ctx.clone());
            let mut ring = KeyRing::new();
            ring.replace(binder.collect_bound_keys(proof).await?);
            let key = match key_id {
                Some(id) => ring.select(id)?.clone(),
                None => match ring.keys().last() {
                    Some(newest) => newest.clone(),
                    None => bail!("No keys bound to this identity; run `pkp mint` first"),
                },
            };
            Box::new(OAuthAuthCallback::new(proof.clone(), &key)?)
        }
    };

    let capabilities = CapabilitySet::new()
        .with(CapabilityRequest::wildcard(ResourceKind::ActionExecution))
        .with(CapabilityRequest::wildcard(ResourceKind::KeySigning));

    let issuer = SessionIssuer::new(ctx.clone(), args.issuer_config());
    let credential = issuer.issue(callback.as_ref(), &capabilities, None).await?;

    let executor = ActionExecutor::new(ctx.clone());
    let response = executor.run(&credential, code, params).await;
    ctx.disconnect().await;

    println!("{}", response.display());
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

enum Identity {
    Wallet(WalletSession),
    OAuth(IdentityProof),
}

impl Identity {
    fn proof(&self) -> &IdentityProof {
        match self {
            Identity::Wallet(session) => session.proof(),
            Identity::OAuth(proof) => proof,
        }
    }

    fn owner(&self) -> KeyOwner<'_> {
        match self {
            Identity::Wallet(session) => KeyOwner::Wallet(session),
            Identity::OAuth(proof) => KeyOwner::Proof(proof),
        }
    }
}

async fn resolve_identity(args: &Args, store: &SessionStore) -> anyhow::Result<Identity> {
    if let Some(path) = &args.wallet_key {
        let source = Arc::new(JsonRpcBalance::new(Duration::from_millis(
            args.request_timeout_ms,
        ))?);
        let wallet = LocalWallet::load(path)
            .await
            .with_context(|| format!("Failed to load wallet key {}", path.display()))?
            .with_balance_source(source, args.rpc_url.clone());

        let authenticator = WalletAuthenticator::new(Some(Arc::new(wallet)));
        let handle = authenticator.connect()?;
        return Ok(Identity::Wallet(authenticator.authenticate(&handle).await?));
    }

    match store.load().await? {
        Some(proof) if proof.is_expired() => {
            bail!("Stored sign-in has expired; run `pkp sign-in` again")
        }
        Some(proof) => Ok(Identity::OAuth(proof)),
        None => bail!("Not signed in; run `pkp sign-in` or pass --wallet-key"),
    }
}

async fn connect(args: &Args) -> anyhow::Result<Arc<NetworkContext>> {
    let network = HttpNetwork::new(args.network_config())?;
    let ctx = Arc::new(NetworkContext::new(args.network, Arc::new(network)));
    ctx.connect().await?;
    Ok(ctx)
}
