//! OAuth authentication
//!
//! Interactive sign-in through an identity provider. The flow moves through
//! [`SignInState`]: `Idle → AwaitingRedirect → TokenExtracted → Persisted`.
//!
//! A valid cached proof for the same provider short-circuits straight to
//! `Persisted` without opening the auth surface. Token extraction fails closed:
//! a redirect without the expected token is an error, never an empty credential.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::SessionStore;

use super::{IdentityProof, MethodKind};

// =============================================================================
// Providers
// =============================================================================

/// Supported OAuth identity providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Discord,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Discord => "discord",
        }
    }

    pub fn authorization_endpoint(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "https://accounts.google.com/o/oauth2/v2/auth",
            OAuthProvider::Discord => "https://discord.com/oauth2/authorize",
        }
    }

    pub fn scope(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "openid email profile",
            OAuthProvider::Discord => "identify",
        }
    }

    /// `response_type` requested from the provider (implicit flow)
    pub fn response_type(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "id_token",
            OAuthProvider::Discord => "token",
        }
    }

    /// Redirect parameter that carries the identity token
    pub fn token_param(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "id_token",
            OAuthProvider::Discord => "access_token",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OAuthProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(OAuthProvider::Google),
            "discord" => Ok(OAuthProvider::Discord),
            other => Err(Error::Config(format!("Unknown OAuth provider: {}", other))),
        }
    }
}

/// OAuth client settings
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Client ID registered with the provider
    pub client_id: String,
    /// Default redirect URI controlled by this application
    pub redirect_uri: String,
    /// Upper bound on the interactive step
    pub timeout: Duration,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            redirect_uri: "http://localhost:8912/oauth/callback".to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

// =============================================================================
// Auth Surface
// =============================================================================

/// Sign-in flow progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInState {
    Idle,
    AwaitingRedirect,
    TokenExtracted,
    Persisted,
}

/// How the interactive surface ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceOutcome {
    /// The provider redirected to the target with this URL
    Redirected(Url),
    /// The user closed the surface
    Closed,
}

/// Interactive web authentication surface (popup, browser tab, console).
#[async_trait]
pub trait AuthSurface: Send + Sync {
    /// Show `auth_url` and wait until the provider redirects to
    /// `redirect_target` or the user closes the surface.
    async fn open(&self, auth_url: &Url, redirect_target: &str) -> Result<SurfaceOutcome>;
}

type InputLines = Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;

/// Surface for terminals: prints the authorization URL and reads the redirect
/// URL back from an input stream, stdin by default. An empty line closes the
/// surface.
///
/// One reader is kept for the lifetime of the surface, so input buffered by one
/// sign-in is still there for the next.
pub struct ConsoleSurface {
    lines: tokio::sync::Mutex<InputLines>,
}

impl ConsoleSurface {
    pub fn new() -> Self {
        Self::from_reader(tokio::io::stdin())
    }

    /// Read redirect URLs from `reader` instead of stdin
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            lines: tokio::sync::Mutex::new(BufReader::new(reader).lines()),
        }
    }
}

impl Default for ConsoleSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConsoleSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleSurface").finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthSurface for ConsoleSurface {
    async fn open(&self, auth_url: &Url, redirect_target: &str) -> Result<SurfaceOutcome> {
        eprintln!("Open this URL to sign in:\n\n  {}\n", auth_url);
        eprintln!(
            "Then paste the URL you were redirected to ({}...), or an empty line to cancel:",
            redirect_target
        );

        let line = self.lines.lock().await.next_line().await?.unwrap_or_default();
        let line = line.trim();
        if line.is_empty() {
            return Ok(SurfaceOutcome::Closed);
        }

        Url::parse(line)
            .map(SurfaceOutcome::Redirected)
            .map_err(|e| Error::RedirectError(format!("Invalid redirect URL: {}", e)))
    }
}

// =============================================================================
// Authenticator
// =============================================================================

#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[serde(default)]
    exp: Option<i64>,
}

/// Obtains identity proofs through an OAuth redirect flow
pub struct OAuthAuthenticator {
    config: OAuthConfig,
    store: SessionStore,
    surface: Arc<dyn AuthSurface>,
    state: Mutex<SignInState>,
}

impl OAuthAuthenticator {
    pub fn new(config: OAuthConfig, store: SessionStore, surface: Arc<dyn AuthSurface>) -> Self {
        Self {
            config,
            store,
            surface,
            state: Mutex::new(SignInState::Idle),
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Current state of the most recent sign-in
    pub fn state(&self) -> SignInState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: SignInState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        debug!(from = ?*state, to = ?next, "Sign-in state transition");
        *state = next;
    }

    /// Sign in with `provider`, redirecting back to `redirect_target`.
    ///
    /// The proof is persisted before it is returned. On failure the store is
    /// left untouched and the state returns to `Idle`.
    pub async fn sign_in(
        &self,
        provider: OAuthProvider,
        redirect_target: &str,
    ) -> Result<IdentityProof> {
        self.set_state(SignInState::Idle);

        if let Some(cached) = self.cached_proof(provider).await? {
            info!(provider = %provider, "Reusing stored auth method");
            self.set_state(SignInState::Persisted);
            return Ok(cached);
        }

        match self.run_flow(provider, redirect_target).await {
            Ok(proof) => Ok(proof),
            Err(e) => {
                warn!(provider = %provider, "Sign-in failed: {}", e);
                self.set_state(SignInState::Idle);
                Err(e)
            }
        }
    }

    /// Forget the stored proof.
    pub async fn sign_out(&self) -> Result<()> {
        self.store.clear().await?;
        self.set_state(SignInState::Idle);
        Ok(())
    }

    async fn cached_proof(&self, provider: OAuthProvider) -> Result<Option<IdentityProof>> {
        let Some(proof) = self.store.load().await? else {
            return Ok(None);
        };
        if proof.method_kind() != MethodKind::OAuthIdToken(provider) {
            debug!(stored = %proof.method_kind(), "Stored auth method is for another provider");
            return Ok(None);
        }
        if proof.is_expired() {
            debug!(provider = %provider, "Stored auth method has expired");
            return Ok(None);
        }
        Ok(Some(proof))
    }

    async fn run_flow(&self, provider: OAuthProvider, redirect_target: &str) -> Result<IdentityProof> {
        let csrf_state = Uuid::new_v4().simple().to_string();
        let nonce = Uuid::new_v4().simple().to_string();
        let auth_url = self.authorization_url(provider, redirect_target, &csrf_state, &nonce)?;

        self.set_state(SignInState::AwaitingRedirect);
        info!(provider = %provider, "Awaiting OAuth redirect");

        let outcome = tokio::time::timeout(
            self.config.timeout,
            self.surface.open(&auth_url, redirect_target),
        )
        .await
        .map_err(|_| {
            warn!(provider = %provider, timeout = ?self.config.timeout, "Auth surface timed out");
            Error::UserCancelled
        })??;

        let redirect = match outcome {
            SurfaceOutcome::Redirected(url) => url,
            SurfaceOutcome::Closed => return Err(Error::UserCancelled),
        };

        let token = extract_token(provider, &redirect, redirect_target, &csrf_state)?;
        self.set_state(SignInState::TokenExtracted);

        let proof = IdentityProof::oauth(provider, token.clone(), token_expiry(&token));
        self.store.save(&proof).await?;
        self.set_state(SignInState::Persisted);

        info!(provider = %provider, token = %proof.redacted(), "Signed in");
        Ok(proof)
    }

    /// Authorization URL for the implicit flow.
    pub fn authorization_url(
        &self,
        provider: OAuthProvider,
        redirect_target: &str,
        csrf_state: &str,
        nonce: &str,
    ) -> Result<Url> {
        Url::parse_with_params(
            provider.authorization_endpoint(),
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", redirect_target),
                ("response_type", provider.response_type()),
                ("scope", provider.scope()),
                ("state", csrf_state),
                ("nonce", nonce),
            ],
        )
        .map_err(|e| Error::Config(format!("Invalid authorization endpoint: {}", e)))
    }
}

// =============================================================================
// Redirect Parsing
// =============================================================================

/// Collect parameters from both the query and the fragment of a redirect URL.
fn redirect_params(url: &Url) -> Result<HashMap<String, String>> {
    let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    if let Some(fragment) = url.fragment() {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(fragment)
            .map_err(|e| Error::RedirectError(format!("Unreadable redirect fragment: {}", e)))?;
        params.extend(pairs);
    }
    Ok(params)
}

fn same_target(url: &Url, redirect_target: &str) -> bool {
    match Url::parse(redirect_target) {
        Ok(target) => {
            url.scheme() == target.scheme()
                && url.host_str() == target.host_str()
                && url.port_or_known_default() == target.port_or_known_default()
                && url.path() == target.path()
        }
        Err(_) => false,
    }
}

fn extract_token(
    provider: OAuthProvider,
    redirect: &Url,
    redirect_target: &str,
    expected_state: &str,
) -> Result<String> {
    if !same_target(redirect, redirect_target) {
        return Err(Error::RedirectError(format!(
            "Redirect went to {} instead of {}",
            redirect.origin().ascii_serialization(),
            redirect_target
        )));
    }

    let params = redirect_params(redirect)?;

    if let Some(error) = params.get("error") {
        if error == "access_denied" {
            return Err(Error::UserCancelled);
        }
        let description = params.get("error_description").cloned().unwrap_or_default();
        return Err(Error::RedirectError(format!("{} {}", error, description).trim().to_string()));
    }

    match params.get("state") {
        Some(state) if state == expected_state => {}
        Some(_) => return Err(Error::RedirectError("State parameter mismatch".to_string())),
        None => return Err(Error::RedirectError("Redirect carried no state".to_string())),
    }

    params
        .get(provider.token_param())
        .filter(|token| !token.is_empty())
        .cloned()
        .ok_or_else(|| Error::MissingToken(provider.token_param().to_string()))
}

/// Read the `exp` claim without verifying the signature.
///
/// Tokens are verified by the relay and network, never client-side. Opaque
/// tokens have no readable expiry.
fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    match decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation) {
        Ok(data) => data
            .claims
            .exp
            .and_then(|exp| Utc.timestamp_opt(exp, 0).single()),
        Err(e) => {
            debug!("Token expiry not readable: {}", e);
            None
        }
    }
}
