//! Configuration for the `pkp` command-line driver
//!
//! CLI arguments and environment variable handling using clap. Library
//! components take the plain config structs built here.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use url::Url;

use crate::identity::{OAuthConfig, OAuthProvider};
use crate::network::{NetworkConfig, NetworkId};
use crate::session::IssuerConfig;

/// pkp - programmable key pair orchestration
#[derive(Parser, Debug, Clone)]
#[command(name = "pkp")]
#[command(about = "Authenticate, mint signing keys and run actions on a signing network")]
pub struct Args {
    /// Signing network to connect to
    #[arg(long, env = "PKP_NETWORK", default_value = "datil-dev")]
    pub network: NetworkId,

    /// Network gateway URL
    #[arg(long, env = "PKP_NETWORK_URL", default_value = "http://127.0.0.1:7470")]
    pub network_url: String,

    /// Minting relay URL (defaults to the network's relay)
    #[arg(long, env = "PKP_RELAY_URL")]
    pub relay_url: Option<String>,

    /// API key for the minting relay
    #[arg(long, env = "PKP_RELAY_API_KEY")]
    pub relay_api_key: Option<String>,

    /// Chain JSON-RPC endpoint for balance lookups
    #[arg(long, env = "PKP_RPC_URL", default_value = "https://yellowstone-rpc.litprotocol.com")]
    pub rpc_url: String,

    /// Directory holding the stored auth method
    #[arg(long, env = "PKP_STORE_DIR", default_value = ".pkp")]
    pub store_dir: PathBuf,

    /// Hex-encoded wallet key file; when set, the wallet is the identity
    #[arg(long, env = "PKP_WALLET_KEY")]
    pub wallet_key: Option<PathBuf>,

    /// Session credential lifetime in seconds
    #[arg(long, env = "PKP_SESSION_TTL_SECS", default_value = "600")]
    pub session_ttl_secs: u64,

    /// Upper bound on session credential lifetime in seconds
    #[arg(long, env = "PKP_MAX_SESSION_TTL_SECS", default_value = "1800")]
    pub max_session_ttl_secs: u64,

    /// How long session issuance waits for a signature
    #[arg(long, env = "PKP_CALLBACK_TIMEOUT_SECS", default_value = "120")]
    pub callback_timeout_secs: u64,

    /// OAuth client ID
    #[arg(long, env = "PKP_OAUTH_CLIENT_ID")]
    pub oauth_client_id: Option<String>,

    /// Redirect URI registered with the OAuth provider
    #[arg(
        long,
        env = "PKP_OAUTH_REDIRECT_URI",
        default_value = "http://localhost:8912/oauth/callback"
    )]
    pub oauth_redirect_uri: String,

    /// HTTP request timeout in milliseconds
    #[arg(long, env = "PKP_REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show the stored auth method
    Status,

    /// Sign in with an OAuth provider
    SignIn {
        #[arg(long, default_value = "google")]
        provider: OAuthProvider,
    },

    /// Forget the stored auth method
    SignOut,

    /// List keys bound to the current identity
    Keys,

    /// Mint a new key bound to the current identity
    Mint,

    /// Run code on the network
    Exec {
        /// File containing the code to run
        #[arg(long)]
        code_file: PathBuf,

        /// Parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,

        /// Bound key the session acts through (OAuth identities; defaults to the newest)
        #[arg(long)]
        key: Option<String>,
    },

    /// Show the native-token balance of an address
    Balance {
        /// Address to look up (defaults to the wallet address)
        #[arg(long)]
        address: Option<String>,
    },

    /// Generate a local wallet key file
    NewWallet {
        #[arg(long)]
        out: PathBuf,
    },
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.session_ttl_secs == 0 {
            return Err("PKP_SESSION_TTL_SECS must be positive".to_string());
        }

        if self.session_ttl_secs > self.max_session_ttl_secs {
            return Err(
                "PKP_SESSION_TTL_SECS must be less than or equal to PKP_MAX_SESSION_TTL_SECS"
                    .to_string(),
            );
        }

        if self.callback_timeout_secs == 0 || self.request_timeout_ms == 0 {
            return Err("Timeouts must be positive".to_string());
        }

        let mut urls = vec![
            ("PKP_NETWORK_URL", self.network_url.as_str()),
            ("PKP_RPC_URL", self.rpc_url.as_str()),
            ("PKP_OAUTH_REDIRECT_URI", self.oauth_redirect_uri.as_str()),
        ];
        if let Some(relay_url) = &self.relay_url {
            urls.push(("PKP_RELAY_URL", relay_url.as_str()));
        }
        for (name, value) in urls {
            Url::parse(value).map_err(|e| format!("{} is not a valid URL: {}", name, e))?;
        }

        Ok(())
    }

    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            network: self.network,
            network_url: self.network_url.clone(),
            relay_url: self
                .relay_url
                .clone()
                .unwrap_or_else(|| self.network.default_relay_url().to_string()),
            relay_api_key: self.relay_api_key.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    pub fn issuer_config(&self) -> IssuerConfig {
        IssuerConfig {
            default_ttl: Duration::from_secs(self.session_ttl_secs),
            max_ttl: Duration::from_secs(self.max_session_ttl_secs),
            callback_timeout: Duration::from_secs(self.callback_timeout_secs),
            ..Default::default()
        }
    }

    pub fn oauth_config(&self) -> OAuthConfig {
        OAuthConfig {
            client_id: self.oauth_client_id.clone().unwrap_or_default(),
            redirect_uri: self.oauth_redirect_uri.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("pkp").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["status"]);
        assert_eq!(args.network, NetworkId::DatilDev);
        assert_eq!(args.session_ttl_secs, 600);
        assert!(args.validate().is_ok());

        let network = args.network_config();
        assert_eq!(network.relay_url, NetworkId::DatilDev.default_relay_url());
        assert_eq!(args.issuer_config().max_ttl, Duration::from_secs(1800));
    }

    #[test]
    fn test_ttl_above_max_rejected() {
        let args = parse(&["--session-ttl-secs", "3600", "status"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_bad_url_rejected() {
        let args = parse(&["--rpc-url", "not a url", "status"]);
        assert!(args.validate().unwrap_err().contains("PKP_RPC_URL"));
    }

    #[test]
    fn test_exec_subcommand() {
        let args = parse(&[
            "--network",
            "datil",
            "exec",
            "--code-file",
            "action.js",
            "--params",
            r#"{"magicNumber":42}"#,
        ]);
        assert_eq!(args.network, NetworkId::Datil);
        match args.command {
            Command::Exec { code_file, params, key } => {
                assert_eq!(code_file, PathBuf::from("action.js"));
                assert_eq!(params, r#"{"magicNumber":42}"#);
                assert!(key.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_network_rejected() {
        let result = Args::try_parse_from(["pkp", "--network", "mainnet", "status"]);
        assert!(result.is_err());
    }
}
