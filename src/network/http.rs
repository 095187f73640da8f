//! HTTP client for the network gateway and minting relay

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::identity::AuthMethod;

use super::{
    ExecutionRequest, Handshake, KeyPage, KeyRecord, NetworkConfig, NetworkId, SessionRequest,
    SigningNetwork,
};

/// Relay key type for ECDSA keys
const KEY_TYPE_ECDSA: u32 = 2;

/// Permission scope allowing the auth method to sign anything
const SCOPE_SIGN_ANYTHING: u32 = 1;

/// Error response from the gateway or relay
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    #[serde(default, alias = "message")]
    pub error: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// Key record in the relay's wire shape
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayPkp {
    token_id: String,
    public_key: String,
    eth_address: String,
    #[serde(default)]
    btc_address: Option<String>,
    #[serde(default)]
    cosmos_address: Option<String>,
    #[serde(default, rename = "isNewPKP")]
    is_new_pkp: bool,
    #[serde(default)]
    minted_at: DateTime<Utc>,
}

impl From<RelayPkp> for KeyRecord {
    fn from(pkp: RelayPkp) -> Self {
        KeyRecord::Relay {
            token_id: pkp.token_id,
            public_key: pkp.public_key,
            eth_address: pkp.eth_address,
            btc_address: pkp.btc_address,
            cosmos_address: pkp.cosmos_address,
            is_new: pkp.is_new_pkp,
            minted_at: pkp.minted_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchPkpsResponse {
    #[serde(default)]
    pkps: Vec<RelayPkp>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MintRequest<'a> {
    auth_method: &'a AuthMethod,
    key_type: u32,
    permitted_auth_method_scopes: Vec<Vec<u32>>,
    send_pkp_to_itself: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchPkpsRequest<'a> {
    auth_method: &'a AuthMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<String>,
}

/// [`SigningNetwork`] over HTTP.
///
/// Handshake, sessions and execution go to the network gateway; minting and
/// key lookup go to the relay.
pub struct HttpNetwork {
    config: NetworkConfig,
    http: Client,
}

impl HttpNetwork {
    pub fn new(config: NetworkConfig) -> Result<Self> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { config, http })
    }

    fn gateway_url(&self, path: &str) -> String {
        format!("{}{}", self.config.network_url.trim_end_matches('/'), path)
    }

    fn relay_url(&self, path: &str) -> String {
        format!("{}{}", self.config.relay_url.trim_end_matches('/'), path)
    }

    fn relay_post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.http.post(self.relay_url(path));
        match &self.config.relay_api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    /// Decode a successful response, or turn the error body into `classify(message)`.
    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
        context: &str,
        classify: fn(String) -> Error,
    ) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(classify(describe_failure(context, status, &body)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| classify(format!("Failed to parse {} response: {}", context, e)))
    }
}

fn describe_failure(context: &str, status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) if !err.error.is_empty() => match err.code {
            Some(code) => format!("{} failed ({}): {} [{}]", context, status, err.error, code),
            None => format!("{} failed ({}): {}", context, status, err.error),
        },
        _ => format!("{} failed ({}): {}", context, status, body),
    }
}

#[async_trait]
impl SigningNetwork for HttpNetwork {
    async fn connect(&self, network: NetworkId) -> Result<Handshake> {
        let response = self
            .http
            .get(self.gateway_url("/web/handshake"))
            .query(&[("network", network.as_str())])
            .send()
            .await
            .map_err(|e| Error::NetworkUnreachable(format!("Handshake request failed: {}", e)))?;

        Self::handle_response(response, "Handshake", Error::NetworkUnreachable).await
    }

    async fn mint(&self, auth_method: &AuthMethod) -> Result<KeyRecord> {
        let body = MintRequest {
            auth_method,
            key_type: KEY_TYPE_ECDSA,
            permitted_auth_method_scopes: vec![vec![SCOPE_SIGN_ANYTHING]],
            send_pkp_to_itself: true,
        };

        let response = self
            .relay_post("/mint-next-and-add-auth-methods")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::MintFailed(format!("Mint request failed: {}", e)))?;

        let pkp: RelayPkp = Self::handle_response(response, "Mint", Error::MintFailed).await?;
        debug!(token_id = %pkp.token_id, "Relay minted key");
        Ok(pkp.into())
    }

    async fn list_by_proof(
        &self,
        auth_method: &AuthMethod,
        cursor: Option<String>,
    ) -> Result<KeyPage> {
        let body = FetchPkpsRequest {
            auth_method,
            cursor,
        };

        let response = self
            .relay_post("/fetch-pkps-by-auth-method")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::NetworkUnreachable(format!("Key lookup failed: {}", e)))?;

        let page: FetchPkpsResponse =
            Self::handle_response(response, "Key lookup", Error::NetworkUnreachable).await?;
        Ok(KeyPage {
            records: page.pkps.into_iter().map(KeyRecord::from).collect(),
            next_cursor: page.next_cursor,
        })
    }

    async fn issue_session(&self, request: &SessionRequest) -> Result<serde_json::Value> {
        let response = self
            .http
            .post(self.gateway_url("/web/session"))
            .json(request)
            .send()
            .await
            .map_err(|e| Error::NetworkUnreachable(format!("Session request failed: {}", e)))?;

        Self::handle_response(response, "Session issuance", Error::AuthCallbackFailed).await
    }

    async fn execute_code(&self, request: &ExecutionRequest) -> Result<serde_json::Value> {
        let response = self
            .http
            .post(self.gateway_url("/web/execute"))
            .json(request)
            .send()
            .await
            .map_err(|e| Error::RemoteExecution(format!("Execution request failed: {}", e)))?;

        Self::handle_response(response, "Execution", Error::RemoteExecution).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_pkp_conversion() {
        let json = r#"{
            "tokenId": "0x1f",
            "publicKey": "0x04abcd",
            "ethAddress": "0xEF01",
            "btcAddress": "bc1qxyz",
            "isNewPKP": true
        }"#;
        let pkp: RelayPkp = serde_json::from_str(json).unwrap();
        let record = KeyRecord::from(pkp);

        match record {
            KeyRecord::Relay {
                token_id,
                btc_address,
                cosmos_address,
                is_new,
                ..
            } => {
                assert_eq!(token_id, "0x1f");
                assert_eq!(btc_address.as_deref(), Some("bc1qxyz"));
                assert!(cosmos_address.is_none());
                assert!(is_new);
            }
            other => panic!("unexpected record: {:?}", other),
        }
    }

    #[test]
    fn test_describe_failure() {
        let status = reqwest::StatusCode::BAD_REQUEST;
        let msg = describe_failure("Mint", status, r#"{"error":"insufficient funds"}"#);
        assert_eq!(msg, "Mint failed (400 Bad Request): insufficient funds");

        let msg = describe_failure("Mint", status, r#"{"message":"bad auth","code":"E1"}"#);
        assert!(msg.ends_with("bad auth [E1]"));

        let msg = describe_failure("Mint", status, "plain text");
        assert!(msg.ends_with("plain text"));
    }

    #[test]
    fn test_urls_trim_trailing_slash() {
        let network = HttpNetwork::new(NetworkConfig {
            network_url: "http://gateway.local/".into(),
            relay_url: "http://relay.local/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(network.gateway_url("/web/session"), "http://gateway.local/web/session");
        assert_eq!(
            network.relay_url("/fetch-pkps-by-auth-method"),
            "http://relay.local/fetch-pkps-by-auth-method"
        );
    }

    #[test]
    fn test_fetch_request_omits_empty_cursor() {
        let auth_method = AuthMethod {
            auth_method_type: 6,
            access_token: "tok".into(),
        };
        let body = serde_json::to_value(FetchPkpsRequest {
            auth_method: &auth_method,
            cursor: None,
        })
        .unwrap();
        assert_eq!(body["authMethod"]["authMethodType"], 6);
        assert!(body.get("cursor").is_none());
    }
}
