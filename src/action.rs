//! Action execution
//!
//! Submits code and parameters to the network under a session credential.
//! Before anything leaves the client, the executor checks:
//!
//! - params are a well-formed JSON object (malformed params never reach the network)
//! - the credential has not expired and its connection is still live
//! - the credential grants execution of this exact code, plus any extra
//!   capabilities the caller says the code needs
//!
//! The remote call is a single request/response. [`ActionExecutor::run`] turns
//! every failure into a displayable [`ActionResponse`] instead of an error.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::capability::{CapabilityRequest, CapabilitySet, ResourceKind};
use crate::crypto::sha256_hex;
use crate::error::{Error, Result};
use crate::network::{ExecutionRequest, NetworkContext};
use crate::session::SessionCredential;

/// Displayable outcome of an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub response: Option<JsonValue>,
    pub error: Option<String>,
}

impl ActionResponse {
    /// Create a success response
    pub fn success(response: JsonValue) -> Self {
        Self {
            success: true,
            response: Some(response),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(msg.into()),
        }
    }

    /// Pretty-printed result, or `Error: <message>`
    pub fn display(&self) -> String {
        match (&self.response, &self.error) {
            (_, Some(error)) => format!("Error: {}", error),
            (Some(response), None) => {
                serde_json::to_string_pretty(response).unwrap_or_else(|e| format!("Error: {}", e))
            }
            (None, None) => "null".to_string(),
        }
    }
}

/// Parse params text. Only a JSON object is accepted.
pub fn parse_params(params: &str) -> Result<JsonValue> {
    let trimmed = params.trim();
    if trimmed.is_empty() {
        return Ok(JsonValue::Object(Default::default()));
    }
    match serde_json::from_str::<JsonValue>(trimmed) {
        Ok(value @ JsonValue::Object(_)) => Ok(value),
        Ok(_) => Err(Error::MalformedInput(
            "Invalid jsParams JSON: expected an object".to_string(),
        )),
        Err(e) => Err(Error::MalformedInput(format!("Invalid jsParams JSON: {}", e))),
    }
}

/// Runs code on the network under session credentials
pub struct ActionExecutor {
    ctx: Arc<NetworkContext>,
}

impl ActionExecutor {
    pub fn new(ctx: Arc<NetworkContext>) -> Self {
        Self { ctx }
    }

    /// Capability needed to run `code`
    pub fn required_capability(code: &str) -> Result<CapabilityRequest> {
        CapabilityRequest::new(ResourceKind::ActionExecution, sha256_hex(code.as_bytes()))
    }

    /// Execute `code` with `params` (JSON text) under `credential`.
    pub async fn execute(
        &self,
        credential: &SessionCredential,
        code: &str,
        params: &str,
    ) -> Result<JsonValue> {
        self.execute_with(credential, code, params, &CapabilitySet::new())
            .await
    }

    /// Like [`execute`](Self::execute), also requiring `extra` capabilities
    /// (for example signing with a particular key).
    pub async fn execute_with(
        &self,
        credential: &SessionCredential,
        code: &str,
        params: &str,
        extra: &CapabilitySet,
    ) -> Result<JsonValue> {
        let js_params = parse_params(params)?;

        if credential.is_expired() {
            return Err(Error::SessionExpired(credential.expires_at()));
        }
        if credential.network() != self.ctx.network()
            || !self.ctx.is_current(credential.epoch()).await
        {
            return Err(Error::SessionRevoked);
        }

        let code_digest = sha256_hex(code.as_bytes());
        let required = Self::required_capability(code)?;
        for capability in std::iter::once(&required).chain(extra.iter()) {
            if !credential.granted().permits(capability) {
                warn!(required = %capability, "Session does not grant capability");
                return Err(Error::CapabilityDenied {
                    required: capability.to_string(),
                });
            }
        }

        let expiration = credential.expires_at();
        let payload = ExecutionRequest::signing_payload(&code_digest, &js_params, &expiration);
        let request = ExecutionRequest {
            session: credential.session().clone(),
            auth_sig: credential.signed_statement_base64(),
            code: code.to_string(),
            js_params,
            code_digest,
            expiration,
            session_key: credential.session_key().public_key().to_string(),
            signature: credential.session_key().sign(&payload),
        };

        let client = self.ctx.client().await?;
        debug!(code_digest = %request.code_digest, "Submitting execution");
        let started = Utc::now();

        let result = client.execute_code(&request).await.map_err(|e| match e {
            err @ Error::RemoteExecution(_) => err,
            other => Error::RemoteExecution(other.to_string()),
        })?;

        info!(
            code_digest = %request.code_digest,
            elapsed_ms = (Utc::now() - started).num_milliseconds(),
            "Execution completed"
        );
        Ok(result)
    }

    /// Execute and render the outcome for display. Never fails.
    pub async fn run(
        &self,
        credential: &SessionCredential,
        code: &str,
        params: &str,
    ) -> ActionResponse {
        match self.execute(credential, code, params).await {
            Ok(response) => ActionResponse::success(response),
            Err(e) => ActionResponse::error(display_error(&e)),
        }
    }
}

fn display_error(error: &Error) -> String {
    match error {
        Error::MalformedInput(msg) | Error::RemoteExecution(msg) => msg.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        assert_eq!(parse_params("").unwrap(), serde_json::json!({}));
        assert_eq!(
            parse_params(r#"{"magicNumber": 42}"#).unwrap(),
            serde_json::json!({ "magicNumber": 42 })
        );
        assert!(matches!(parse_params("{not json"), Err(Error::MalformedInput(_))));
        assert!(matches!(parse_params("[1,2]"), Err(Error::MalformedInput(_))));
    }

    #[test]
    fn test_response_display() {
        let ok = ActionResponse::success(serde_json::json!({ "signed": true }));
        assert_eq!(ok.display(), "{\n  \"signed\": true\n}");

        let err = ActionResponse::error("Invalid jsParams JSON: expected an object");
        assert_eq!(err.display(), "Error: Invalid jsParams JSON: expected an object");
    }

    #[test]
    fn test_required_capability_is_code_specific() {
        let a = ActionExecutor::required_capability("return 1").unwrap();
        let b = ActionExecutor::required_capability("return 2").unwrap();
        assert_ne!(a, b);
        assert!(CapabilityRequest::wildcard(ResourceKind::ActionExecution).covers(&a));
    }
}
