//! Credential request/response payloads.
//!
//! A tool that needs end-user authentication calls
//! [`ToolContext::request_credential`](crate::context::ToolContext::request_credential).
//! The dispatcher turns every such request into a long-running
//! `request_credential` function call; the client answers it with a
//! function response whose payload is an [`AuthConfig`] carrying the
//! credential, and the original call is replayed on the next turn.

use serde::{Deserialize, Serialize};

/// Function name used for credential request calls.
pub const REQUEST_CREDENTIAL_FUNCTION_NAME: &str = "request_credential";

/// A credential supplied by the end user (or exchanged on their behalf).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthCredential {
    /// Scheme-specific type tag, e.g. `oauth2`, `api_key`, `bearer`.
    pub auth_type: String,
    /// Opaque secret material.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// What a tool needs to authenticate, and (once answered) the credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// Stable key the credential is stored and looked up under.
    pub credential_key: String,
    /// Scheme description shown to the client (authorization URL, scopes, ...).
    #[serde(default)]
    pub auth_scheme: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchanged_credential: Option<AuthCredential>,
}

impl AuthConfig {
    pub fn new(credential_key: impl Into<String>, auth_scheme: serde_json::Value) -> Self {
        Self {
            credential_key: credential_key.into(),
            auth_scheme,
            exchanged_credential: None,
        }
    }
}

/// Arguments of an `request_credential` function call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialRequest {
    /// Id of the original function call waiting on this credential.
    pub function_call_id: String,
    pub auth_config: AuthConfig,
}

/// Prefix of the invocation-scoped state key a resumed call finds its credential under.
pub const CREDENTIAL_STATE_PREFIX: &str = "temp:auth:";

/// State key holding the credential answered for `credential_key`.
pub fn credential_state_key(credential_key: &str) -> String {
    format!("{CREDENTIAL_STATE_PREFIX}{credential_key}")
}
