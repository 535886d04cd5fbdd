//! End-user credential requests raised by tools mid-call.

pub mod credential;

pub use credential::{
    credential_state_key, AuthConfig, AuthCredential, CredentialRequest,
    REQUEST_CREDENTIAL_FUNCTION_NAME,
};
