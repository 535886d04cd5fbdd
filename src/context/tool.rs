use std::ops::Deref;

use serde_json::Value;

use super::CallbackContext;
use crate::auth::{credential_state_key, AuthConfig, AuthCredential};

/// Context for one tool call: a callback context bound to a function call id.
#[derive(Clone, Debug)]
pub struct ToolContext {
    callback: CallbackContext,
    function_call_id: String,
}

impl ToolContext {
    pub fn new(callback: CallbackContext, function_call_id: impl Into<String>) -> Self {
        Self {
            callback,
            function_call_id: function_call_id.into(),
        }
    }

    pub fn function_call_id(&self) -> &str {
        &self.function_call_id
    }

    /// Ask the enclosing composite agent to stop after this step.
    pub fn escalate(&self) {
        self.callback.update_actions(|actions| actions.escalate = true);
    }

    /// Hand the rest of the turn to `agent_name`.
    pub fn transfer_to_agent(&self, agent_name: impl Into<String>) {
        let agent_name = agent_name.into();
        self.callback
            .update_actions(|actions| actions.transfer_to_agent = Some(agent_name));
    }

    /// Do not feed this call's response back to the model.
    pub fn skip_summarization(&self) {
        self.callback
            .update_actions(|actions| actions.skip_summarization = true);
    }

    /// Pause this call until the end user supplies a credential.
    pub fn request_credential(&self, auth_config: AuthConfig) {
        let call_id = self.function_call_id.clone();
        self.callback.update_actions(|actions| {
            actions.requested_auth_configs.insert(call_id, auth_config);
        });
    }

    /// Credential answered for `auth_config` earlier in this turn, if any.
    pub fn get_auth_response(&self, auth_config: &AuthConfig) -> Option<AuthCredential> {
        let stored: Value = self
            .callback
            .state()
            .get(&credential_state_key(&auth_config.credential_key))?;
        serde_json::from_value(stored).ok()
    }
}

impl Deref for ToolContext {
    type Target = CallbackContext;

    fn deref(&self) -> &Self::Target {
        &self.callback
    }
}
