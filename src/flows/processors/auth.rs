//! Resumes tool calls that were waiting on end-user credentials.

use std::collections::HashSet;

use crate::auth::{credential_state_key, AuthConfig, CredentialRequest, REQUEST_CREDENTIAL_FUNCTION_NAME};
use crate::context::InvocationContext;
use crate::error::Result;
use crate::events::{apply_rewinds, find_matching_function_call, Event};
use crate::flows::functions::{handle_function_calls, ToolMap};
use crate::types::StateMap;

/// If the latest session event answers credential requests, store the
/// credentials for this turn and re-run the calls that asked for them.
pub async fn resume_calls_awaiting_credentials(
    ctx: &InvocationContext,
    tools: &ToolMap,
) -> Result<Option<Event>> {
    let Some((original_event, call_ids)) = collect_answered_requests(ctx).await? else {
        return Ok(None);
    };
    tracing::debug!(
        invocation_id = %ctx.invocation_id(),
        agent = %ctx.agent().name(),
        calls = call_ids.len(),
        "Resuming calls with supplied credentials"
    );
    handle_function_calls(ctx, &original_event, tools, Some(&call_ids)).await
}

async fn collect_answered_requests(
    ctx: &InvocationContext,
) -> Result<Option<(Event, HashSet<String>)>> {
    let session = ctx.session().read().await;
    let events = apply_rewinds(&session.events);
    let Some(last) = events.last() else {
        return Ok(None);
    };
    if !last.is_user() {
        return Ok(None);
    }

    let mut credentials = StateMap::new();
    let mut original_ids = HashSet::new();
    for response in last.function_responses() {
        if response.name != REQUEST_CREDENTIAL_FUNCTION_NAME {
            continue;
        }
        let answered: AuthConfig = serde_json::from_value(response.response.clone())?;
        if let Some(credential) = &answered.exchanged_credential {
            credentials.insert(
                credential_state_key(&answered.credential_key),
                serde_json::to_value(credential)?,
            );
        }

        let Some(request_event) = find_matching_function_call(&events, &response.id) else {
            continue;
        };
        for call in request_event.function_calls() {
            if call.id == response.id {
                let request: CredentialRequest = serde_json::from_value(call.args.clone())?;
                original_ids.insert(request.function_call_id);
            }
        }
    }
    if original_ids.is_empty() {
        return Ok(None);
    }
    ctx.absorb_temp_delta(&credentials);

    let original_event = events.iter().rev().find(|event| {
        event
            .function_calls()
            .iter()
            .any(|call| original_ids.contains(&call.id))
    });
    Ok(original_event.map(|event| ((*event).clone(), original_ids)))
}
