//! Execution contexts: per-turn invocation context, and the callback and
//! tool contexts layered on top of it.

mod callback;
mod invocation;
mod tool;

pub use callback::CallbackContext;
pub use invocation::{new_invocation_id, InvocationContext, Services, SessionKey};
pub use tool::ToolContext;


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::testing::context_for;
    use super::*;
    use crate::agents::Agent;
    use crate::auth::{credential_state_key, AuthConfig, AuthCredential};
    use crate::config::RunConfig;
    use crate::error::WeftError;
    use crate::types::Part;

    fn tree() -> Agent {
        Agent::parallel(
            "root",
            vec![Agent::sequential("left", vec![]), Agent::sequential("right", vec![])],
        )
    }

    #[test]
    fn llm_call_ceiling_is_enforced() {
        let ctx = context_for(tree(), RunConfig::builder().max_llm_calls(2).build());
        assert!(ctx.increment_llm_call_count().is_ok());
        assert!(ctx.increment_llm_call_count().is_ok());
        let err = ctx.increment_llm_call_count().unwrap_err();
        assert!(matches!(err, WeftError::LlmCallLimitExceeded { limit: 2 }));
        assert!(err.is_fatal());
    }

    #[test]
    fn zero_ceiling_disables_the_check() {
        let ctx = context_for(tree(), RunConfig::builder().max_llm_calls(0).build());
        for _ in 0..1_000 {
            ctx.increment_llm_call_count().unwrap();
        }
    }

    #[test]
    fn child_context_extends_branch_and_shares_counter() {
        let ctx = context_for(tree(), RunConfig::default());
        let left = Arc::clone(&ctx.root_agent().sub_agents()[0]);
        let child = ctx.create_child_context(left);

        assert_ne!(child.invocation_id(), ctx.invocation_id());
        assert_eq!(child.branch(), Some("root.left"));
        assert!(Arc::ptr_eq(child.session(), ctx.session()));

        child.increment_llm_call_count().unwrap();
        assert_eq!(ctx.llm_call_count(), 1);

        child.end_invocation();
        assert!(child.is_ended());
        assert!(!ctx.is_ended());

        ctx.end_invocation();
        let other = ctx.create_child_context(Arc::clone(&ctx.root_agent().sub_agents()[1]));
        assert!(other.is_ended());
    }

    #[test]
    fn for_agent_keeps_invocation() {
        let ctx = context_for(tree(), RunConfig::default());
        let right = Arc::clone(&ctx.root_agent().sub_agents()[1]);
        let moved = ctx.for_agent(right);
        assert_eq!(moved.invocation_id(), ctx.invocation_id());
        assert_eq!(moved.agent().name(), "right");
        assert_eq!(moved.branch(), None);
    }

    #[tokio::test]
    async fn tool_context_records_actions_and_artifacts() {
        let ctx = context_for(tree(), RunConfig::default());
        let tool_ctx = ToolContext::new(CallbackContext::new(&ctx).await, "call-1");

        tool_ctx.state().set("answer", json!(42));
        tool_ctx.escalate();
        tool_ctx.transfer_to_agent("right");
        let version = tool_ctx
            .save_artifact("report.txt", Part::text("done"))
            .await
            .unwrap();
        tool_ctx.request_credential(AuthConfig::new("github", json!({"type": "oauth2"})));

        let actions = tool_ctx.actions();
        assert_eq!(version, 0);
        assert_eq!(actions.state_delta.get("answer"), Some(&json!(42)));
        assert!(actions.escalate);
        assert_eq!(actions.transfer_to_agent.as_deref(), Some("right"));
        assert_eq!(actions.artifact_delta.get("report.txt"), Some(&0));
        assert!(actions.requested_auth_configs.contains_key("call-1"));
    }

    #[tokio::test]
    async fn temp_state_is_visible_to_later_contexts_in_the_turn() {
        let ctx = context_for(tree(), RunConfig::default());
        let credential = AuthCredential {
            auth_type: "bearer".into(),
            payload: json!({"token": "t"}),
        };
        let mut delta = crate::types::StateMap::new();
        delta.insert(
            credential_state_key("github"),
            serde_json::to_value(&credential).unwrap(),
        );
        delta.insert("plain".into(), json!(1));
        ctx.absorb_temp_delta(&delta);

        let tool_ctx = ToolContext::new(CallbackContext::new(&ctx).await, "call-2");
        let config = AuthConfig::new("github", json!({}));
        assert_eq!(tool_ctx.get_auth_response(&config), Some(credential));
        assert!(!tool_ctx.state().has("plain"));
    }
}
