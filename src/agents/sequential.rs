use std::sync::Arc;

use async_stream::try_stream;
use futures::StreamExt;

use super::Agent;
use crate::context::InvocationContext;
use crate::events::EventStream;

/// Run children in order within the same invocation; stop on escalate.
pub(super) fn run(agent: Arc<Agent>, ctx: InvocationContext) -> EventStream {
    Box::pin(try_stream! {
        for child in agent.sub_agents() {
            let mut events = child.run(&ctx);
            while let Some(event) = events.next().await {
                let event = event?;
                let escalate = event.actions.escalate;
                yield event;
                if escalate {
                    tracing::debug!(agent = %agent.name(), child = %child.name(), "Sequence escalated");
                    return;
                }
            }
            if ctx.is_ended() {
                return;
            }
        }
    })
}
