use std::sync::Arc;

use async_stream::try_stream;
use futures::StreamExt;

use super::Agent;
use crate::context::InvocationContext;
use crate::events::EventStream;

/// Repeat the children in order until escalation, end of invocation or
/// `max_iterations` full passes.
pub(super) fn run(
    agent: Arc<Agent>,
    ctx: InvocationContext,
    max_iterations: Option<usize>,
) -> EventStream {
    Box::pin(try_stream! {
        if agent.sub_agents().is_empty() {
            return;
        }
        let mut iteration = 0usize;
        while max_iterations.map_or(true, |max| iteration < max) {
            iteration += 1;
            tracing::debug!(agent = %agent.name(), iteration, "Loop iteration");
            for child in agent.sub_agents() {
                let mut events = child.run(&ctx);
                while let Some(event) = events.next().await {
                    let event = event?;
                    let escalate = event.actions.escalate;
                    yield event;
                    if escalate {
                        tracing::debug!(agent = %agent.name(), iteration, "Loop escalated");
                        return;
                    }
                }
                if ctx.is_ended() {
                    return;
                }
            }
        }
    })
}
