use std::sync::Arc;

use async_stream::try_stream;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use super::Agent;
use crate::context::InvocationContext;
use crate::error::WeftError;
use crate::events::{Event, EventStream};

type Delivery = (Result<Event, WeftError>, oneshot::Sender<()>);

/// Run every child on its own branch, concurrently.
///
/// Each branch hands over one whole event at a time and waits until the
/// consumer has come back for the next item before producing another, so a
/// branch never runs ahead of what downstream has processed. Dropping the
/// stream aborts the branches.
pub(super) fn run(agent: Arc<Agent>, ctx: InvocationContext) -> EventStream {
    Box::pin(try_stream! {
        let (tx, mut rx) = mpsc::channel::<Delivery>(agent.sub_agents().len().max(1));
        let mut branches = JoinSet::new();

        for child in agent.sub_agents() {
            let child = Arc::clone(child);
            let child_ctx = ctx.create_child_context(Arc::clone(&child));
            let tx = tx.clone();
            branches.spawn(async move {
                let mut events = child.run(&child_ctx);
                while let Some(item) = events.next().await {
                    let failed = item.is_err();
                    let (ack_tx, ack_rx) = oneshot::channel();
                    if tx.send((item, ack_tx)).await.is_err() {
                        return;
                    }
                    if ack_rx.await.is_err() || failed {
                        return;
                    }
                }
            });
        }
        drop(tx);

        while let Some((item, ack)) = rx.recv().await {
            let event = item?;
            yield event;
            let _ = ack.send(());
        }

        while branches.join_next().await.is_some() {}
    })
}
