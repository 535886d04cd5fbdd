//! Read-side helpers over an ordered event log.

use std::collections::HashSet;

use super::Event;
use crate::types::FunctionCall;

/// Events left visible once every rewind marker has been applied.
///
/// Walking backwards, a rewind event hides itself and everything from the
/// first event of the targeted invocation up to it.
pub fn apply_rewinds(events: &[Event]) -> Vec<&Event> {
    let mut visible = Vec::with_capacity(events.len());
    let mut index = events.len();

    while index > 0 {
        index -= 1;
        let event = &events[index];
        match &event.actions.rewind_before_invocation_id {
            Some(target) => {
                if let Some(start) = events[..index]
                    .iter()
                    .position(|e| &e.invocation_id == target)
                {
                    index = start;
                }
            }
            None => visible.push(event),
        }
    }

    visible.reverse();
    visible
}

/// The most recent event containing a function call with `call_id`.
pub fn find_matching_function_call<'a>(
    events: &[&'a Event],
    call_id: &str,
) -> Option<&'a Event> {
    events
        .iter()
        .rev()
        .find(|event| event.function_calls().iter().any(|call| call.id == call_id))
        .copied()
}

/// Long-running calls that have not yet received a function response.
pub fn pending_long_running_calls<'a>(events: &[&'a Event]) -> Vec<(&'a Event, &'a FunctionCall)> {
    let answered: HashSet<&str> = events
        .iter()
        .flat_map(|event| event.function_responses())
        .map(|response| response.id.as_str())
        .collect();

    events
        .iter()
        .flat_map(|event| {
            event
                .function_calls()
                .into_iter()
                .filter(|call| event.long_running_tool_ids.contains(&call.id))
                .filter(|call| !answered.contains(call.id.as_str()))
                .map(move |call| (*event, call))
        })
        .collect()
}
