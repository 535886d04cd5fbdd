//! Builds the conversation history sent to the model from session events.

use std::collections::{HashMap, HashSet};

use crate::agents::IncludeContents;
use crate::auth::REQUEST_CREDENTIAL_FUNCTION_NAME;
use crate::events::{apply_rewinds, Event, EventCompaction};
use crate::types::{Content, Part, Role};

/// Model-facing contents for `agent_name` running on `branch`.
///
/// Rewinds are applied and compactions substituted first. Events from other
/// branches, empty events and credential-request plumbing are dropped.
/// Function responses are moved directly after their calls, and replies
/// from other agents are reframed as user-side context.
pub fn build_contents(
    events: &[Event],
    agent_name: &str,
    branch: Option<&str>,
    include: IncludeContents,
) -> Vec<Content> {
    let visible = apply_rewinds(events);
    let history = substitute_compactions(visible);

    let mut filtered: Vec<Event> = history
        .into_iter()
        .filter(|event| is_visible_on_branch(branch, event))
        .filter_map(strip_credential_parts)
        .collect();

    if include == IncludeContents::None {
        let start = filtered
            .iter()
            .rposition(|event| event.is_user() || event.author != agent_name)
            .unwrap_or(0);
        filtered.drain(..start);
    }

    let arranged = rearrange_latest_function_response(filtered);
    let arranged = rearrange_async_function_responses(arranged);

    arranged
        .into_iter()
        .filter_map(|event| {
            let is_foreign = !event.is_user() && event.author != agent_name;
            let content = event.content?;
            if is_foreign {
                Some(present_as_context(&event.author, &content))
            } else {
                Some(content)
            }
        })
        .collect()
}

/// An event is visible when it has no branch, is on the same branch, or on
/// an ancestor branch.
fn is_visible_on_branch(branch: Option<&str>, event: &Event) -> bool {
    match (branch, event.branch.as_deref()) {
        (None, _) | (_, None) => true,
        (Some(current), Some(origin)) => {
            current == origin
                || current
                    .strip_prefix(origin)
                    .is_some_and(|rest| rest.starts_with('.'))
        }
    }
}

/// Replace compacted ranges with their summaries.
///
/// A compaction nested inside a wider one is ignored. Summaries are placed
/// at the start timestamp of the range they cover.
fn substitute_compactions(events: Vec<&Event>) -> Vec<Event> {
    let compactions: Vec<(&Event, &EventCompaction)> = events
        .iter()
        .filter_map(|event| event.actions.compaction.as_ref().map(|c| (*event, c)))
        .collect();
    if compactions.is_empty() {
        return events.into_iter().cloned().collect();
    }

    let kept: Vec<(&Event, &EventCompaction)> = compactions
        .iter()
        .enumerate()
        .filter(|(index, (_, compaction))| {
            !compactions.iter().enumerate().any(|(other_index, (_, other))| {
                other_index != *index
                    && other.contains(compaction)
                    && (!compaction.contains(other) || other_index > *index)
            })
        })
        .map(|(_, entry)| *entry)
        .collect();

    let mut result: Vec<Event> = events
        .into_iter()
        .filter(|event| event.actions.compaction.is_none())
        .filter(|event| !kept.iter().any(|(_, c)| c.covers(event.timestamp)))
        .cloned()
        .collect();

    for (source, compaction) in kept {
        let mut summary = Event::new(&source.invocation_id, &source.author)
            .with_branch(source.branch.clone())
            .with_content(Content::new(Role::Model, compaction.compacted_content.parts.clone()));
        summary.id = source.id.clone();
        summary.timestamp = compaction.start_timestamp;
        result.push(summary);
    }
    result.sort_by_key(|event| event.timestamp);
    result
}

fn is_credential_part(part: &Part) -> bool {
    match part {
        Part::FunctionCall(call) => call.name == REQUEST_CREDENTIAL_FUNCTION_NAME,
        Part::FunctionResponse(response) => response.name == REQUEST_CREDENTIAL_FUNCTION_NAME,
        _ => false,
    }
}

/// Drop credential-request calls and responses; `None` when nothing else remains.
fn strip_credential_parts(mut event: Event) -> Option<Event> {
    let content = event.content.as_mut()?;
    content.parts.retain(|part| !is_credential_part(part));
    if content.is_empty() {
        return None;
    }
    Some(event)
}

fn response_ids(event: &Event) -> HashSet<String> {
    event
        .function_responses()
        .into_iter()
        .map(|r| r.id.clone())
        .collect()
}

fn call_ids(event: &Event) -> HashSet<String> {
    event.function_calls().into_iter().map(|c| c.id.clone()).collect()
}

/// Fold the function-response parts of several events into the first one.
fn merge_response_events(mut events: Vec<Event>) -> Option<Event> {
    let mut merged = events.first().cloned()?;
    let parts: Vec<Part> = events
        .iter_mut()
        .filter_map(|event| event.content.take())
        .flat_map(|content| content.parts)
        .filter(|part| matches!(part, Part::FunctionResponse(_)))
        .collect();
    merged.content = Some(Content::new(Role::User, parts));
    Some(merged)
}

/// When the latest event answers calls from further back, move every
/// answer to those calls directly after them.
fn rearrange_latest_function_response(events: Vec<Event>) -> Vec<Event> {
    let Some(latest) = events.last() else {
        return events;
    };
    let latest_ids = response_ids(latest);
    if latest_ids.is_empty() {
        return events;
    }
    if events.len() >= 2 && !call_ids(&events[events.len() - 2]).is_disjoint(&latest_ids) {
        return events;
    }
    let Some(call_index) = events[..events.len() - 1]
        .iter()
        .rposition(|event| !call_ids(event).is_disjoint(&latest_ids))
    else {
        return events;
    };

    let answered = call_ids(&events[call_index]);
    let mut events = events;
    let tail = events.split_off(call_index + 1);
    let responses: Vec<Event> = tail
        .into_iter()
        .filter(|event| !response_ids(event).is_disjoint(&answered))
        .collect();
    events.extend(merge_response_events(responses));
    events
}

/// Place each call's responses immediately after it, merged into one event.
fn rearrange_async_function_responses(events: Vec<Event>) -> Vec<Event> {
    let mut response_index: HashMap<String, usize> = HashMap::new();
    for (index, event) in events.iter().enumerate() {
        for id in response_ids(event) {
            response_index.insert(id, index);
        }
    }

    let mut result = Vec::with_capacity(events.len());
    for event in &events {
        if !event.function_responses().is_empty() {
            continue;
        }
        result.push(event.clone());

        let calls = event.function_calls();
        if calls.is_empty() {
            continue;
        }
        let mut indices: Vec<usize> = calls
            .iter()
            .filter_map(|call| response_index.get(&call.id).copied())
            .collect();
        indices.sort_unstable();
        indices.dedup();
        let responses = indices.into_iter().map(|i| events[i].clone()).collect();
        result.extend(merge_response_events(responses));
    }
    result
}

/// Present another agent's turn as user-side context.
fn present_as_context(author: &str, content: &Content) -> Content {
    let mut parts = vec![Part::text("For context:")];
    for part in &content.parts {
        let text = match part {
            Part::Text { text } if text.is_empty() => continue,
            Part::Text { text } => format!("[{author}] said: {text}"),
            Part::FunctionCall(call) => format!(
                "[{author}] called tool `{}` with parameters: {}",
                call.name, call.args
            ),
            Part::FunctionResponse(response) => format!(
                "[{author}] `{}` tool returned result: {}",
                response.name, response.response
            ),
            Part::InlineData(blob) => {
                parts.push(Part::InlineData(blob.clone()));
                continue;
            }
        };
        parts.push(Part::text(text));
    }
    Content::new(Role::User, parts)
}
