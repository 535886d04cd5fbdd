//! System instructions with `{key}` placeholders filled from state.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::context::CallbackContext;
use crate::error::{Result, WeftError};
use crate::state::{APP_PREFIX, TEMP_PREFIX, USER_PREFIX};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{+[^{}]*\}+").expect("placeholder regex must compile")
});

const ARTIFACT_PREFIX: &str = "artifact.";

/// Replace `{key}` with the state value under `key` and `{artifact.name}`
/// with the artifact's text. A trailing `?` makes a placeholder optional;
/// a missing required key is an error. Text that does not name a state key
/// is left untouched.
pub async fn inject_session_state(template: &str, ctx: &CallbackContext) -> Result<String> {
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;
    for found in PLACEHOLDER.find_iter(template) {
        rendered.push_str(&template[last..found.start()]);
        last = found.end();
        rendered.push_str(&resolve_placeholder(found.as_str(), ctx).await?);
    }
    rendered.push_str(&template[last..]);
    Ok(rendered)
}

async fn resolve_placeholder(raw: &str, ctx: &CallbackContext) -> Result<String> {
    let inner = raw.trim_matches(|c| c == '{' || c == '}').trim();
    let (name, optional) = match inner.strip_suffix('?') {
        Some(name) => (name, true),
        None => (inner, false),
    };

    if let Some(filename) = name.strip_prefix(ARTIFACT_PREFIX) {
        return match ctx.load_artifact(filename, None).await? {
            Some(part) => Ok(part.as_text().unwrap_or_default().to_string()),
            None if optional => Ok(String::new()),
            None => Err(WeftError::InvalidState(format!(
                "Artifact {filename} not found for instruction placeholder"
            ))),
        };
    }

    if !is_state_key(name) {
        return Ok(raw.to_string());
    }

    match ctx.state().get(name) {
        Some(Value::String(text)) => Ok(text),
        Some(value) => Ok(value.to_string()),
        None if optional => Ok(String::new()),
        None => Err(WeftError::InvalidState(format!(
            "Context variable not found: `{name}`"
        ))),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_state_key(name: &str) -> bool {
    [APP_PREFIX, USER_PREFIX, TEMP_PREFIX]
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .map_or_else(|| is_identifier(name), is_identifier)
}
