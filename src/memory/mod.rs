//! Long-term memory across sessions.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sessions::Session;
use crate::types::Content;
use crate::util::lock;

/// One remembered piece of conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    pub content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Ranked search results, best match first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchMemoryResponse {
    pub memories: Vec<MemoryEntry>,
}

#[async_trait]
pub trait MemoryService: Send + Sync {
    /// Ingest the session's events.
    async fn add_session_to_memory(&self, session: &Session) -> Result<()>;

    async fn search_memory(
        &self,
        app_name: &str,
        user_id: &str,
        query: &str,
    ) -> Result<SearchMemoryResponse>;
}

/// Keyword-matching memory kept in process.
#[derive(Debug, Default)]
pub struct InMemoryMemoryService {
    /// (app, user) → session id → entries.
    entries: Mutex<HashMap<(String, String), HashMap<String, Vec<MemoryEntry>>>>,
}

impl InMemoryMemoryService {
    pub fn new() -> Self {
        Self::default()
    }
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl MemoryService for InMemoryMemoryService {
    async fn add_session_to_memory(&self, session: &Session) -> Result<()> {
        let entries: Vec<MemoryEntry> = session
            .visible_events()
            .into_iter()
            .filter_map(|event| {
                let content = event.content.as_ref()?;
                if content.text().trim().is_empty() {
                    return None;
                }
                Some(MemoryEntry {
                    content: content.clone(),
                    author: Some(event.author.clone()),
                    timestamp: Some(event.timestamp),
                })
            })
            .collect();

        lock(&self.entries)
            .entry((session.app_name.clone(), session.user_id.clone()))
            .or_default()
            .insert(session.id.clone(), entries);
        Ok(())
    }

    async fn search_memory(
        &self,
        app_name: &str,
        user_id: &str,
        query: &str,
    ) -> Result<SearchMemoryResponse> {
        let query_words = words(query);
        if query_words.is_empty() {
            return Ok(SearchMemoryResponse::default());
        }

        let store = lock(&self.entries);
        let Some(sessions) = store.get(&(app_name.to_string(), user_id.to_string())) else {
            return Ok(SearchMemoryResponse::default());
        };

        let mut scored: Vec<(usize, &MemoryEntry)> = sessions
            .values()
            .flatten()
            .filter_map(|entry| {
                let hits = words(&entry.content.text())
                    .intersection(&query_words)
                    .count();
                (hits > 0).then_some((hits, entry))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.timestamp.cmp(&b.1.timestamp)));

        Ok(SearchMemoryResponse {
            memories: scored.into_iter().map(|(_, entry)| entry.clone()).collect(),
        })
    }
}
