//! Weft: a multi-agent runtime.
//!
//! Agents form a tree: model-driven leaves plus Sequential, Parallel, Loop
//! and Graph composites. A [`runner::Runner`] executes one user turn against
//! a persistent session, streaming every event the tree produces. Events are
//! the only way state changes, which makes rewind and compaction plain
//! appends to the session log.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use weft::prelude::*;
//!
//! # async fn example(model: Arc<dyn Llm>) -> weft::error::Result<()> {
//! let agent = Agent::llm(
//!     "assistant",
//!     LlmAgent::builder()
//!         .model(ModelRef::Instance(model))
//!         .instruction("Answer briefly.")
//!         .build(),
//! );
//! let services = Services::new(Arc::new(InMemorySessionService::new()));
//! let runner = Runner::new("demo", agent, services)?;
//!
//! let mut events = runner.run("user-1", "session-1", Content::user("Hello!"));
//! while let Some(event) = events.next().await {
//!     let event = event?;
//!     println!("{}: {}", event.author, event.text());
//! }
//! # Ok(())
//! # }
//! ```

pub mod agents;
pub mod artifacts;
pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod flows;
pub mod memory;
pub mod models;
pub mod prelude;
pub mod runner;
pub mod sessions;
pub mod state;
pub mod tools;
pub mod types;
pub mod util;

#[cfg(feature = "mcp")]
pub mod mcp;
