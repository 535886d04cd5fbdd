//! Turn execution over a session: run, rewind and compaction.

pub mod compaction;
mod rewind;

pub use compaction::{EventSummarizer, LlmEventSummarizer};

use std::collections::HashSet;
use std::sync::Arc;

use async_stream::try_stream;
use futures::StreamExt;

use crate::agents::llm::is_transferable_across_tree;
use crate::agents::Agent;
use crate::config::RunConfig;
use crate::context::{new_invocation_id, InvocationContext, Services, SessionKey};
use crate::error::{Result, WeftError};
use crate::events::{find_matching_function_call, Event, EventStream, USER_AUTHOR};
use crate::models::LlmRegistry;
use crate::sessions::{Session, SharedSession};
use crate::types::{Content, Part};

/// Runs an agent tree against sessions of one app.
#[derive(Clone)]
pub struct Runner {
    app_name: String,
    root_agent: Arc<Agent>,
    services: Services,
    llm_registry: Arc<LlmRegistry>,
    run_config: Arc<RunConfig>,
    summarizer: Option<Arc<dyn EventSummarizer>>,
}

impl Runner {
    /// Create a runner. Fails if the agent tree is malformed.
    pub fn new(
        app_name: impl Into<String>,
        root_agent: impl Into<Arc<Agent>>,
        services: Services,
    ) -> Result<Self> {
        let root_agent = root_agent.into();
        root_agent.validate_tree()?;
        Ok(Self {
            app_name: app_name.into(),
            root_agent,
            services,
            llm_registry: Arc::new(LlmRegistry::new()),
            run_config: Arc::new(RunConfig::default()),
            summarizer: None,
        })
    }

    pub fn with_llm_registry(mut self, registry: Arc<LlmRegistry>) -> Self {
        self.llm_registry = registry;
        self
    }

    pub fn with_run_config(mut self, run_config: RunConfig) -> Self {
        self.run_config = Arc::new(run_config);
        self
    }

    /// Summarizer used for periodic compaction.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn EventSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn root_agent(&self) -> &Arc<Agent> {
        &self.root_agent
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.run_config
    }

    /// Process one user message and stream the resulting events.
    ///
    /// Every non-partial event is appended to the session before it is
    /// yielded. Compaction, when configured, runs after the last event.
    pub fn run(
        &self,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        new_message: Content,
    ) -> EventStream {
        let runner = self.clone();
        let user_id = user_id.into();
        let session_id = session_id.into();
        Box::pin(try_stream! {
            let session = runner.load_session(&user_id, &session_id).await?.into_shared();
            let invocation_id = new_invocation_id();
            tracing::debug!(
                app = %runner.app_name,
                user = %user_id,
                session = %session_id,
                invocation_id = %invocation_id,
                "Run started"
            );

            let responding_agent = {
                let session = session.read().await;
                validate_function_responses(&session, &new_message)?
            };

            let mut user_event = Event::new(&invocation_id, USER_AUTHOR);
            let message = runner
                .save_input_blobs(&user_id, &session_id, &invocation_id, new_message, &mut user_event)
                .await?;
            user_event.content = Some(message.clone());
            runner.append(&session, user_event).await?;

            let agent = {
                let session = session.read().await;
                runner.select_agent(&session, responding_agent.as_deref())
            };
            let ctx = InvocationContext::new(
                Arc::clone(&session),
                SessionKey {
                    app_name: runner.app_name.clone(),
                    user_id: user_id.clone(),
                    session_id: session_id.clone(),
                },
                Arc::clone(&runner.root_agent),
                Some(message),
                runner.services.clone(),
                Arc::clone(&runner.llm_registry),
                Arc::clone(&runner.run_config),
            )
            .with_invocation_id(invocation_id);

            let mut events = agent.run(&ctx);
            while let Some(event) = events.next().await {
                let event = event?;
                if event.partial {
                    yield event;
                    continue;
                }
                ctx.absorb_temp_delta(&event.actions.state_delta);
                let event = runner.append(&session, event).await?;
                yield event;
            }
            drop(events);

            runner.compact(&session).await?;
            tracing::debug!(
                invocation_id = %ctx.invocation_id(),
                llm_calls = ctx.llm_call_count(),
                "Run finished"
            );
        })
    }

    /// Undo every invocation from `rewind_before_invocation_id` onwards.
    ///
    /// Appends one corrective event restoring state and artifacts to how they
    /// were right before that invocation. Nothing is changed when the
    /// invocation is not part of the session.
    pub async fn rewind(
        &self,
        user_id: &str,
        session_id: &str,
        rewind_before_invocation_id: &str,
    ) -> Result<Event> {
        let session = self.existing_session(user_id, session_id).await?;
        let plan = rewind::plan(&session, rewind_before_invocation_id)?;

        let scope = crate::artifacts::ArtifactScope::new(&self.app_name, user_id, session_id);
        let restores = rewind::load_restores(&self.services, &scope, &plan).await?;

        let mut event = Event::new(new_invocation_id(), USER_AUTHOR);
        event.actions.state_delta = plan.state_delta;
        event.actions.artifact_delta = rewind::artifact_delta(&restores);
        event.actions.rewind_before_invocation_id = Some(rewind_before_invocation_id.to_string());

        tracing::debug!(
            session = %session_id,
            target = %rewind_before_invocation_id,
            "Rewinding session"
        );
        let shared = session.into_shared();
        let event = self.append(&shared, event).await?;
        rewind::apply_restores(&self.services, &scope, restores).await?;
        Ok(event)
    }

    async fn existing_session(&self, user_id: &str, session_id: &str) -> Result<Session> {
        self.services
            .session_service
            .get_session(&self.app_name, user_id, session_id, None)
            .await?
            .ok_or_else(|| WeftError::SessionNotFound {
                app_name: self.app_name.clone(),
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
            })
    }

    async fn load_session(&self, user_id: &str, session_id: &str) -> Result<Session> {
        let service = &self.services.session_service;
        match service
            .get_session(&self.app_name, user_id, session_id, None)
            .await?
        {
            Some(session) => Ok(session),
            None if self.run_config.auto_create_session => {
                service
                    .create_session(&self.app_name, user_id, None, Some(session_id.to_string()))
                    .await
            }
            None => Err(WeftError::SessionNotFound {
                app_name: self.app_name.clone(),
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
            }),
        }
    }

    async fn append(&self, session: &SharedSession, event: Event) -> Result<Event> {
        let mut session = session.write().await;
        self.services
            .session_service
            .append_event(&mut session, event)
            .await
    }

    /// Move inline blobs into the artifact service, leaving a text note in their place.
    async fn save_input_blobs(
        &self,
        user_id: &str,
        session_id: &str,
        invocation_id: &str,
        mut message: Content,
        user_event: &mut Event,
    ) -> Result<Content> {
        if !self.run_config.save_input_blobs_as_artifacts {
            return Ok(message);
        }
        let Some(service) = &self.services.artifact_service else {
            return Err(WeftError::Artifact(
                "saving input blobs requires an artifact service".into(),
            ));
        };
        let scope = crate::artifacts::ArtifactScope::new(&self.app_name, user_id, session_id);
        for (index, part) in message.parts.iter_mut().enumerate() {
            if !matches!(part, Part::InlineData(_)) {
                continue;
            }
            let filename = format!("artifact_{invocation_id}_{index}");
            let blob = std::mem::replace(
                part,
                Part::text(format!("Uploaded file: {filename}. It is saved into artifacts")),
            );
            let version = service.save_artifact(&scope, &filename, blob).await?;
            user_event.actions.artifact_delta.insert(filename, version);
        }
        Ok(message)
    }

    /// The agent that should handle the next message.
    ///
    /// The agent whose call is being answered wins. Otherwise the most recent
    /// author that can still move across the tree, falling back to the root.
    fn select_agent(&self, session: &Session, responding_agent: Option<&str>) -> Arc<Agent> {
        if let Some(agent) = responding_agent.and_then(|name| Agent::find_agent(&self.root_agent, name)) {
            return agent;
        }
        for event in session.visible_events().into_iter().rev() {
            if event.is_user() {
                continue;
            }
            if event.author == self.root_agent.name() {
                return Arc::clone(&self.root_agent);
            }
            let Some(agent) = Agent::find_agent(&self.root_agent, &event.author) else {
                tracing::warn!(author = %event.author, "Event author is not in the agent tree");
                continue;
            };
            if is_transferable_across_tree(&self.root_agent, &agent) {
                return agent;
            }
        }
        Arc::clone(&self.root_agent)
    }

    async fn compact(&self, session: &SharedSession) -> Result<()> {
        let Some(config) = self.run_config.compaction else {
            return Ok(());
        };
        let Some(summarizer) = &self.summarizer else {
            tracing::warn!("Compaction is configured but no summarizer was provided");
            return Ok(());
        };
        let window = {
            let session = session.read().await;
            compaction::select_window(&session, &config)
        };
        let Some(window) = window else {
            return Ok(());
        };
        let Some(event) = compaction::summarize(summarizer.as_ref(), &window).await? else {
            return Ok(());
        };
        tracing::debug!(events = window.len(), "Compacted history");
        self.append(session, event).await?;
        Ok(())
    }
}

/// Check that function responses in `message` answer pending calls.
///
/// Returns the author of the call the first response answers.
fn validate_function_responses(session: &Session, message: &Content) -> Result<Option<String>> {
    let responses = message.function_responses();
    if responses.is_empty() {
        return Ok(None);
    }
    let events = session.visible_events();
    let answered: HashSet<&str> = events
        .iter()
        .flat_map(|event| event.function_responses())
        .map(|response| response.id.as_str())
        .collect();

    let mut author = None;
    for response in responses {
        let Some(call_event) = find_matching_function_call(&events, &response.id) else {
            return Err(WeftError::InvalidArgument(format!(
                "function response {} does not match any function call",
                response.id
            )));
        };
        if answered.contains(response.id.as_str()) {
            return Err(WeftError::InvalidArgument(format!(
                "function call {} was already answered",
                response.id
            )));
        }
        author.get_or_insert_with(|| call_event.author.clone());
    }
    Ok(author)
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("app_name", &self.app_name)
            .field("root_agent", &self.root_agent.name())
            .field("run_config", &self.run_config)
            .finish()
    }
}
