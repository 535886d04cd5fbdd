//! Model registry for resolving model names to [`Llm`] instances.

use std::sync::Arc;

use regex::Regex;

use super::Llm;
use crate::error::{Result, WeftError};

/// Creates a model for a name matched by a registered pattern.
pub trait LlmFactory: Send + Sync {
    fn create(&self, model_name: &str) -> Result<Arc<dyn Llm>>;
}

impl<F> LlmFactory for F
where
    F: Fn(&str) -> Result<Arc<dyn Llm>> + Send + Sync,
{
    fn create(&self, model_name: &str) -> Result<Arc<dyn Llm>> {
        self(model_name)
    }
}

/// Registry mapping model-name patterns to factories.
///
/// Built once at startup and handed to the runner; later registrations win.
#[derive(Default)]
pub struct LlmRegistry {
    entries: Vec<(Regex, Arc<dyn LlmFactory>)>,
}

impl LlmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for names fully matching `pattern`.
    pub fn register(&mut self, pattern: &str, factory: Arc<dyn LlmFactory>) -> Result<()> {
        let anchored = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|e| WeftError::Configuration(format!("invalid model pattern '{pattern}': {e}")))?;
        self.entries.push((anchored, factory));
        Ok(())
    }

    /// Register a ready instance under its exact model name.
    pub fn register_instance(&mut self, llm: Arc<dyn Llm>) -> Result<()> {
        let pattern = regex::escape(llm.model_name());
        let factory = move |_: &str| -> Result<Arc<dyn Llm>> { Ok(Arc::clone(&llm)) };
        self.register(&pattern, Arc::new(factory))
    }

    /// Create the model registered for `model_name`.
    pub fn resolve(&self, model_name: &str) -> Result<Arc<dyn Llm>> {
        self.entries
            .iter()
            .rev()
            .find(|(pattern, _)| pattern.is_match(model_name))
            .ok_or_else(|| {
                WeftError::ModelNotFound(format!("No model registered for '{model_name}'"))
            })?
            .1
            .create(model_name)
    }

    pub fn has_model(&self, model_name: &str) -> bool {
        self.entries.iter().any(|(pattern, _)| pattern.is_match(model_name))
    }
}

impl std::fmt::Debug for LlmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmRegistry")
            .field(
                "patterns",
                &self.entries.iter().map(|(p, _)| p.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LlmRequest, LlmResponse, LlmResponseStream};
    use crate::types::Content;
    use async_trait::async_trait;
    use futures::stream;

    struct StubLlm {
        name: String,
    }

    #[async_trait]
    impl Llm for StubLlm {
        fn model_name(&self) -> &str {
            &self.name
        }

        async fn generate(&self, _request: LlmRequest, _stream: bool) -> Result<LlmResponseStream> {
            let response = LlmResponse::from_content(Content::model(self.name.clone()));
            Ok(Box::pin(stream::iter(vec![Ok(response)])))
        }
    }

    fn stub_factory(name: &str) -> Result<Arc<dyn Llm>> {
        Ok(Arc::new(StubLlm {
            name: name.to_string(),
        }))
    }

    #[test]
    fn resolves_by_full_pattern_match() {
        let mut registry = LlmRegistry::new();
        registry.register("stub-.*", Arc::new(stub_factory)).unwrap();

        let llm = registry.resolve("stub-large").unwrap();
        assert_eq!(llm.model_name(), "stub-large");
        assert!(!registry.has_model("my-stub-large"));
        assert!(matches!(
            registry.resolve("other"),
            Err(WeftError::ModelNotFound(_))
        ));
    }

    #[test]
    fn later_registration_wins() {
        let mut registry = LlmRegistry::new();
        registry.register(".*", Arc::new(stub_factory)).unwrap();
        registry
            .register_instance(Arc::new(StubLlm {
                name: "pinned".into(),
            }))
            .unwrap();

        assert_eq!(registry.resolve("pinned").unwrap().model_name(), "pinned");
        assert_eq!(registry.resolve("free").unwrap().model_name(), "free");
    }

    #[test]
    fn invalid_pattern_is_configuration_error() {
        let mut registry = LlmRegistry::new();
        let err = registry.register("(", Arc::new(stub_factory)).unwrap_err();
        assert!(matches!(err, WeftError::Configuration(_)));
    }
}
