//! Keeps one MCP session open and replaces it when it drops.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use super::{McpConnection, McpConnector, McpError, McpToolResult, McpToolSchema};
use crate::util::{with_timeout, RetryPolicy};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RECONNECTS: u32 = 2;

/// Lazily connects, and on a closed or failed connection reconnects and
/// retries the request, at most `max_reconnects` times.
pub struct McpSessionManager {
    connector: Arc<dyn McpConnector>,
    connection: Mutex<Option<Arc<dyn McpConnection>>>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl McpSessionManager {
    pub fn new(connector: Arc<dyn McpConnector>) -> Self {
        Self {
            connector,
            connection: Mutex::new(None),
            retry: RetryPolicy {
                initial_backoff: Duration::from_millis(100),
                max_backoff: Duration::from_secs(2),
                ..RetryPolicy::with_max_attempts(DEFAULT_MAX_RECONNECTS + 1)
            },
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_max_reconnects(mut self, max_reconnects: u32) -> Self {
        self.retry.max_attempts = max_reconnects + 1;
        self
    }

    /// Deadline for connecting and for each request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn list_tools(&self) -> Result<Vec<McpToolSchema>, McpError> {
        self.with_reconnect(|connection| async move { connection.list_tools().await })
            .await
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult, McpError> {
        self.with_reconnect(|connection| {
            let arguments = arguments.clone();
            async move { connection.call_tool(name, arguments).await }
        })
        .await
    }

    /// Drop the current session; the next request opens a new one.
    pub async fn close(&self) {
        self.connection.lock().await.take();
    }

    async fn session(&self) -> Result<Arc<dyn McpConnection>, McpError> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            return Ok(Arc::clone(connection));
        }
        let connection = with_timeout(self.timeout, self.connector.connect()).await?;
        *slot = Some(Arc::clone(&connection));
        Ok(connection)
    }

    /// Run `operation` on the session, dropping it and reconnecting after
    /// transport failures.
    async fn with_reconnect<F, Fut, T>(&self, operation: F) -> Result<T, McpError>
    where
        F: Fn(Arc<dyn McpConnection>) -> Fut,
        Fut: Future<Output = Result<T, McpError>>,
    {
        let operation = &operation;
        self.retry
            .execute_when(
                move || async move {
                    let connection = self.session().await?;
                    let result = with_timeout(self.timeout, operation(connection)).await;
                    if let Err(error) = &result {
                        if error.is_reconnectable() {
                            tracing::warn!(error = %error, "MCP session failed, dropping it");
                            self.close().await;
                        }
                    }
                    result
                },
                McpError::is_reconnectable,
            )
            .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    /// Connection whose calls replay scripted results.
    pub(crate) struct ScriptedConnection {
        pub tools: Vec<McpToolSchema>,
        pub results: Mutex<VecDeque<Result<McpToolResult, McpError>>>,
    }

    #[async_trait]
    impl McpConnection for ScriptedConnection {
        async fn list_tools(&self) -> Result<Vec<McpToolSchema>, McpError> {
            Ok(self.tools.clone())
        }

        async fn call_tool(&self, name: &str, _arguments: Value) -> Result<McpToolResult, McpError> {
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(McpError::Closed(format!("{name}: no scripted result"))))
        }
    }

    /// Hands out scripted connections in order, counting connects.
    pub(crate) struct ScriptedConnector {
        pub connections: Mutex<VecDeque<Arc<dyn McpConnection>>>,
        pub connects: AtomicUsize,
    }

    impl ScriptedConnector {
        pub(crate) fn new(connections: Vec<Arc<dyn McpConnection>>) -> Arc<Self> {
            Arc::new(Self {
                connections: Mutex::new(connections.into()),
                connects: AtomicUsize::new(0),
            })
        }

        pub(crate) fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl McpConnector for ScriptedConnector {
        async fn connect(&self) -> Result<Arc<dyn McpConnection>, McpError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.connections
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| McpError::Connection("connection refused".into()))
        }
    }

    pub(crate) fn connection(
        tools: Vec<McpToolSchema>,
        results: Vec<Result<McpToolResult, McpError>>,
    ) -> Arc<dyn McpConnection> {
        Arc::new(ScriptedConnection {
            tools,
            results: Mutex::new(results.into()),
        })
    }

    pub(crate) fn text(value: &str) -> McpToolResult {
        McpToolResult {
            text_content: Some(value.to_string()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::testing::{connection, text, ScriptedConnector};
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_a_closed_session() {
        let connector = ScriptedConnector::new(vec![
            connection(vec![], vec![Err(McpError::Closed("reset by peer".into()))]),
            connection(vec![], vec![Ok(text("sunny"))]),
        ]);
        let manager = McpSessionManager::new(connector.clone());

        let result = manager.call_tool("weather", json!({})).await.unwrap();
        assert_eq!(result.into_value_or_text(), json!("sunny"));
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_are_bounded() {
        let connector = ScriptedConnector::new(vec![
            connection(vec![], vec![Err(McpError::Closed("first".into()))]),
            connection(vec![], vec![Err(McpError::Closed("second".into()))]),
        ]);
        let manager = McpSessionManager::new(connector.clone()).with_max_reconnects(1);

        let err = manager.call_tool("weather", json!({})).await.unwrap_err();
        assert_eq!(err, McpError::Closed("second".into()));
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn execution_errors_are_not_retried() {
        let failure = McpError::Execution {
            tool: "weather".into(),
            message: "unknown city".into(),
        };
        let connector = ScriptedConnector::new(vec![connection(vec![], vec![Err(failure.clone())])]);
        let manager = McpSessionManager::new(connector.clone());

        assert_eq!(manager.call_tool("weather", json!({})).await.unwrap_err(), failure);
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn session_is_reused_between_requests() {
        let connector = ScriptedConnector::new(vec![connection(
            vec![],
            vec![Ok(text("one")), Ok(text("two"))],
        )]);
        let manager = McpSessionManager::new(connector.clone());

        manager.call_tool("a", json!({})).await.unwrap();
        manager.call_tool("b", json!({})).await.unwrap();
        assert_eq!(connector.connects(), 1);
    }

    struct Hanging;

    #[async_trait::async_trait]
    impl McpConnection for Hanging {
        async fn list_tools(&self) -> Result<Vec<McpToolSchema>, McpError> {
            std::future::pending().await
        }

        async fn call_tool(&self, _name: &str, _arguments: Value) -> Result<McpToolResult, McpError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_requests_time_out() {
        let connector = ScriptedConnector::new(vec![Arc::new(Hanging) as Arc<dyn McpConnection>]);
        let manager = McpSessionManager::new(connector).with_timeout(Duration::from_millis(500));

        assert_eq!(manager.list_tools().await.unwrap_err(), McpError::Timeout(500));
    }
}
