//! Model Context Protocol tools: sessions with reconnect, and a toolset adapter.

pub mod client;
pub mod connection;
pub mod error;
pub mod session;
pub mod toolset;

pub use client::{RmcpConnection, StdioConnector};
pub use connection::{McpConnection, McpConnector, McpToolResult, McpToolSchema};
pub use error::McpError;
pub use session::McpSessionManager;
pub use toolset::McpToolset;
