pub mod client;
pub mod config;
pub mod connection;
pub mod executor;
pub mod health;
pub mod manager;
pub mod registry;
pub mod schema;
pub mod session;
pub mod state;
pub mod transport;
pub mod types;

pub use client::McpClient;
pub use config::LaunchSpec;
pub use connection::{ConnectionStatus, ServerConnection};
pub use manager::{ConnectReport, McpManager, ServerStatus};
pub use registry::{ToolInfo, ToolRegistry};
pub use schema::{translate_tool, FunctionDeclaration, ParametersSchema, PropertySchema, SchemaType};
pub use session::{Connector, StdioConnector, ToolSession};
pub use types::{InitializeResult, McpTool, ServerInfo, ToolCallResult};

pub use toolhub_core::{ToolCallOutcome, ToolCallStatus, ToolhubError};
