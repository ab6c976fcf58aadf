//! MCP (Model Context Protocol) Server Implementation
//!
//! Exposes the knowledge base to MCP clients over stdio, following the
//! JSON-RPC 2.0 and MCP protocol version 2025-06-18.


pub mod protocol;
pub mod server;
pub mod tools;

pub use server::{ConnectionState, McpServer, ToolHandler};
pub use tools::register_knowledge_base_tools;
