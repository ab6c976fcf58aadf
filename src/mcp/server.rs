//! MCP Server Implementation
//!
//! Line-delimited JSON-RPC over any async reader/writer pair, with tool
//! registration and dispatch. `serve_stdio` binds it to the process streams.

use crate::mcp::protocol::*;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// MCP Server state and configuration
pub struct McpServer {
    /// Server implementation information
    pub server_info: Implementation,
    /// Server capabilities
    pub capabilities: ServerCapabilities,
    /// Registered tools, listed in name order
    tools: RwLock<BTreeMap<String, Tool>>,
    tool_handlers: RwLock<BTreeMap<String, Box<dyn ToolHandler>>>,
    connection_state: RwLock<ConnectionState>,
}

/// Connection state tracking
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// Tool handler trait for implementing tool execution
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult>;
}

impl McpServer {
    #[inline]
    pub fn new(name: String, version: String) -> Self {
        Self {
            server_info: Implementation { name, version },
            capabilities: ServerCapabilities {
                experimental: None,
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            tools: RwLock::new(BTreeMap::new()),
            tool_handlers: RwLock::new(BTreeMap::new()),
            connection_state: RwLock::new(ConnectionState::Uninitialized),
        }
    }

    /// Register a tool with the server
    #[inline]
    pub async fn register_tool<H>(&self, tool: Tool, handler: H)
    where
        H: ToolHandler + 'static,
    {
        let tool_name = tool.name.clone();
        self.tools.write().await.insert(tool_name.clone(), tool);
        self.tool_handlers
            .write()
            .await
            .insert(tool_name.clone(), Box::new(handler));

        debug!("Registered tool: {}", tool_name);
    }

    /// Serve on stdin/stdout until the client closes stdin
    #[inline]
    pub async fn serve_stdio(self: Arc<Self>) -> Result<()> {
        info!("Starting MCP server with stdio transport");
        self.serve(BufReader::new(io::stdin()), io::stdout()).await
    }

    /// Read one JSON-RPC message per line from `reader` and write replies to `writer`
    #[inline]
    pub async fn serve<R, W>(self: Arc<Self>, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWriteExt + Unpin,
    {
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    info!("EOF reached, closing connection");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    if let Some(reply) = self.handle_line(trimmed).await {
                        send_message(&mut writer, &reply).await?;
                    }
                }
                Err(e) => {
                    error!("Error reading from input: {}", e);
                    break;
                }
            }
        }

        *self.connection_state.write().await = ConnectionState::Closed;
        info!("MCP server stopped");
        Ok(())
    }

    /// Handle one raw line, returning the reply to send if any
    #[inline]
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcMessage> {
        let raw_value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to parse JSON: {}", e);
                return Some(error_message(JsonRpcError::parse_error(), None));
            }
        };

        match parse_message(raw_value) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                error!("Message validation failed: {}", e);
                Some(error_message(JsonRpcError::invalid_request(), None))
            }
        }
    }

    /// Dispatch a parsed message; notifications and stray responses get no reply
    #[inline]
    pub async fn handle_message(&self, message: JsonRpcMessage) -> Option<JsonRpcMessage> {
        match message {
            JsonRpcMessage::Request(request) => Some(self.handle_request(request).await),
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(&notification).await;
                None
            }
            JsonRpcMessage::Response(_) | JsonRpcMessage::ErrorResponse(_) => {
                warn!("Received unexpected response message from client");
                None
            }
        }
    }

    /// Get current connection state
    #[inline]
    pub async fn connection_state(&self) -> ConnectionState {
        self.connection_state.read().await.clone()
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcMessage {
        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params).await,
            "tools/list" => self.handle_list_tools().await,
            "tools/call" => self.handle_call_tool(request.params).await,
            "ping" => Ok(serde_json::json!({})),
            _ => {
                debug!("Unknown method: {}", request.method);
                return error_message(JsonRpcError::method_not_found(), Some(request.id));
            }
        };

        match response {
            Ok(result) => JsonRpcMessage::Response(JsonRpcResponse::new(result, request.id)),
            Err(RequestError::InvalidParams(message)) => {
                warn!("Invalid params for {}: {}", request.method, message);
                error_message(JsonRpcError::invalid_params(Some(message)), Some(request.id))
            }
            Err(RequestError::Protocol(error)) => error_message(error, Some(request.id)),
            Err(RequestError::Internal(e)) => {
                error!("Error handling request {}: {}", request.method, e);
                error_message(
                    JsonRpcError::internal_error(Some(e.to_string())),
                    Some(request.id),
                )
            }
        }
    }

    async fn handle_notification(&self, notification: &JsonRpcNotification) {
        match notification.method.as_str() {
            "initialized" | "notifications/initialized" => {
                *self.connection_state.write().await = ConnectionState::Ready;
                info!("Server ready to handle requests");
            }
            "notifications/cancelled" => debug!("Received cancellation notification"),
            _ => warn!("Unknown notification method: {}", notification.method),
        }
    }

    async fn handle_initialize(
        &self,
        params: Option<Value>,
    ) -> std::result::Result<Value, RequestError> {
        let params: InitializeParams = parse_params(params, "initialize")?;

        if params.protocol_version != MCP_VERSION {
            return Err(RequestError::Protocol(JsonRpcError::new(
                error_codes::INVALID_PROTOCOL_VERSION,
                format!(
                    "Unsupported protocol version: {}. Supported versions: {}",
                    params.protocol_version, MCP_VERSION
                ),
                None,
            )));
        }

        *self.connection_state.write().await = ConnectionState::Initializing;

        let result = InitializeResult {
            protocol_version: MCP_VERSION.to_string(),
            capabilities: self.capabilities.clone(),
            server_info: self.server_info.clone(),
            instructions: Some(
                "Knowledge base search server. Call init_knowledge_base before searching."
                    .to_string(),
            ),
        };

        info!("Client initialized: {}", params.client_info.name);
        Ok(serde_json::to_value(result).map_err(anyhow::Error::from)?)
    }

    async fn handle_list_tools(&self) -> std::result::Result<Value, RequestError> {
        let tools: Vec<Tool> = self.tools.read().await.values().cloned().collect();
        Ok(serde_json::to_value(ListToolsResult { tools }).map_err(anyhow::Error::from)?)
    }

    async fn handle_call_tool(
        &self,
        params: Option<Value>,
    ) -> std::result::Result<Value, RequestError> {
        let params: CallToolParams = parse_params(params, "tools/call")?;

        let handlers = self.tool_handlers.read().await;
        let handler = handlers.get(&params.name).ok_or_else(|| {
            RequestError::InvalidParams(format!("Tool not found: {}", params.name))
        })?;

        debug!("Calling tool: {}", params.name);
        let result = handler.handle(params).await?;
        Ok(serde_json::to_value(result).map_err(anyhow::Error::from)?)
    }
}

/// Why a request could not produce a result
enum RequestError {
    InvalidParams(String),
    Protocol(JsonRpcError),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for RequestError {
    #[inline]
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e)
    }
}

fn parse_params<T>(params: Option<Value>, method: &str) -> std::result::Result<T, RequestError>
where
    T: serde::de::DeserializeOwned,
{
    let params =
        params.ok_or_else(|| RequestError::InvalidParams(format!("{method} missing parameters")))?;
    serde_json::from_value(params).map_err(|e| RequestError::InvalidParams(e.to_string()))
}

/// Parse a raw JSON value as a JSON-RPC 2.0 message
pub(crate) fn parse_message(value: Value) -> Result<JsonRpcMessage> {
    if value.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(anyhow!("missing or unsupported jsonrpc version"));
    }

    Ok(serde_json::from_value(value)?)
}

fn error_message(error: JsonRpcError, id: Option<RequestId>) -> JsonRpcMessage {
    JsonRpcMessage::ErrorResponse(JsonRpcErrorResponse::new(error, id))
}

async fn send_message<W>(writer: &mut W, message: &JsonRpcMessage) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let json = serde_json::to_string(message)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
