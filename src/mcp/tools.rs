//! MCP Tools Implementation
//!
//! Knowledge-base tools exposed over MCP. Each handler wraps a shared
//! [`Indexer`] and reports failures as tool results rather than protocol errors.

use crate::indexer::{Indexer, SyncOutcome};
use crate::mcp::protocol::*;
use crate::mcp::server::{McpServer, ToolHandler};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Number of chunks returned when the caller does not pass `limit`
pub const DEFAULT_SEARCH_LIMIT: usize = 4;
const MAX_SEARCH_LIMIT: usize = 50;

/// Runs a full initialization, optionally rebuilding from scratch
pub struct InitKnowledgeBaseHandler {
    indexer: Arc<Indexer>,
}

/// Embeds documents added since the last sync
pub struct UpdateKnowledgeBaseHandler {
    indexer: Arc<Indexer>,
}

/// Similarity search over the served index
pub struct SearchKnowledgeBaseHandler {
    indexer: Arc<Indexer>,
}

impl InitKnowledgeBaseHandler {
    #[inline]
    pub fn new(indexer: Arc<Indexer>) -> Self {
        Self { indexer }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "init_knowledge_base".to_string(),
            description: Some(
                "Initialize the knowledge base from the documents directory".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "force": {
                        "type": "boolean",
                        "description": "Optional: Rebuild the index from every document (default: false)"
                    }
                },
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for InitKnowledgeBaseHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let args = params.arguments.unwrap_or_default();
        let force = match args.get("force") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(force)) => *force,
            Some(other) => {
                return Ok(CallToolResult::error(format!(
                    "Parameter 'force' must be a boolean, got {other}"
                )));
            }
        };

        debug!("Initializing knowledge base: force={}", force);
        outcome_result(&self.indexer.initialize_knowledge_base(force).await)
    }
}

impl UpdateKnowledgeBaseHandler {
    #[inline]
    pub fn new(indexer: Arc<Indexer>) -> Self {
        Self { indexer }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "update_knowledge_base".to_string(),
            description: Some(
                "Embed documents added or changed since the last sync".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for UpdateKnowledgeBaseHandler {
    #[inline]
    async fn handle(&self, _params: CallToolParams) -> Result<CallToolResult> {
        debug!("Updating knowledge base");
        outcome_result(&self.indexer.update_knowledge_base().await)
    }
}

impl SearchKnowledgeBaseHandler {
    #[inline]
    pub fn new(indexer: Arc<Indexer>) -> Self {
        Self { indexer }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "search_knowledge_base".to_string(),
            description: Some("Search the knowledge base for relevant passages".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of results (default: 4)"
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for SearchKnowledgeBaseHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let args = params.arguments.unwrap_or_default();

        let Some(query) = args
            .get("query")
            .and_then(|v| v.as_str())
            .filter(|q| !q.trim().is_empty())
        else {
            return Ok(CallToolResult::error(
                "Missing required parameter: query".to_string(),
            ));
        };

        let limit = match parse_limit(&args) {
            Ok(limit) => limit,
            Err(e) => return Ok(CallToolResult::error(e.to_string())),
        };

        debug!("Searching knowledge base: query='{}', limit={}", query, limit);

        match self.indexer.query(query, limit).await {
            Ok(results) => {
                let formatted: Vec<Value> = results
                    .iter()
                    .map(|result| {
                        json!({
                            "content": result.text,
                            "source": result.source_path,
                            "chunk_index": result.chunk_index,
                            "relevance_score": result.score
                        })
                    })
                    .collect();

                let response = json!({ "results": formatted });
                Ok(CallToolResult::text(serde_json::to_string_pretty(&response)?))
            }
            Err(e) => {
                error!("Error performing search: {}", e);
                Ok(CallToolResult::error(format!("Search error: {e}")))
            }
        }
    }
}

fn parse_limit(args: &HashMap<String, Value>) -> Result<usize> {
    match args.get("limit") {
        None | Some(Value::Null) => Ok(DEFAULT_SEARCH_LIMIT),
        Some(value) => {
            let limit = value
                .as_u64()
                .filter(|limit| *limit >= 1)
                .ok_or_else(|| anyhow!("Parameter 'limit' must be a positive integer"))?;
            Ok(usize::try_from(limit)
                .unwrap_or(MAX_SEARCH_LIMIT)
                .min(MAX_SEARCH_LIMIT))
        }
    }
}

fn outcome_result(outcome: &SyncOutcome) -> Result<CallToolResult> {
    let text = serde_json::to_string_pretty(outcome)?;
    Ok(if outcome.success {
        CallToolResult::text(text)
    } else {
        CallToolResult::error(text)
    })
}

/// Register every knowledge-base tool on `server`
#[inline]
pub async fn register_knowledge_base_tools(server: &McpServer, indexer: &Arc<Indexer>) {
    server
        .register_tool(
            InitKnowledgeBaseHandler::tool_definition(),
            InitKnowledgeBaseHandler::new(Arc::clone(indexer)),
        )
        .await;
    server
        .register_tool(
            UpdateKnowledgeBaseHandler::tool_definition(),
            UpdateKnowledgeBaseHandler::new(Arc::clone(indexer)),
        )
        .await;
    server
        .register_tool(
            SearchKnowledgeBaseHandler::tool_definition(),
            SearchKnowledgeBaseHandler::new(Arc::clone(indexer)),
        )
        .await;
}
