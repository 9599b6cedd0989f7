//! MCP server core: routes JSON-RPC requests to tool handlers.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::protocol::messages::{
    CallToolRequest, CallToolResult, InitializeRequest, InitializeResult, ListToolsResult,
    ServerCapabilities, ServerInfo,
};
use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_VERSION};
use crate::state::AppState;
use crate::tools;

pub struct McpServer {
    state: AppState,
    initialized: bool,
}

impl McpServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            initialized: false,
        }
    }

    /// Handle an incoming request. `None` for notifications.
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!("handling request: {}", request.method);

        if !self.initialized
            && request.method != "initialize"
            && request.method != "notifications/initialized"
        {
            warn!("rejecting '{}': server not initialized", request.method);
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::server_not_initialized(),
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "notifications/initialized" => return None,
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(request.params).await,
            "ping" => Ok(serde_json::json!({})),
            method => {
                warn!("unknown method: {method}");
                Err(JsonRpcError::method_not_found())
            }
        };

        Some(match result {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::error(request.id, error),
        })
    }

    fn handle_initialize(
        &mut self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, JsonRpcError> {
        let request: InitializeRequest = match params {
            Some(params) => serde_json::from_value(params)
                .map_err(|err| JsonRpcError::invalid_params(&err.to_string()))?,
            None => InitializeRequest::default(),
        };

        // Version negotiation: follow the client when it speaks an older
        // protocol version
        let negotiated = if request.protocol_version.as_str() < MCP_VERSION {
            info!(
                "client requested older protocol version {}, using it",
                request.protocol_version
            );
            request.protocol_version
        } else {
            MCP_VERSION.to_string()
        };

        self.initialized = true;
        info!("MCP session initialized with protocol version {negotiated}");

        let result = InitializeResult {
            protocol_version: negotiated,
            server_info: ServerInfo {
                name: "lore".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some(HashMap::from([(
                    "listChanged".to_string(),
                    serde_json::json!(false),
                )])),
            },
            instructions: Some(
                "Lore is a personal knowledge base. Use kb_store to save knowledge worth \
                 recalling later, kb_search for quick lookups, kb_ask to explore the \
                 knowledge graph, and kb_summarize for synthesized answers with citations. \
                 kb_ingest pulls knowledge out of files on disk."
                    .to_string(),
            ),
        };

        serde_json::to_value(result).map_err(|err| JsonRpcError::internal_error(&err.to_string()))
    }

    fn handle_tools_list(&self) -> Result<serde_json::Value, JsonRpcError> {
        let result = ListToolsResult {
            tools: tools::descriptions(),
        };
        serde_json::to_value(result).map_err(|err| JsonRpcError::internal_error(&err.to_string()))
    }

    async fn handle_tools_call(
        &self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, JsonRpcError> {
        let request: CallToolRequest = match params {
            Some(params) => serde_json::from_value(params)
                .map_err(|err| JsonRpcError::invalid_params(&err.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("missing params")),
        };

        // No tool failure escapes as a protocol error; everything surfaces
        // as an error content block
        let result = match tools::call(&self.state, &request.name, request.arguments).await {
            Ok(text) => CallToolResult::text(text, false),
            Err(message) => CallToolResult::text(message, true),
        };

        serde_json::to_value(result).map_err(|err| JsonRpcError::internal_error(&err.to_string()))
    }
}
