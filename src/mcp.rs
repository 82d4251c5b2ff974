//! MCP JSON-RPC bridge served at `/mcp`.
//!
//! * **Tools** are exposed as MCP tools via `list_tools` / `call_tool`.
//! * **Agents** are exposed as MCP prompts via `list_prompts` / `get_prompt`;
//!   the prompt carries the agent's system prompt and its actions.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler};

use crate::agents::{Agent, Dispatcher};

/// Shares one [`Dispatcher`] across all MCP sessions.
#[derive(Clone)]
pub struct McpBridge {
    dispatcher: Arc<Dispatcher>,
}

impl McpBridge {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    fn to_mcp_tool(tool: &dyn crate::tools::Tool) -> Tool {
        let input_schema = match tool.parameters_schema() {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        };

        Tool {
            name: Cow::Owned(tool.id().to_string()),
            title: None,
            description: Some(Cow::Owned(format!("{}: {}", tool.name(), tool.description()))),
            input_schema,
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(false)),
            execution: None,
            icons: None,
            meta: None,
        }
    }

    fn to_mcp_prompt(agent: &dyn Agent) -> Prompt {
        Prompt {
            name: agent.id().to_string(),
            title: None,
            description: Some(agent.description().to_string()),
            arguments: Some(vec![PromptArgument {
                name: "task".to_string(),
                title: None,
                description: Some("What you want the agent to do".to_string()),
                required: Some(false),
            }]),
            icons: None,
            meta: None,
        }
    }

    fn agent_brief(agent: &dyn Agent) -> String {
        let mut text = format!("Available actions for {}:\n", agent.id());
        for action in agent.actions() {
            text.push_str(&format!("- {}: {}\n", action.name, action.description));
        }
        text.push_str(&format!("Tools: {}", agent.tools().join(", ")));
        text
    }
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_prompts()
                .build(),
            server_info: Implementation {
                name: "coldrag".to_string(),
                title: Some("coldrag".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Compliance, security and cost analysis for Terraform plans. \
                 Call terraform_analyzer or security_auditor with a plan path, then render \
                 results with compliance_reporter or document_generator. \
                 Agents are available as prompts."
                    .to_string(),
            ),
        }
    }

    // ── Tools ────────────────────────────────────────────────────────────

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<Tool> = self
            .dispatcher
            .tools
            .tools()
            .iter()
            .map(|t| Self::to_mcp_tool(t.as_ref()))
            .collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.dispatcher
            .tools
            .find(name)
            .map(|t| Self::to_mcp_tool(t.as_ref()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        if self.dispatcher.tools.find(&request.name).is_none() {
            return Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            ));
        }

        let params = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        match self
            .dispatcher
            .tools
            .try_invoke(&request.name, params, &self.dispatcher.ctx)
            .await
        {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!("{:#}", e))])),
        }
    }

    // ── Prompts (agents) ─────────────────────────────────────────────────

    fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListPromptsResult, McpError>> + Send + '_ {
        let prompts: Vec<Prompt> = self
            .dispatcher
            .agents
            .agents()
            .iter()
            .map(|a| Self::to_mcp_prompt(a.as_ref()))
            .collect();
        std::future::ready(Ok(ListPromptsResult::with_all_items(prompts)))
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        let agent = self.dispatcher.agents.find(&request.name).ok_or_else(|| {
            McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no agent registered with name: {}", request.name),
                None,
            )
        })?;

        // MCP prompts have no system role; the persona goes first as user context.
        let mut messages = vec![
            PromptMessage::new_text(PromptMessageRole::User, agent.system_prompt()),
            PromptMessage::new_text(PromptMessageRole::User, Self::agent_brief(agent.as_ref())),
        ];
        if let Some(task) = request
            .arguments
            .as_ref()
            .and_then(|args| args.get("task"))
            .and_then(|t| t.as_str())
        {
            messages.push(PromptMessage::new_text(PromptMessageRole::User, task));
        }

        Ok(GetPromptResult {
            description: Some(agent.description().to_string()),
            messages,
        })
    }
}
