//! Agents: named personas that orchestrate tools.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                    Dispatcher                    │
//! │  AgentRegistry                     ToolRegistry  │
//! │  compliance_agent  security_agent  cost_agent    │
//! └──────────────┬───────────────────────────────────┘
//!                ▼
//!   execute(agent_id, action, params)
//!     1. the agent's named actions
//!     2. the agent's own tools
//!     3. any registered tool
//!     4. {"status":"error","error":"Action X not found"}
//! ```
//!
//! | Agent | Actions | Tools |
//! |-------|---------|-------|
//! | `compliance_agent` | `analyze_compliance`, `generate_report`, `generate_executive_summary`, `get_compliance_status` | analyzer, reporter, document generator |
//! | `security_agent` | `audit_security`, `analyze_secrets`, `check_encryption`, `generate_security_report`, `get_security_status` | auditor, analyzer, document generator |
//! | `cost_agent` | `analyze_costs`, `optimize_costs`, `generate_cost_report`, `get_cost_status` | cost analyzer, document generator |
//!
//! Every agent carries a status (`idle` or `executing <action>` with a
//! progress fraction) and a long-term memory of past analyses, both behind
//! mutexes so concurrent requests see consistent values.

pub mod compliance;
pub mod cost;
pub mod security;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::llm::LanguageModel;
use crate::tools::{file_stamp, now_iso, ToolContext, ToolRegistry};

/// Typed dispatch failures. They become strings only at the response boundary.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Agent {0} not found")]
    AgentNotFound(String),
    #[error("Action {0} not found")]
    ActionNotFound(String),
    #[error("Tool '{0}' not found")]
    ToolNotFound(String),
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

// ═══════════════════════════════════════════════════════════════════════
// Agent Trait
// ═══════════════════════════════════════════════════════════════════════

/// An agent persona with named actions.
///
/// [`run_action`](Agent::run_action) is only called for names listed by
/// [`actions`](Agent::actions); anything else is resolved against tools by
/// [`execute_action`].
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Persona instructions, exposed as the agent's MCP prompt.
    fn system_prompt(&self) -> &str;

    /// Ids of the tools this agent works with.
    fn tools(&self) -> Vec<String>;

    fn actions(&self) -> Vec<ActionInfo>;

    fn state(&self) -> &AgentState;

    async fn run_action(&self, action: &str, params: Value, ctx: &AgentContext<'_>) -> Result<Value>;
}

/// A named action and what it does.
#[derive(Debug, Clone, Serialize)]
pub struct ActionInfo {
    pub name: String,
    pub description: String,
}

impl ActionInfo {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

/// Summary of a registered agent for discovery listings.
#[derive(Debug, Clone, Serialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub name: String,
    pub description: String,
    pub status: AgentStatus,
    pub tools: Vec<String>,
    pub available_actions: Vec<ActionInfo>,
}

// ═══════════════════════════════════════════════════════════════════════
// State and memory
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AgentStatus {
    pub status: String,
    pub progress: f32,
    pub last_updated: String,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self {
            status: "idle".to_string(),
            progress: 0.0,
            last_updated: now_iso(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: Value,
    pub stored_at: String,
}

#[derive(Debug, Default)]
pub struct AgentState {
    status: Mutex<AgentStatus>,
    memory: Mutex<Vec<MemoryEntry>>,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> AgentStatus {
        self.status.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn set_status(&self, status: String, progress: f32) {
        if let Ok(mut s) = self.status.lock() {
            s.status = status;
            s.progress = progress;
            s.last_updated = now_iso();
        }
    }

    /// Mark the agent busy until the returned guard drops, including when
    /// the running future is cancelled.
    #[must_use = "the agent goes back to idle when the guard drops"]
    pub fn begin(&self, action: &str) -> ActionGuard<'_> {
        self.set_status(format!("executing {}", action), 0.0);
        ActionGuard { state: self }
    }

    pub fn update_progress(&self, progress: f32) {
        if let Ok(mut s) = self.status.lock() {
            s.progress = progress.clamp(0.0, 1.0);
            s.last_updated = now_iso();
        }
    }

    pub fn finish(&self) {
        self.set_status("idle".to_string(), 0.0);
    }

    /// Store under `<prefix>_<YYYYmmdd_HHMMSS>` and return the key.
    pub fn remember(&self, prefix: &str, value: Value) -> String {
        let key = format!("{}_{}", prefix, file_stamp());
        if let Ok(mut memory) = self.memory.lock() {
            memory.push(MemoryEntry {
                key: key.clone(),
                value,
                stored_at: now_iso(),
            });
        }
        key
    }

    /// Values stored under `prefix`, newest first.
    pub fn recall(&self, prefix: &str) -> Vec<Value> {
        let marker = format!("{}_", prefix);
        self.memory
            .lock()
            .map(|memory| {
                memory
                    .iter()
                    .rev()
                    .filter(|e| e.key.starts_with(&marker))
                    .map(|e| e.value.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn memory_len(&self) -> usize {
        self.memory.lock().map(|m| m.len()).unwrap_or(0)
    }
}

/// Resets its agent to `idle` on drop.
pub struct ActionGuard<'a> {
    state: &'a AgentState,
}

impl Drop for ActionGuard<'_> {
    fn drop(&mut self) {
        self.state.finish();
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Action resolution
// ═══════════════════════════════════════════════════════════════════════

/// What an action may reach while it runs.
pub struct AgentContext<'a> {
    pub tools: &'a ToolRegistry,
    pub tool_ctx: &'a ToolContext,
}

impl<'a> AgentContext<'a> {
    pub fn new(tools: &'a ToolRegistry, tool_ctx: &'a ToolContext) -> Self {
        Self { tools, tool_ctx }
    }

    /// Invoke a tool and get its status envelope.
    pub async fn invoke_tool(&self, id: &str, params: Value) -> Value {
        self.tools.invoke(id, params, self.tool_ctx).await
    }

    /// Invoke a tool and unwrap `result`, turning an error envelope into
    /// `"<what> failed: <error>"`.
    pub async fn call_tool(&self, id: &str, params: Value, what: &str) -> Result<Value> {
        let envelope = self.invoke_tool(id, params).await;
        if envelope["status"] == "error" {
            bail!("{} failed: {}", what, envelope["error"].as_str().unwrap_or("unknown error"));
        }
        Ok(envelope["result"].clone())
    }

    /// Like [`call_tool`](Self::call_tool), but a failure is logged and
    /// yields `None`. Used for follow-up documents that should not fail the
    /// whole action.
    pub async fn try_tool(&self, id: &str, params: Value) -> Option<Value> {
        let envelope = self.invoke_tool(id, params).await;
        if envelope["status"] == "error" {
            warn!(tool = id, error = %envelope["error"], "follow-up tool failed");
            return None;
        }
        Some(envelope["result"].clone())
    }

    /// `params[key]`, or `<server.output_dir>/<prefix>_<stamp>.json`.
    pub fn output_path(&self, params: &Value, key: &str, prefix: &str) -> PathBuf {
        params[key]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.tool_ctx.default_output(prefix))
    }
}

/// Resolve and run `action` for `agent`. Never fails: problems come back
/// as an error payload.
pub async fn execute_action(agent: &dyn Agent, action: &str, params: Value, ctx: &AgentContext<'_>) -> Value {
    if agent.actions().iter().any(|a| a.name == action) {
        let guard = agent.state().begin(action);
        let result = agent.run_action(action, params, ctx).await;
        drop(guard);
        return match result {
            Ok(value) => value,
            Err(e) => {
                warn!(agent = agent.id(), action, error = %format!("{:#}", e), "action failed");
                json!({ "status": "error", "error": format!("{:#}", e), "timestamp": now_iso() })
            }
        };
    }

    if agent.tools().iter().any(|t| t == action) {
        debug!(agent = agent.id(), tool = action, "resolved action to agent tool");
        return ctx.invoke_tool(action, params).await;
    }

    if ctx.tools.find(action).is_some() {
        debug!(agent = agent.id(), tool = action, "resolved action to registered tool");
        return ctx.invoke_tool(action, params).await;
    }

    let err = DispatchError::ActionNotFound(action.to_string());
    json!({ "status": "error", "error": err.to_string(), "timestamp": now_iso() })
}

pub(crate) fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(s) => Ok(s),
        None => bail!("missing required parameter: {}", key),
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `improving` when the newest value is below the oldest of the last five.
pub(crate) fn trend(newest_first: &[f64], falling: &str) -> String {
    let recent: Vec<f64> = newest_first.iter().take(5).copied().collect();
    match (recent.first(), recent.last()) {
        (Some(newest), Some(oldest)) if recent.len() >= 2 && newest < oldest => falling.to_string(),
        _ => "stable".to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry and dispatcher
// ═══════════════════════════════════════════════════════════════════════

pub struct AgentRegistry {
    agents: Vec<Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self { agents: Vec::new() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(compliance::ComplianceAgent::new()));
        registry.register(Arc::new(security::SecurityAgent::new()));
        registry.register(Arc::new(cost::CostAgent::new()));
        registry
    }

    /// Add an agent. An agent with the same id replaces the earlier one.
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        if let Some(slot) = self.agents.iter_mut().find(|a| a.id() == agent.id()) {
            *slot = agent;
        } else {
            self.agents.push(agent);
        }
    }

    pub fn agents(&self) -> &[Arc<dyn Agent>] {
        &self.agents
    }

    pub fn find(&self, id: &str) -> Option<&Arc<dyn Agent>> {
        self.agents.iter().find(|a| a.id() == id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn info(&self) -> Vec<AgentInfo> {
        self.agents
            .iter()
            .map(|a| AgentInfo {
                agent_id: a.id().to_string(),
                name: a.name().to_string(),
                description: a.description().to_string(),
                status: a.state().status(),
                tools: a.tools(),
                available_actions: a.actions(),
            })
            .collect()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Agents, tools and the context they run with. Built once, shared by the
/// CLI, the protocol layer and the server.
pub struct Dispatcher {
    pub agents: AgentRegistry,
    pub tools: ToolRegistry,
    pub ctx: ToolContext,
}

impl Dispatcher {
    pub fn new(agents: AgentRegistry, tools: ToolRegistry, ctx: ToolContext) -> Self {
        Self { agents, tools, ctx }
    }

    /// Built-in agents and tools.
    pub fn with_builtins(config: Arc<Config>, llm: Arc<dyn LanguageModel>) -> Self {
        Self::new(
            AgentRegistry::with_builtins(),
            ToolRegistry::with_builtins(),
            ToolContext::new(config, llm),
        )
    }

    pub async fn execute(&self, agent_id: &str, action: &str, params: Value) -> Result<Value, DispatchError> {
        let agent = self
            .agents
            .find(agent_id)
            .ok_or_else(|| DispatchError::AgentNotFound(agent_id.to_string()))?;
        info!(agent = agent_id, action, "executing action");
        let ctx = AgentContext::new(&self.tools, &self.ctx);
        Ok(execute_action(agent.as_ref(), action, params, &ctx).await)
    }

    /// Invoke a tool directly, outside any agent.
    pub async fn invoke_tool(&self, tool_id: &str, params: Value) -> Value {
        self.tools.invoke(tool_id, params, &self.ctx).await
    }

    /// `{agents: {id: status}, tools: [ids]}`.
    pub fn system_status(&self) -> Value {
        let agents: serde_json::Map<String, Value> = self
            .agents
            .agents()
            .iter()
            .map(|a| (a.id().to_string(), json!(a.state().status())))
            .collect();
        json!({ "agents": agents, "tools": self.tools.ids() })
    }
}
