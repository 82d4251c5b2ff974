//! Request/response envelopes and per-session request history.
//!
//! Every agent call made over REST or WebSocket goes through
//! [`McpProtocol::handle_request`], which fills in request and session ids,
//! records the call in its session, and dispatches it.
//!
//! ```json
//! {"agent_id": "cost_agent", "action": "analyze_costs",
//!  "parameters": {"plan_json": "plan.json"}, "session_id": "ci-42"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::agents::{DispatchError, Dispatcher};
use crate::tools::{file_stamp, now_iso};

pub const DEFAULT_SESSION: &str = "default";

fn empty_object() -> Value {
    json!({})
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpRequest {
    pub agent_id: String,
    pub action: String,
    #[serde(default = "empty_object")]
    pub parameters: Value,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl McpRequest {
    pub fn new(agent_id: &str, action: &str, parameters: Value) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            action: action.to_string(),
            parameters,
            session_id: None,
            request_id: None,
        }
    }

    pub fn in_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpResponse {
    pub status: String,
    pub data: Value,
    pub agent_id: String,
    pub session_id: String,
    pub request_id: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl McpResponse {
    /// Response for a request that never reached an agent.
    pub fn failure(agent_id: &str, session_id: &str, request_id: &str, error: String) -> Self {
        Self {
            status: "error".to_string(),
            data: Value::Null,
            agent_id: agent_id.to_string(),
            session_id: session_id.to_string(),
            request_id: request_id.to_string(),
            timestamp: now_iso(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_id: String,
    pub agent_id: String,
    pub action: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub created_at: String,
    pub requests: Vec<RequestRecord>,
    pub agents_used: Vec<String>,
}

pub struct McpProtocol {
    dispatcher: Arc<Dispatcher>,
    sessions: Mutex<HashMap<String, SessionRecord>>,
    counter: AtomicU64,
}

impl McpProtocol {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            sessions: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// `req_<counter>_<YYYYmmdd_HHMMSS>`.
    pub fn next_request_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("req_{}_{}", n, file_stamp())
    }

    /// Dispatch one request. Only an unknown agent is an `Err`; every
    /// other problem comes back as an error-status response.
    pub async fn handle_request(&self, request: McpRequest) -> Result<McpResponse, DispatchError> {
        if self.dispatcher.agents.find(&request.agent_id).is_none() {
            return Err(DispatchError::AgentNotFound(request.agent_id));
        }

        let request_id = request
            .request_id
            .clone()
            .unwrap_or_else(|| self.next_request_id());
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| DEFAULT_SESSION.to_string());
        self.record(&session_id, &request_id, &request);
        debug!(request_id = %request_id, session_id = %session_id, "handling request");

        let data = self
            .dispatcher
            .execute(&request.agent_id, &request.action, request.parameters)
            .await?;

        let failed = data["status"] == "error";
        let error = if failed {
            data["error"]
                .as_str()
                .or_else(|| data["message"].as_str())
                .map(|s| s.to_string())
        } else {
            None
        };

        Ok(McpResponse {
            status: if failed { "error" } else { "success" }.to_string(),
            data,
            agent_id: request.agent_id,
            session_id,
            request_id,
            timestamp: now_iso(),
            error,
        })
    }

    fn record(&self, session_id: &str, request_id: &str, request: &McpRequest) {
        let Ok(mut sessions) = self.sessions.lock() else {
            return;
        };
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionRecord {
                created_at: now_iso(),
                requests: Vec::new(),
                agents_used: Vec::new(),
            });
        session.requests.push(RequestRecord {
            request_id: request_id.to_string(),
            agent_id: request.agent_id.clone(),
            action: request.action.clone(),
            timestamp: now_iso(),
        });
        if !session.agents_used.contains(&request.agent_id) {
            session.agents_used.push(request.agent_id.clone());
        }
    }

    pub fn get_session_info(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions
            .lock()
            .ok()
            .and_then(|s| s.get(session_id).cloned())
    }

    pub fn get_all_sessions(&self) -> BTreeMap<String, SessionRecord> {
        self.sessions
            .lock()
            .map(|s| s.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Remove a session. Returns whether it existed.
    pub fn cleanup_session(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .map(|mut s| s.remove(session_id).is_some())
            .unwrap_or(false)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }
}
