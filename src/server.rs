//! HTTP, WebSocket and MCP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Banner |
//! | `GET`  | `/health` | Version, registry sizes, active sessions |
//! | `GET`  | `/system/status` | Status of every agent, registered tool ids |
//! | `GET`  | `/agents` | Agents with their actions |
//! | `GET`  | `/tools` | Tools with their parameter lists |
//! | `POST` | `/mcp/request` | Dispatch an `McpRequest` |
//! | `GET`  | `/sessions` | All sessions |
//! | `GET`  | `/sessions/{id}` | One session |
//! | `DELETE` | `/sessions/{id}` | Drop a session |
//! | `GET`  | `/mcp/ws/{session_id}` | WebSocket carrying `McpRequest` / `McpResponse` JSON |
//! | `POST` | `/rag` | Compliance analysis with the validated violations inline |
//! | `POST` | `/compliance/analyze` | `?plan_json&user_message` |
//! | `POST` | `/security/audit` | `?plan_json&security_framework` |
//! | `POST` | `/costs/analyze` | `?plan_json&region` |
//! | any    | `/mcp` | MCP Streamable HTTP (JSON-RPC) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "Agent ghost not found" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `tool_error` (500),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::agents::{DispatchError, Dispatcher};
use crate::config::Config;
use crate::llm::LanguageModel;
use crate::mcp::McpBridge;
use crate::protocol::{McpProtocol, McpRequest, McpResponse};
use crate::tools::now_iso;
use crate::validate::load_report;

const LEGACY_SESSION: &str = "legacy_session";
const API_SESSION: &str = "api_session";

#[derive(Clone)]
struct AppState {
    protocol: Arc<McpProtocol>,
}

impl AppState {
    fn dispatcher(&self) -> &Dispatcher {
        self.protocol.dispatcher()
    }
}

/// Build the full router. `shutdown` cancels open MCP sessions.
pub fn build_router(dispatcher: Arc<Dispatcher>, shutdown: &CancellationToken) -> Router {
    use rmcp::transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
    };

    let bridge = McpBridge::new(dispatcher.clone());
    let mcp_service = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig {
            cancellation_token: shutdown.child_token(),
            ..Default::default()
        },
    );

    let state = AppState {
        protocol: Arc::new(McpProtocol::new(dispatcher)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/system/status", get(handle_system_status))
        .route("/agents", get(handle_list_agents))
        .route("/tools", get(handle_list_tools))
        .route("/mcp/request", post(handle_mcp_request))
        .route("/mcp/ws/{session_id}", get(handle_ws))
        .route("/sessions", get(handle_list_sessions))
        .route(
            "/sessions/{session_id}",
            get(handle_get_session).delete(handle_delete_session),
        )
        .route("/rag", post(handle_rag))
        .route("/compliance/analyze", post(handle_compliance_analyze))
        .route("/security/audit", post(handle_security_audit))
        .route("/costs/analyze", post(handle_costs_analyze))
        .with_state(state)
        .route_service("/mcp", mcp_service)
        .layer(cors)
}

/// Serve on `server.bind` until Ctrl-C.
pub async fn run_server(config: &Config, llm: Arc<dyn LanguageModel>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let dispatcher = Arc::new(Dispatcher::with_builtins(Arc::new(config.clone()), llm));
    info!(
        agents = dispatcher.agents.len(),
        tools = dispatcher.tools.len(),
        "registries ready"
    );

    let ct = CancellationToken::new();
    let app = build_router(dispatcher, &ct);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("listening on http://{} (MCP at /mcp)", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            ct.cancel();
        })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn tool_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "tool_error".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::AgentNotFound(_)
            | DispatchError::ActionNotFound(_)
            | DispatchError::ToolNotFound(_) => not_found(err.to_string()),
            DispatchError::InvalidParameters(_) => bad_request(err.to_string()),
        }
    }
}

// ============ Discovery ============

async fn handle_root() -> Json<Value> {
    Json(json!({
        "message": "coldrag compliance analysis server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "active",
        "timestamp": now_iso(),
    }))
}

async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "agents": state.dispatcher().agents.len(),
        "tools": state.dispatcher().tools.len(),
        "active_sessions": state.protocol.session_count(),
        "timestamp": now_iso(),
    }))
}

async fn handle_system_status(State(state): State<AppState>) -> Json<Value> {
    Json(state.dispatcher().system_status())
}

async fn handle_list_agents(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "agents": state.dispatcher().agents.info() }))
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "tools": state.dispatcher().tools.info() }))
}

// ============ Dispatch ============

async fn handle_mcp_request(
    State(state): State<AppState>,
    request: Result<Json<McpRequest>, JsonRejection>,
) -> Result<Json<McpResponse>, AppError> {
    let Json(request) = request?;
    Ok(Json(state.protocol.handle_request(request).await?))
}

async fn agent_call(
    state: &AppState,
    agent_id: &str,
    action: &str,
    parameters: Value,
) -> Result<Json<McpResponse>, AppError> {
    let request = McpRequest::new(agent_id, action, parameters).in_session(API_SESSION);
    Ok(Json(state.protocol.handle_request(request).await?))
}

#[derive(Deserialize)]
struct ComplianceQuery {
    plan_json: String,
    user_message: Option<String>,
}

async fn handle_compliance_analyze(
    State(state): State<AppState>,
    query: Result<Query<ComplianceQuery>, QueryRejection>,
) -> Result<Json<McpResponse>, AppError> {
    let Query(q) = query?;
    let mut params = json!({ "plan_json": q.plan_json });
    if let Some(message) = q.user_message {
        params["user_message"] = json!(message);
    }
    agent_call(&state, "compliance_agent", "analyze_compliance", params).await
}

#[derive(Deserialize)]
struct SecurityQuery {
    plan_json: String,
    security_framework: Option<String>,
}

async fn handle_security_audit(
    State(state): State<AppState>,
    query: Result<Query<SecurityQuery>, QueryRejection>,
) -> Result<Json<McpResponse>, AppError> {
    let Query(q) = query?;
    let params = json!({
        "plan_json": q.plan_json,
        "security_framework": q.security_framework.unwrap_or_else(|| "CIS".to_string()),
    });
    agent_call(&state, "security_agent", "audit_security", params).await
}

#[derive(Deserialize)]
struct CostQuery {
    plan_json: String,
    region: Option<String>,
}

async fn handle_costs_analyze(
    State(state): State<AppState>,
    query: Result<Query<CostQuery>, QueryRejection>,
) -> Result<Json<McpResponse>, AppError> {
    let Query(q) = query?;
    let params = json!({
        "plan_json": q.plan_json,
        "region": q.region.unwrap_or_else(|| "us-east-1".to_string()),
    });
    agent_call(&state, "cost_agent", "analyze_costs", params).await
}

// ============ POST /rag ============

#[derive(Deserialize)]
struct RagRequest {
    plan_json: String,
    output_path: String,
    refdir: Option<String>,
    user_message: Option<String>,
}

async fn handle_rag(
    State(state): State<AppState>,
    body: Result<Json<RagRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(body) = body?;
    let mut params = json!({ "plan_json": body.plan_json, "output_path": body.output_path });
    if let Some(refdir) = &body.refdir {
        params["refdir"] = json!(refdir);
    }
    if let Some(message) = &body.user_message {
        params["user_message"] = json!(message);
    }

    let request = McpRequest::new("compliance_agent", "analyze_compliance", params).in_session(LEGACY_SESSION);
    let response = state.protocol.handle_request(request).await?;
    if response.status == "error" {
        return Err(tool_error(
            response.error.unwrap_or_else(|| "Compliance analysis failed".to_string()),
        ));
    }

    let report = load_report(&PathBuf::from(&body.output_path))
        .map_err(|e| internal(format!("{:#}", e)))?;

    Ok(Json(json!({
        "message": "Compliance analysis completed",
        "plan_json": body.plan_json,
        "output_path": body.output_path,
        "refdir": body.refdir,
        "analysis": {
            "timestamp": response.timestamp,
            "total_violations": report.violations.len(),
            "severity_breakdown": report.severity_breakdown(),
        },
        "compliance_violations": report.violations,
    })))
}

// ============ Sessions ============

async fn handle_list_sessions(State(state): State<AppState>) -> Json<Value> {
    let sessions = state.protocol.get_all_sessions();
    Json(json!({ "total_sessions": sessions.len(), "sessions": sessions }))
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let session = state
        .protocol
        .get_session_info(&session_id)
        .ok_or_else(|| not_found(format!("Session {} not found", session_id)))?;
    Ok(Json(json!({ "session_id": session_id, "session": session })))
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    if !state.protocol.cleanup_session(&session_id) {
        return Err(not_found(format!("Session {} not found", session_id)));
    }
    Ok(Json(json!({
        "message": format!("Session {} cleaned up successfully", session_id)
    })))
}

// ============ WebSocket ============

async fn handle_ws(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| ws_session(socket, session_id, state))
}

async fn ws_session(mut socket: WebSocket, session_id: String, state: AppState) {
    info!(session = %session_id, "websocket connected");
    while let Some(message) = socket.recv().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(session = %session_id, error = %e, "websocket receive failed");
                break;
            }
        };

        let reply = ws_reply(&state, &session_id, text.as_str()).await;
        if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
            break;
        }
    }
    info!(session = %session_id, "websocket closed");
}

/// One reply per incoming message. A malformed message gets an error object
/// and the connection stays open.
async fn ws_reply(state: &AppState, session_id: &str, text: &str) -> Value {
    let mut request: McpRequest = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(session = %session_id, error = %e, "invalid websocket message");
            return json!({
                "status": "error",
                "error": format!("Invalid request: {}", e),
                "session_id": session_id,
                "timestamp": now_iso(),
            });
        }
    };
    request.session_id = Some(session_id.to_string());
    let agent_id = request.agent_id.clone();
    let request_id = request
        .request_id
        .clone()
        .unwrap_or_else(|| state.protocol.next_request_id());
    request.request_id = Some(request_id.clone());

    match state.protocol.handle_request(request).await {
        Ok(response) => json!(response),
        Err(e) => json!(McpResponse::failure(&agent_id, session_id, &request_id, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentRegistry;
    use crate::tools::tests::test_context;
    use crate::tools::ToolRegistry;
    use tempfile::TempDir;

    fn state(tmp: &TempDir) -> AppState {
        let dispatcher = Dispatcher::new(
            AgentRegistry::with_builtins(),
            ToolRegistry::with_builtins(),
            test_context(tmp.path()),
        );
        AppState {
            protocol: Arc::new(McpProtocol::new(Arc::new(dispatcher))),
        }
    }

    #[tokio::test]
    async fn test_ws_reply_uses_path_session() {
        let tmp = TempDir::new().unwrap();
        let state = state(&tmp);

        let reply = ws_reply(
            &state,
            "socket-1",
            r#"{"agent_id":"cost_agent","action":"get_cost_status","session_id":"ignored"}"#,
        )
        .await;

        assert_eq!(reply["status"], "success");
        assert_eq!(reply["session_id"], "socket-1");
        assert!(state.protocol.get_session_info("socket-1").is_some());
        assert!(state.protocol.get_session_info("ignored").is_none());
    }

    #[tokio::test]
    async fn test_ws_reply_invalid_json_keeps_going() {
        let tmp = TempDir::new().unwrap();
        let state = state(&tmp);

        let reply = ws_reply(&state, "socket-2", "not json").await;
        assert_eq!(reply["status"], "error");
        assert!(reply["error"].as_str().unwrap().starts_with("Invalid request"));

        let reply = ws_reply(&state, "socket-2", r#"{"agent_id":"ghost","action":"x"}"#).await;
        assert_eq!(reply["status"], "error");
        assert_eq!(reply["error"], "Agent ghost not found");
        assert!(reply["request_id"].as_str().unwrap().starts_with("req_"));
    }

    #[test]
    fn test_dispatch_errors_map_to_status() {
        let err: AppError = DispatchError::AgentNotFound("x".into()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let err: AppError = DispatchError::InvalidParameters("bad".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "bad_request");
    }
}
