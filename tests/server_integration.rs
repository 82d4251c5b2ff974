//! End-to-end HTTP tests: the router on a free port, a canned model, and
//! reqwest as the client.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use coldrag::agents::Dispatcher;
use coldrag::config::Config;
use coldrag::llm::LanguageModel;
use coldrag::server::build_router;

const PLAN: &str = r#"{"resource_changes":[
    {"address":"aws_db_instance.main","type":"aws_db_instance","name":"main",
     "change":{"actions":["create"],"after":{"password":"hunter2","storage_encrypted":false}}},
    {"address":"aws_instance.web","type":"aws_instance","name":"web","change":{"actions":["create"]}}
]}"#;

const ANSWER: &str = r#"{"violations":[
    {"resource_type":"aws_db_instance","resource_name":"main",
     "compliance_concern":"Unencrypted database storage","standards":["HIPAA"],
     "severity":"High","remediation":"Set storage_encrypted = true"}],
  "recommendations":["Encrypt data at rest"]}"#;

struct CannedModel;

#[async_trait]
impl LanguageModel for CannedModel {
    fn provider(&self) -> &str {
        "canned"
    }

    fn model_name(&self) -> &str {
        "canned"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(ANSWER.to_string())
    }
}

fn config(root: &Path) -> Config {
    let prompts = root.join("prompts");
    std::fs::create_dir_all(&prompts).unwrap();
    std::fs::write(prompts.join("compliance.txt"), "Find compliance violations.").unwrap();

    let mut config = Config::default();
    config.embedding.provider = "hash".to_string();
    config.embedding.dims = Some(32);
    config.prompts.dir = prompts;
    config.prompts.file = "compliance.txt".to_string();
    config.server.output_dir = root.join("output");
    config
}

/// Start the server and return its base URL.
async fn start(tmp: &TempDir) -> String {
    std::fs::write(tmp.path().join("plan.json"), PLAN).unwrap();
    let dispatcher = Arc::new(Dispatcher::with_builtins(
        Arc::new(config(tmp.path())),
        Arc::new(CannedModel),
    ));
    let app = build_router(dispatcher, &CancellationToken::new());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn plan_path(tmp: &TempDir) -> String {
    tmp.path().join("plan.json").to_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_and_discovery() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;
    let client = reqwest::Client::new();

    let health: Value = client.get(format!("{}/health", base)).send().await.unwrap().json().await.unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["agents"], 3);
    assert_eq!(health["tools"], 5);
    assert_eq!(health["active_sessions"], 0);

    let agents: Value = client.get(format!("{}/agents", base)).send().await.unwrap().json().await.unwrap();
    let ids: Vec<&str> = agents["agents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["agent_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["compliance_agent", "security_agent", "cost_agent"]);

    let tools: Value = client.get(format!("{}/tools", base)).send().await.unwrap().json().await.unwrap();
    assert_eq!(tools["tools"][0]["tool_id"], "terraform_analyzer");
    let plan_param = tools["tools"][0]["parameters"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["name"] == "plan_json")
        .unwrap();
    assert_eq!(plan_param["required"], true);

    let status: Value = client
        .get(format!("{}/system/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["agents"]["cost_agent"]["status"], "idle");
}

#[tokio::test]
async fn test_mcp_request_and_sessions() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/mcp/request", base))
        .json(&json!({
            "agent_id": "cost_agent",
            "action": "get_cost_status",
            "session_id": "ci"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["session_id"], "ci");
    assert_eq!(body["data"]["cost_status"]["total_analyses"], 0);

    let session: Value = client
        .get(format!("{}/sessions/ci", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session["session"]["agents_used"], json!(["cost_agent"]));

    let resp = client.delete(format!("{}/sessions/ci", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let resp = client.delete(format!("{}/sessions/ci", base)).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_unknown_agent_is_404() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/mcp/request", base))
        .json(&json!({ "agent_id": "ghost", "action": "run" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
    assert_eq!(body["error"]["message"], "Agent ghost not found");
}

#[tokio::test]
async fn test_unknown_action_is_error_response() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;

    let body: Value = reqwest::Client::new()
        .post(format!("{}/mcp/request", base))
        .json(&json!({ "agent_id": "security_agent", "action": "dance" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "Action dance not found");
}

#[tokio::test]
async fn test_malformed_bodies_and_queries_use_error_contract() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/mcp/request", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/rag", base))
        .json(&json!({ "plan_json": plan_path(&tmp) }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert!(body["error"]["message"].as_str().unwrap().contains("output_path"));

    let resp = client
        .post(format!("{}/security/audit", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert!(body["error"]["message"].as_str().unwrap().contains("plan_json"));
}

#[tokio::test]
async fn test_rag_returns_validated_violations() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;
    let client = reqwest::Client::new();
    let output = tmp.path().join("findings.json");

    let resp = client
        .post(format!("{}/rag", base))
        .json(&json!({
            "plan_json": plan_path(&tmp),
            "output_path": output.to_str().unwrap(),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["analysis"]["total_violations"], 1);
    assert_eq!(body["analysis"]["severity_breakdown"]["High"], 1);
    assert_eq!(body["compliance_violations"][0]["resource_name"], "main");
    assert!(output.exists());
    assert!(tmp.path().join("findings.raw.txt").exists());

    let sessions: Value = client.get(format!("{}/sessions", base)).send().await.unwrap().json().await.unwrap();
    assert_eq!(sessions["total_sessions"], 1);
    assert!(sessions["sessions"]["legacy_session"].is_object());
}

#[tokio::test]
async fn test_rag_missing_plan_is_500() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/rag", base))
        .json(&json!({
            "plan_json": tmp.path().join("missing.json").to_str().unwrap(),
            "output_path": tmp.path().join("out.json").to_str().unwrap(),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "tool_error");
}

#[tokio::test]
async fn test_security_and_cost_shortcuts() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;
    let client = reqwest::Client::new();

    let security: Value = client
        .post(format!("{}/security/audit", base))
        .query(&[("plan_json", plan_path(&tmp))])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(security["status"], "success", "{}", security);
    assert_eq!(security["session_id"], "api_session");
    assert_eq!(security["data"]["framework"], "CIS");
    assert!(security["data"]["high_risk_count"].as_u64().unwrap() >= 1);

    let cost: Value = client
        .post(format!("{}/costs/analyze", base))
        .query(&[("plan_json", plan_path(&tmp)), ("region", "eu-west-1".to_string())])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cost["status"], "success", "{}", cost);
    assert_eq!(cost["data"]["region"], "eu-west-1");
    assert!(cost["data"]["total_monthly_cost"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn test_mcp_endpoint_is_mounted() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/mcp", base))
        .header("content-type", "application/json")
        .body(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
        .send()
        .await
        .unwrap();
    assert_ne!(resp.status(), 404);
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;

    let resp = reqwest::Client::new()
        .get(format!("{}/health", base))
        .header("origin", "http://example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}
