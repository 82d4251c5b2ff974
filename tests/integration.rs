use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use axum::{routing::post, Json, Router};
use serde_json::{json, Value};

/// Variables that override the config file; cleared so the host env can't leak in.
const OVERRIDE_VARS: [&str; 12] = [
    "CHUNK_SIZE",
    "CHUNK_OVERLAP",
    "EMBEDDING_MODEL",
    "SEARCH_K",
    "SEARCH_TYPE",
    "LLM_MODEL",
    "OLLAMA_BASE_URL",
    "LLM_RETURN_SOURCES",
    "DEFAULT_PROMPTS_DIR",
    "DEFAULT_PROMPT_FILE",
    "COLDRAG_LOG",
    "RUST_LOG",
];

const PLAN: &str = r#"{
  "format_version": "1.2",
  "resource_changes": [
    {"address": "aws_instance.web", "type": "aws_instance", "name": "web",
     "change": {"actions": ["create"], "after": {"instance_type": "t3.micro"}}},
    {"address": "aws_db_instance.main", "type": "aws_db_instance", "name": "main",
     "change": {"actions": ["create"], "after": {"storage_encrypted": false, "password": "hunter2"}}},
    {"address": "aws_s3_bucket.old", "type": "aws_s3_bucket", "name": "old",
     "change": {"actions": ["delete"], "before": {"bucket": "old-logs"}}}
  ]
}"#;

const FINDINGS: &str = r#"{
  "violations": [
    {"resource_type": "aws_db_instance", "resource_name": "main",
     "compliance_concern": "Database storage is not encrypted",
     "standards": ["HIPAA"], "severity": "High",
     "remediation": "Set storage_encrypted = true"}
  ],
  "recommendations": ["Enable encryption at rest"]
}"#;

fn coldrag_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_coldrag"))
}

fn setup_test_env(llm_url: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let prompts_dir = root.join("prompts");
    fs::create_dir_all(&prompts_dir).unwrap();
    fs::write(
        prompts_dir.join("compliance.txt"),
        "Review the Terraform plan below for compliance violations. Answer with JSON only.",
    )
    .unwrap();

    let refs_dir = root.join("refs");
    fs::create_dir_all(&refs_dir).unwrap();
    fs::write(
        refs_dir.join("hipaa.md"),
        "# HIPAA\n\nElectronic protected health information must be encrypted at rest.",
    )
    .unwrap();

    fs::write(root.join("plan.json"), PLAN).unwrap();

    let config_content = format!(
        r#"[chunking]
chunk_size = 400
chunk_overlap = 40

[embedding]
provider = "hash"
dims = 64

[retrieval]
search_k = 4
fetch_k = 8

[llm]
provider = "ollama"
model = "mock"
url = "{url}"
max_retries = 0
timeout_secs = 10

[prompts]
dir = "{root}/prompts"
file = "compliance.txt"

[server]
output_dir = "{root}/output"
"#,
        url = llm_url,
        root = root.display()
    );

    let config_path = config_dir.join("coldrag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn path_arg(path: &Path) -> String {
    path.to_str().unwrap().to_string()
}

fn run_coldrag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = coldrag_binary();
    let mut cmd = Command::new(&binary);
    for var in OVERRIDE_VARS {
        cmd.env_remove(var);
    }
    let output = cmd
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run coldrag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Ollama stand-in that answers every generate call with `answer`.
async fn mock_ollama(answer: &'static str) -> String {
    let app = Router::new().route(
        "/api/generate",
        post(move |Json(body): Json<Value>| async move {
            assert_eq!(body["model"], "mock");
            assert_eq!(body["stream"], false);
            Json(json!({ "model": "mock", "response": answer, "done": true }))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

// ============ inspect ============

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_inspect_writes_validated_and_raw_output() {
    let answer = "```json\n{\"violations\": [\
        {\"resource_type\": \"aws_db_instance\", \"resource_name\": \"main\", \
         \"compliance_concern\": \"Unencrypted database\", \"standards\": [\"hipaa\", \"SOC2\"], \
         \"severity\": \"high\", \"remediation\": \"Enable storage_encrypted\"},\
        {\"resource_type\": \"aws_instance\", \"resource_name\": \"web\", \
         \"compliance_concern\": \"Made up\", \"standards\": [\"ACME-1\"], \
         \"severity\": \"Low\", \"remediation\": \"None\"}\
     ], \"recommendations\": [\"Encrypt everything\"]}\n```";
    let url = mock_ollama(answer).await;
    let (tmp, config_path) = setup_test_env(&url);
    let plan = path_arg(&tmp.path().join("plan.json"));
    let output = tmp.path().join("out").join("findings.json");
    let output_arg = path_arg(&output);
    let refdir = path_arg(&tmp.path().join("refs"));

    let (stdout, stderr, success) = tokio::task::spawn_blocking(move || {
        run_coldrag(
            &config_path,
            &["inspect", &plan, &output_arg, "--refdir", &refdir],
        )
    })
    .await
    .unwrap();
    assert!(success, "inspect failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Violations: 1 (High 1, Medium 0, Low 0)"), "{}", stdout);
    assert!(stdout.contains("Dropped records: 1"), "{}", stdout);

    let written: Value = serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(written["violations"].as_array().unwrap().len(), 1);
    assert_eq!(written["violations"][0]["severity"], "High");
    assert_eq!(written["violations"][0]["standards"], json!(["HIPAA", "SOC 2"]));
    assert_eq!(written["recommendations"], json!(["Encrypt everything"]));

    let raw = fs::read_to_string(tmp.path().join("out").join("findings.raw.txt")).unwrap();
    assert!(raw.starts_with("```json"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_inspect_non_json_answer_writes_empty_report() {
    let url = mock_ollama("I could not find any problems with this plan.").await;
    let (tmp, config_path) = setup_test_env(&url);
    let plan = path_arg(&tmp.path().join("plan.json"));
    let output = tmp.path().join("findings.json");
    let output_arg = path_arg(&output);

    let (stdout, stderr, success) =
        tokio::task::spawn_blocking(move || run_coldrag(&config_path, &["inspect", &plan, &output_arg]))
            .await
            .unwrap();
    assert!(success, "inspect failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("not JSON"), "{}", stdout);

    let written: Value = serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(written, json!({"violations": [], "recommendations": []}));
    assert_eq!(
        fs::read_to_string(tmp.path().join("findings.raw.txt")).unwrap(),
        "I could not find any problems with this plan."
    );
}

#[test]
fn test_inspect_missing_plan_fails() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9");
    let output = tmp.path().join("findings.json");
    let (_, stderr, success) = run_coldrag(
        &config_path,
        &["inspect", &path_arg(&tmp.path().join("nope.json")), &path_arg(&output)],
    );
    assert!(!success);
    assert!(stderr.contains("nope.json"), "{}", stderr);
    assert!(!output.exists());
}

// ============ cost / report / render ============

#[test]
fn test_cost_text_and_json() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9");
    let plan = path_arg(&tmp.path().join("plan.json"));

    let (stdout, stderr, success) = run_coldrag(&config_path, &["cost", &plan]);
    assert!(success, "cost failed: {}", stderr);
    assert!(stdout.contains("CREATE (2)"), "{}", stdout);
    assert!(stdout.contains("DELETE (1)"), "{}", stdout);
    assert!(stdout.contains("Estimated monthly cost of new resources: $45.00"), "{}", stdout);

    let (stdout, _, success) = run_coldrag(&config_path, &["cost", &plan, "--format", "json"]);
    assert!(success);
    let summary: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(summary["total_monthly_cost"], 45.0);
    assert_eq!(summary["groups"]["create"]["count"], 2);
    assert_eq!(summary["groups"]["delete"]["resources"][0]["address"], "aws_s3_bucket.old");
}

#[test]
fn test_report_includes_findings() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9");
    let plan = tmp.path().join("plan.json");
    let findings = tmp.path().join("findings.json");
    fs::write(&findings, FINDINGS).unwrap();
    let html_out = tmp.path().join("site").join("summary.html");

    let (_, stderr, success) = run_coldrag(
        &config_path,
        &[
            "report",
            &path_arg(&plan),
            &path_arg(&html_out),
            "--findings",
            &path_arg(&findings),
        ],
    );
    assert!(success, "report failed: {}", stderr);

    let html = fs::read_to_string(&html_out).unwrap();
    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains("Terraform Plan Summary"));
    assert!(html.contains("$45.00"));
    assert!(html.contains("Database storage is not encrypted"));
}

#[test]
fn test_render_markdown_to_stdout() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9");
    let findings = tmp.path().join("findings.json");
    fs::write(&findings, FINDINGS).unwrap();

    let (stdout, stderr, success) = run_coldrag(
        &config_path,
        &["render", &path_arg(&findings), "--kind", "technical_report", "--format", "markdown"],
    );
    assert!(success, "render failed: {}", stderr);
    assert!(stdout.starts_with("# Technical Report"));
    assert!(stdout.contains("- Resource: `aws_db_instance.main`"));
    assert!(stdout.contains("- Standards: HIPAA"));
}

#[test]
fn test_render_rejects_unknown_kind() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9");
    let findings = tmp.path().join("findings.json");
    fs::write(&findings, FINDINGS).unwrap();
    let (_, _, success) = run_coldrag(&config_path, &["render", &path_arg(&findings), "--kind", "poem"]);
    assert!(!success);
}

// ============ agents / tools ============

#[test]
fn test_agents_and_tools_list() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (stdout, _, success) = run_coldrag(&config_path, &["agents", "list"]);
    assert!(success);
    for agent in ["compliance_agent", "security_agent", "cost_agent"] {
        assert!(stdout.contains(agent), "missing {}: {}", agent, stdout);
    }
    assert!(stdout.contains("- optimize_costs:"));

    let (stdout, _, success) = run_coldrag(&config_path, &["tools", "list"]);
    assert!(success);
    for tool in [
        "terraform_analyzer",
        "compliance_reporter",
        "security_auditor",
        "cost_analyzer",
        "document_generator",
    ] {
        assert!(stdout.contains(tool), "missing {}: {}", tool, stdout);
    }
    assert!(stdout.contains("*plan_json"));
}

#[test]
fn test_agents_run_security_audit() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9");
    let plan = tmp.path().join("plan.json");
    let audit = tmp.path().join("audit.json");

    let (stdout, stderr, success) = run_coldrag(
        &config_path,
        &[
            "agents",
            "run",
            "security_agent",
            "audit_security",
            "--param",
            &format!("plan_json={}", plan.display()),
            "--param",
            &format!("output_path={}", audit.display()),
        ],
    );
    assert!(success, "agents run failed: stdout={}, stderr={}", stdout, stderr);
    let result: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(result["status"], "success");
    assert!(result["total_findings"].as_u64().unwrap() >= 2);
    assert!(audit.exists());
    assert!(tmp.path().join("audit_technical_report.html").exists());
}

#[test]
fn test_agents_run_unknown_action_fails() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");
    let (stdout, _, success) = run_coldrag(&config_path, &["agents", "run", "cost_agent", "fly"]);
    assert!(!success);
    let result: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(result["status"], "error");
    assert_eq!(result["error"], "Action fly not found");
}

#[test]
fn test_agents_run_unknown_agent_fails() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");
    let (_, stderr, success) = run_coldrag(&config_path, &["agents", "run", "ghost_agent", "run"]);
    assert!(!success);
    assert!(stderr.contains("Agent ghost_agent not found"), "{}", stderr);
}

// ============ config / completions ============

#[test]
fn test_explicit_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_coldrag(&tmp.path().join("missing.toml"), &["tools", "list"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "{}", stderr);
}

#[test]
fn test_invalid_config_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("bad.toml");
    fs::write(&config_path, "[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap();
    let (_, stderr, success) = run_coldrag(&config_path, &["agents", "list"]);
    assert!(!success);
    assert!(stderr.contains("chunk_overlap"), "{}", stderr);
}

#[test]
fn test_completions_without_config() {
    let tmp = TempDir::new().unwrap();
    let (stdout, _, success) = run_coldrag(&tmp.path().join("missing.toml"), &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("coldrag"));
}
