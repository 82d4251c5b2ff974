//! Tools: the units of work agents and clients invoke by id.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                      ToolRegistry                      │
//! │  terraform_analyzer   security_auditor   cost_analyzer │
//! │  compliance_reporter  document_generator               │
//! └──────────────┬─────────────────────────────────────────┘
//!                ▼
//!   invoke(id, params) ─▶ validate_params ─▶ Tool::execute
//!                ▼
//!   {"status":"success","result":..} | {"status":"error","error":..}
//! ```
//!
//! A tool's failure never escapes [`ToolRegistry::invoke`]: it becomes the
//! error envelope. Callers that need typed errors use
//! [`ToolRegistry::try_invoke`].

pub mod analysis;
pub mod cost;
pub mod documents;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Local, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::agents::DispatchError;
use crate::config::Config;
use crate::llm::LanguageModel;

// ═══════════════════════════════════════════════════════════════════════
// Tool Trait
// ═══════════════════════════════════════════════════════════════════════

/// Something an agent or client can call by id.
///
/// Parameters are checked against [`parameters_schema`](Tool::parameters_schema)
/// before [`execute`](Tool::execute) sees them, so `execute` may rely on
/// required fields being present and defaults being filled in.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable identifier, e.g. `"terraform_analyzer"`.
    fn id(&self) -> &str;

    /// Human-readable title.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema object with `properties`, `required` and optional
    /// `default`/`enum` per property.
    fn parameters_schema(&self) -> Value;

    /// Run with validated parameters. The returned value becomes `result`
    /// in the success envelope.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Shared handles a tool may need while running.
#[derive(Clone)]
pub struct ToolContext {
    pub config: Arc<Config>,
    pub llm: Arc<dyn LanguageModel>,
}

impl ToolContext {
    pub fn new(config: Arc<Config>, llm: Arc<dyn LanguageModel>) -> Self {
        Self { config, llm }
    }

    /// Default location for a generated file: `<server.output_dir>/<prefix>_<stamp>.json`.
    pub fn default_output(&self, prefix: &str) -> PathBuf {
        self.config
            .server
            .output_dir
            .join(format!("{}_{}.json", prefix, file_stamp()))
    }
}

/// One entry of a tool's parameter list, as shown by `GET /tools`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub required: bool,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

impl ToolParameter {
    fn check(&self, value: &Value) -> Result<()> {
        let type_ok = match self.param_type.as_str() {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !type_ok {
            bail!("{} must be a {}, got {}", self.name, self.param_type, kind_of(value));
        }
        if let Some(allowed) = &self.allowed {
            if !allowed.contains(value) {
                bail!("{} must be one of {}, got {}", self.name, Value::Array(allowed.clone()), value);
            }
        }
        Ok(())
    }
}

/// Flatten a tool schema into its parameter list, in property order.
pub fn parameter_list(schema: &Value) -> Vec<ToolParameter> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    schema
        .get("properties")
        .and_then(|p| p.as_object())
        .map(|props| {
            props
                .iter()
                .map(|(name, prop)| ToolParameter {
                    name: name.clone(),
                    param_type: prop["type"].as_str().unwrap_or("string").to_string(),
                    required: required.contains(&name.as_str()),
                    description: prop["description"].as_str().unwrap_or_default().to_string(),
                    default: prop.get("default").cloned(),
                    allowed: prop.get("enum").and_then(|e| e.as_array()).cloned(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Summary of a registered tool for discovery listings.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub tool_id: String,
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

// ═══════════════════════════════════════════════════════════════════════
// ToolRegistry
// ═══════════════════════════════════════════════════════════════════════

/// Registered tools, in registration order.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry holding the five built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(analysis::TerraformAnalyzerTool));
        registry.register(Arc::new(documents::ComplianceReporterTool));
        registry.register(Arc::new(analysis::SecurityAuditorTool));
        registry.register(Arc::new(cost::CostAnalyzerTool));
        registry.register(Arc::new(documents::DocumentGeneratorTool));
        registry
    }

    /// Add a tool. A tool with the same id replaces the earlier one in place.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        if let Some(slot) = self.tools.iter_mut().find(|t| t.id() == tool.id()) {
            debug!(tool = tool.id(), "replacing registered tool");
            *slot = tool;
        } else {
            self.tools.push(tool);
        }
    }

    pub fn find(&self, id: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.id() == id)
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn ids(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn info(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                tool_id: t.id().to_string(),
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: parameter_list(&t.parameters_schema()),
            })
            .collect()
    }

    /// Validate and run a tool, keeping the failure typed.
    pub async fn try_invoke(&self, id: &str, params: Value, ctx: &ToolContext) -> Result<Value> {
        let tool = self
            .find(id)
            .ok_or_else(|| DispatchError::ToolNotFound(id.to_string()))?;
        let params = validate_params(&parameter_list(&tool.parameters_schema()), params)
            .map_err(|e| DispatchError::InvalidParameters(e.to_string()))?;
        debug!(tool = id, "invoking tool");
        tool.execute(params, ctx).await
    }

    /// Run a tool and wrap the outcome in the status envelope.
    pub async fn invoke(&self, id: &str, params: Value, ctx: &ToolContext) -> Value {
        match self.try_invoke(id, params, ctx).await {
            Ok(result) => success_envelope(result),
            Err(e) => {
                warn!(tool = id, error = %format!("{:#}", e), "tool failed");
                error_envelope(&format!("{:#}", e))
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn success_envelope(result: Value) -> Value {
    json!({ "status": "success", "result": result, "timestamp": now_iso() })
}

pub fn error_envelope(error: &str) -> Value {
    json!({ "status": "error", "error": error, "timestamp": now_iso() })
}

/// RFC 3339 timestamp used in every response body.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Local `YYYYmmdd_HHMMSS`, used in generated file names and ids.
pub fn file_stamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// `<dir>/<stem><suffix>.<ext>` next to `path`.
pub fn sibling_path(path: &Path, suffix: &str, ext: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "analysis".to_string());
    path.with_file_name(format!("{}{}.{}", stem, suffix, ext))
}

pub(crate) fn write_file(path: &Path, content: &str) -> Result<()> {
    use anyhow::Context;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output dir: {}", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

pub(crate) fn str_param<'a>(params: &'a Value, key: &str) -> &'a str {
    params[key].as_str().unwrap_or_default()
}

// ═══════════════════════════════════════════════════════════════════════
// Parameter validation
// ═══════════════════════════════════════════════════════════════════════

/// Check `params` against a tool's parameter list and fill in defaults
/// for absent optional parameters. Unknown keys pass through untouched.
pub fn validate_params(parameters: &[ToolParameter], params: Value) -> Result<Value> {
    let mut given = match params {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => bail!("parameters must be an object, got {}", kind_of(&other)),
    };

    for param in parameters {
        if let Some(value) = given.get(&param.name) {
            param.check(value)?;
            continue;
        }
        if param.required {
            bail!("missing required parameter: {}", param.name);
        }
        if let Some(default) = &param.default {
            given.insert(param.name.clone(), default.clone());
        }
    }

    Ok(Value::Object(given))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Model that always answers with the same text.
    pub(crate) struct FixedModel(pub &'static str);

    #[async_trait]
    impl LanguageModel for FixedModel {
        fn provider(&self) -> &str {
            "fixed"
        }
        fn model_name(&self) -> &str {
            "fixed"
        }
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    pub(crate) fn test_context(output_dir: &Path) -> ToolContext {
        let mut config = Config::default();
        config.embedding.provider = "hash".to_string();
        config.server.output_dir = output_dir.to_path_buf();
        ToolContext::new(Arc::new(config), Arc::new(FixedModel("[]")))
    }

    struct EchoTool(&'static str);

    #[async_trait]
    impl Tool for EchoTool {
        fn id(&self) -> &str {
            "echo"
        }
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "Echo parameters"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "What to echo" },
                    "loud": { "type": "boolean", "default": false },
                    "mode": { "type": "string", "enum": ["plain", "fancy"], "default": "plain" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
            if params["text"] == "boom" {
                bail!("echo exploded");
            }
            Ok(params)
        }
    }

    #[test]
    fn test_validate_injects_defaults() {
        let params = parameter_list(&EchoTool("e").parameters_schema());
        let out = validate_params(&params, json!({"text": "hi"})).unwrap();
        assert_eq!(out, json!({"text": "hi", "loud": false, "mode": "plain"}));
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let params = parameter_list(&EchoTool("e").parameters_schema());

        let err = validate_params(&params, json!({})).unwrap_err();
        assert_eq!(err.to_string(), "missing required parameter: text");

        let err = validate_params(&params, json!({"text": 3})).unwrap_err();
        assert_eq!(err.to_string(), "text must be a string, got number");

        let err = validate_params(&params, json!({"text": "x", "mode": "loud"})).unwrap_err();
        assert_eq!(err.to_string(), r#"mode must be one of ["plain","fancy"], got "loud""#);

        let err = validate_params(&params, json!(["text"])).unwrap_err();
        assert_eq!(err.to_string(), "parameters must be an object, got array");
    }

    #[test]
    fn test_parameter_list() {
        let params = parameter_list(&EchoTool("e").parameters_schema());
        let text = params.iter().find(|p| p.name == "text").unwrap();
        assert!(text.required);
        assert_eq!(text.description, "What to echo");
        let loud = params.iter().find(|p| p.name == "loud").unwrap();
        assert_eq!(loud.param_type, "boolean");
        assert_eq!(loud.default, Some(json!(false)));
        assert_eq!(loud.allowed, None);
        let mode = params.iter().find(|p| p.name == "mode").unwrap();
        assert_eq!(mode.allowed, Some(vec![json!("plain"), json!("fancy")]));
    }

    #[test]
    fn test_register_last_write_wins() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool("first")));
        registry.register(Arc::new(EchoTool("second")));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find("echo").unwrap().name(), "second");
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(
            registry.ids(),
            vec![
                "terraform_analyzer",
                "compliance_reporter",
                "security_auditor",
                "cost_analyzer",
                "document_generator"
            ]
        );
    }

    #[tokio::test]
    async fn test_invoke_envelopes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = test_context(tmp.path());
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool("e")));

        let ok = registry.invoke("echo", json!({"text": "hi"}), &ctx).await;
        assert_eq!(ok["status"], "success");
        assert_eq!(ok["result"]["mode"], "plain");
        assert!(ok["timestamp"].is_string());

        let failed = registry.invoke("echo", json!({"text": "boom"}), &ctx).await;
        assert_eq!(failed["status"], "error");
        assert_eq!(failed["error"], "echo exploded");

        let missing = registry.invoke("nope", json!({}), &ctx).await;
        assert_eq!(missing["error"], "Tool 'nope' not found");

        let invalid = registry.invoke("echo", json!({}), &ctx).await;
        assert_eq!(
            invalid["error"],
            "Invalid parameters: missing required parameter: text"
        );
    }

    #[test]
    fn test_sibling_path() {
        assert_eq!(
            sibling_path(Path::new("out/analysis.json"), "_report", "html"),
            PathBuf::from("out/analysis_report.html")
        );
    }
}
