//! Plan analysis tools: the compliance pipeline and the rule-based security scan.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;

use super::{now_iso, str_param, Tool, ToolContext};
use crate::inspect::{run_inspection, InspectRequest};
use crate::progress::NoProgress;
use crate::security::{audit_plan_file, AuditLevel};

/// Runs the full retrieval + LLM compliance pipeline over one plan.
pub struct TerraformAnalyzerTool;

#[async_trait]
impl Tool for TerraformAnalyzerTool {
    fn id(&self) -> &str {
        "terraform_analyzer"
    }

    fn name(&self) -> &str {
        "Terraform Compliance Analyzer"
    }

    fn description(&self) -> &str {
        "Analyze a Terraform plan for compliance violations using retrieved reference documents and an LLM"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "plan_json": { "type": "string", "description": "Path to the Terraform plan JSON file" },
                "output_path": { "type": "string", "description": "Where to write the validated findings JSON" },
                "refdir": { "type": "string", "description": "Directory of reference documents" },
                "user_message": { "type": "string", "description": "Question to ask about the plan" }
            },
            "required": ["plan_json", "output_path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let mut request = InspectRequest::new(str_param(&params, "plan_json"), str_param(&params, "output_path"));
        request.refdir = params["refdir"].as_str().map(PathBuf::from);
        request.question = params["user_message"].as_str().map(|s| s.to_string());

        let outcome = run_inspection(&ctx.config, &request, ctx.llm.as_ref(), &NoProgress).await?;

        Ok(json!({
            "analysis_status": "completed",
            "output_file": outcome.output_path,
            "raw_output_file": outcome.raw_output_path,
            "total_violations": outcome.total_violations,
            "severity_breakdown": outcome.severity_breakdown,
            "dropped_records": outcome.dropped.len(),
            "analysis_data": outcome.report,
            "sources": outcome.sources,
            "model": outcome.model,
            "user_query": request.question,
            "timestamp": now_iso(),
        }))
    }
}

/// Deterministic security checks over planned resource values.
pub struct SecurityAuditorTool;

#[async_trait]
impl Tool for SecurityAuditorTool {
    fn id(&self) -> &str {
        "security_auditor"
    }

    fn name(&self) -> &str {
        "Security Auditor"
    }

    fn description(&self) -> &str {
        "Scan a Terraform plan for hardcoded secrets, missing encryption, public access and open ingress"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "plan_json": { "type": "string", "description": "Path to the Terraform plan JSON file" },
                "output_path": { "type": "string", "description": "Where to write the findings JSON" },
                "audit_level": {
                    "type": "string",
                    "enum": ["basic", "comprehensive"],
                    "default": "comprehensive",
                    "description": "Comprehensive adds logging, versioning and IMDSv2 checks"
                },
                "include_secrets_scan": { "type": "boolean", "default": true, "description": "Look for hardcoded secrets" }
            },
            "required": ["plan_json", "output_path"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let level = AuditLevel::parse(str_param(&params, "audit_level"))?;
        let secrets_scan = params["include_secrets_scan"].as_bool().unwrap_or(true);
        let output = PathBuf::from(str_param(&params, "output_path"));

        let audit = audit_plan_file(
            &PathBuf::from(str_param(&params, "plan_json")),
            &output,
            level,
            secrets_scan,
        )?;

        Ok(json!({
            "audit_status": "completed",
            "audit_level": level,
            "output_file": output,
            "high_risk_count": audit.high_risk_count(),
            "total_findings": audit.total_findings,
            "security_findings": audit.security_findings,
            "timestamp": now_iso(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests::test_context;
    use crate::tools::ToolRegistry;
    use tempfile::TempDir;

    const PLAN: &str = r#"{"resource_changes":[
        {"address":"aws_db_instance.main","type":"aws_db_instance","name":"main",
         "change":{"actions":["create"],"after":{"password":"hunter2","storage_encrypted":true}}}
    ]}"#;

    #[tokio::test]
    async fn test_security_auditor_writes_findings() {
        let tmp = TempDir::new().unwrap();
        let plan = tmp.path().join("plan.json");
        std::fs::write(&plan, PLAN).unwrap();
        let out = tmp.path().join("security.json");
        let ctx = test_context(tmp.path());

        let result = ToolRegistry::with_builtins()
            .invoke(
                "security_auditor",
                json!({"plan_json": plan, "output_path": out}),
                &ctx,
            )
            .await;

        assert_eq!(result["status"], "success");
        assert_eq!(result["result"]["audit_level"], "comprehensive");
        assert_eq!(result["result"]["total_findings"], 1);
        assert_eq!(result["result"]["security_findings"][0]["type"], "hardcoded_secret");
        assert!(out.exists());
    }

    #[tokio::test]
    async fn test_terraform_analyzer_runs_pipeline() {
        let tmp = TempDir::new().unwrap();
        let plan = tmp.path().join("plan.json");
        std::fs::write(&plan, PLAN).unwrap();
        let prompts = tmp.path().join("prompts");
        std::fs::create_dir_all(&prompts).unwrap();
        std::fs::write(prompts.join("main.txt"), "Audit this plan.").unwrap();

        let mut ctx = test_context(tmp.path());
        let mut config = (*ctx.config).clone();
        config.prompts.dir = prompts;
        config.prompts.file = "main.txt".to_string();
        ctx.config = std::sync::Arc::new(config);

        let out = tmp.path().join("findings.json");
        let result = ToolRegistry::with_builtins()
            .invoke(
                "terraform_analyzer",
                json!({"plan_json": plan, "output_path": out, "user_message": "Any HIPAA issues?"}),
                &ctx,
            )
            .await;

        assert_eq!(result["status"], "success", "{}", result);
        assert_eq!(result["result"]["analysis_status"], "completed");
        assert_eq!(result["result"]["total_violations"], 0);
        assert_eq!(result["result"]["user_query"], "Any HIPAA issues?");
        assert!(out.exists());
        assert!(tmp.path().join("findings.raw.txt").exists());
    }

    #[tokio::test]
    async fn test_terraform_analyzer_missing_plan_is_error_envelope() {
        let tmp = TempDir::new().unwrap();
        let ctx = test_context(tmp.path());
        let result = ToolRegistry::with_builtins()
            .invoke(
                "terraform_analyzer",
                json!({"plan_json": tmp.path().join("nope.json"), "output_path": tmp.path().join("o.json")}),
                &ctx,
            )
            .await;
        assert_eq!(result["status"], "error");
    }
}
