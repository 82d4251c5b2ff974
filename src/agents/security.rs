//! `security_agent`: rule-based security audits with an optional compliance pass.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use super::{required_str, round2, trend, ActionInfo, Agent, AgentContext, AgentState};
use crate::plan::load_plan;
use crate::tools::{now_iso, sibling_path};

const SYSTEM_PROMPT: &str = "You are a cloud security auditor. Inspect Terraform plans for \
hardcoded credentials, unencrypted storage, publicly reachable resources and overly broad \
network rules, and explain the risk and the fix for each finding.";

pub struct SecurityAgent {
    state: AgentState,
}

impl SecurityAgent {
    pub fn new() -> Self {
        Self {
            state: AgentState::new(),
        }
    }

    async fn run_audit(
        &self,
        ctx: &AgentContext<'_>,
        plan_json: &str,
        output_path: &Path,
        audit_level: &str,
        secrets_scan: bool,
    ) -> Result<Value> {
        ctx.call_tool(
            "security_auditor",
            json!({
                "plan_json": plan_json,
                "output_path": output_path,
                "audit_level": audit_level,
                "include_secrets_scan": secrets_scan
            }),
            "Security audit",
        )
        .await
    }

    async fn audit_security(&self, params: Value, ctx: &AgentContext<'_>) -> Result<Value> {
        let plan_json = required_str(&params, "plan_json")?;
        let framework = params["security_framework"].as_str().unwrap_or("CIS");
        let secrets_scan = params["include_secrets_scan"].as_bool().unwrap_or(true);
        let audit_level = params["audit_level"].as_str().unwrap_or("comprehensive");
        let output_path = ctx.output_path(&params, "output_path", "security_audit");

        self.state.update_progress(0.3);
        let audit = self
            .run_audit(ctx, plan_json, &output_path, audit_level, secrets_scan)
            .await?;

        let mut compliance_file = Value::Null;
        if params["include_compliance_context"].as_bool().unwrap_or(false) {
            self.state.update_progress(0.5);
            let path = sibling_path(&output_path, "_compliance", "json");
            let context = ctx
                .try_tool(
                    "terraform_analyzer",
                    json!({
                        "plan_json": plan_json,
                        "output_path": path,
                        "user_message": format!("Identify security weaknesses relevant to the {} benchmark", framework)
                    }),
                )
                .await;
            if context.is_some() {
                compliance_file = json!(path);
            }
        }

        self.state.update_progress(0.7);
        let report_file = ctx
            .try_tool(
                "document_generator",
                json!({
                    "analysis_file": output_path,
                    "document_type": "technical_report",
                    "output_format": "html"
                }),
            )
            .await
            .map(|r| r["document_file"].clone())
            .unwrap_or(Value::Null);

        let total_findings = audit["total_findings"].as_u64().unwrap_or(0);
        let high_risk = audit["high_risk_count"].as_u64().unwrap_or(0);
        self.state.remember(
            "security_audit",
            json!({
                "plan_json": plan_json,
                "output_path": output_path,
                "framework": framework,
                "analysis_timestamp": now_iso(),
                "total_security_findings": total_findings,
                "high_risk_findings": high_risk,
                "report_file": report_file,
            }),
        );

        Ok(json!({
            "status": "success",
            "message": "Security audit completed successfully",
            "security_findings": audit["security_findings"],
            "total_findings": total_findings,
            "high_risk_count": high_risk,
            "audit_file": output_path,
            "report_file": report_file,
            "compliance_file": compliance_file,
            "framework": framework,
            "timestamp": now_iso(),
        }))
    }

    /// Audit with the secrets scan on and keep findings whose type matches `marker`.
    async fn filtered_findings(&self, params: &Value, ctx: &AgentContext<'_>, marker: &str) -> Result<Vec<Value>> {
        let plan_json = required_str(params, "plan_json")?;
        let output_path = ctx.output_path(params, "output_path", &format!("security_{}", marker));
        let audit = self
            .run_audit(ctx, plan_json, &output_path, "basic", true)
            .await?;
        Ok(audit["security_findings"]
            .as_array()
            .map(|findings| {
                findings
                    .iter()
                    .filter(|f| f["type"].as_str().is_some_and(|t| t.contains(marker)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn analyze_secrets(&self, params: Value, ctx: &AgentContext<'_>) -> Result<Value> {
        let secrets = self.filtered_findings(&params, ctx, "secret").await?;
        let high_risk = secrets.iter().filter(|f| f["severity"] == "high").count();
        Ok(json!({
            "status": "success",
            "message": "Secrets analysis completed",
            "total_secrets": secrets.len(),
            "high_risk_secrets": high_risk,
            "secrets_findings": secrets,
            "timestamp": now_iso(),
        }))
    }

    async fn check_encryption(&self, params: Value, ctx: &AgentContext<'_>) -> Result<Value> {
        let plan = load_plan(&PathBuf::from(required_str(&params, "plan_json")?))?;
        let issues = self.filtered_findings(&params, ctx, "encryption").await?;
        let compliance = if issues.is_empty() {
            "compliant"
        } else {
            "non-compliant"
        };
        Ok(json!({
            "status": "success",
            "message": "Encryption check completed",
            "encryption_status": {
                "total_resources_checked": plan.resource_changes.len(),
                "encryption_issues": issues.len(),
                "encryption_compliance": compliance,
                "findings": issues,
            },
            "timestamp": now_iso(),
        }))
    }

    async fn generate_security_report(&self, params: Value, ctx: &AgentContext<'_>) -> Result<Value> {
        let analysis_file = required_str(&params, "analysis_file")?;
        let result = ctx
            .call_tool(
                "document_generator",
                json!({
                    "analysis_file": analysis_file,
                    "document_type": "technical_report",
                    "output_format": "html"
                }),
                "Security report generation",
            )
            .await?;
        Ok(json!({
            "status": "success",
            "message": "Security report generated successfully",
            "report_file": result["document_file"],
            "timestamp": now_iso(),
        }))
    }

    fn get_security_status(&self) -> Value {
        let recent = self.state.recall("security_audit");
        let findings: Vec<f64> = recent
            .iter()
            .map(|a| a["total_security_findings"].as_f64().unwrap_or(0.0))
            .collect();
        let total: f64 = findings.iter().sum();
        let high_risk: u64 = recent
            .iter()
            .map(|a| a["high_risk_findings"].as_u64().unwrap_or(0))
            .sum();
        let average = if findings.is_empty() {
            0.0
        } else {
            total / findings.len() as f64
        };

        json!({
            "status": "success",
            "security_status": {
                "total_audits": recent.len(),
                "total_findings": total as u64,
                "total_high_risk_findings": high_risk,
                "average_findings": round2(average),
                "trend": trend(&findings, "improving"),
                "last_audit": recent.first(),
                "recent_audits": recent.iter().take(5).collect::<Vec<_>>(),
            },
            "timestamp": now_iso(),
        })
    }
}

impl Default for SecurityAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for SecurityAgent {
    fn id(&self) -> &str {
        "security_agent"
    }

    fn name(&self) -> &str {
        "Security Audit Agent"
    }

    fn description(&self) -> &str {
        "Audits Terraform plans for secrets, encryption gaps and exposed resources"
    }

    fn system_prompt(&self) -> &str {
        SYSTEM_PROMPT
    }

    fn tools(&self) -> Vec<String> {
        vec![
            "security_auditor".to_string(),
            "terraform_analyzer".to_string(),
            "document_generator".to_string(),
        ]
    }

    fn actions(&self) -> Vec<ActionInfo> {
        vec![
            ActionInfo::new("audit_security", "Run a security audit and write a technical report"),
            ActionInfo::new("analyze_secrets", "List hardcoded secrets in a plan"),
            ActionInfo::new("check_encryption", "Report resources missing encryption at rest"),
            ActionInfo::new("generate_security_report", "Render a technical report from an audit file"),
            ActionInfo::new("get_security_status", "Totals, average and trend over past audits"),
        ]
    }

    fn state(&self) -> &AgentState {
        &self.state
    }

    async fn run_action(&self, action: &str, params: Value, ctx: &AgentContext<'_>) -> Result<Value> {
        match action {
            "audit_security" => self.audit_security(params, ctx).await,
            "analyze_secrets" => self.analyze_secrets(params, ctx).await,
            "check_encryption" => self.check_encryption(params, ctx).await,
            "generate_security_report" => self.generate_security_report(params, ctx).await,
            "get_security_status" => Ok(self.get_security_status()),
            other => bail!("Unknown action: {}", other),
        }
    }
}
