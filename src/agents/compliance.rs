//! `compliance_agent`: runs the compliance pipeline and keeps a history of results.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{required_str, round2, trend, ActionInfo, Agent, AgentContext, AgentState};
use crate::tools::now_iso;

const SYSTEM_PROMPT: &str = "You are a compliance analyst for cloud infrastructure. \
Review Terraform plans against HIPAA, GDPR, PCI DSS, SOX, ISO 27001 and NIST guidance, \
name the affected resource for every finding, rate its severity as Low, Medium or High, \
and give a concrete remediation.";

pub struct ComplianceAgent {
    state: AgentState,
}

impl ComplianceAgent {
    pub fn new() -> Self {
        Self {
            state: AgentState::new(),
        }
    }

    async fn analyze_compliance(&self, params: Value, ctx: &AgentContext<'_>) -> Result<Value> {
        let plan_json = required_str(&params, "plan_json")?;
        let output_path = ctx.output_path(&params, "output_path", "compliance_analysis");
        let user_message = params["user_message"].as_str();

        self.state.update_progress(0.2);
        let mut analyzer_params = json!({ "plan_json": plan_json, "output_path": output_path });
        if let Some(refdir) = params["refdir"].as_str() {
            analyzer_params["refdir"] = json!(refdir);
        }
        if let Some(message) = user_message {
            analyzer_params["user_message"] = json!(message);
        }
        let analysis = ctx
            .call_tool("terraform_analyzer", analyzer_params, "Compliance analysis")
            .await?;

        self.state.update_progress(0.6);
        let report_file = ctx
            .try_tool(
                "compliance_reporter",
                json!({ "analysis_file": output_path, "report_format": "html" }),
            )
            .await
            .map(|r| r["report_file"].clone())
            .unwrap_or(Value::Null);

        self.state.update_progress(0.8);
        let summary_file = ctx
            .try_tool(
                "document_generator",
                json!({
                    "analysis_file": output_path,
                    "document_type": "executive_summary",
                    "output_format": "html"
                }),
            )
            .await
            .map(|r| r["document_file"].clone())
            .unwrap_or(Value::Null);

        let total_violations = analysis["total_violations"].as_u64().unwrap_or(0);
        self.state.remember(
            "analysis",
            json!({
                "plan_json": plan_json,
                "output_path": output_path,
                "user_message": user_message,
                "analysis_timestamp": now_iso(),
                "total_violations": total_violations,
                "report_file": report_file,
                "summary_file": summary_file,
            }),
        );

        Ok(json!({
            "status": "success",
            "message": "Compliance analysis completed successfully",
            "analysis_file": output_path,
            "raw_output_file": analysis["raw_output_file"],
            "report_file": report_file,
            "summary_file": summary_file,
            "total_violations": total_violations,
            "severity_breakdown": analysis["severity_breakdown"],
            "timestamp": now_iso(),
        }))
    }

    async fn generate_report(&self, params: Value, ctx: &AgentContext<'_>) -> Result<Value> {
        let analysis_file = required_str(&params, "analysis_file")?;
        let report_type = params["report_type"].as_str().unwrap_or("compliance_report");
        let output_format = params["output_format"].as_str().unwrap_or("html");

        let result = ctx
            .call_tool(
                "document_generator",
                json!({
                    "analysis_file": analysis_file,
                    "document_type": report_type,
                    "output_format": output_format
                }),
                "Report generation",
            )
            .await?;

        Ok(json!({
            "status": "success",
            "message": "Report generated successfully",
            "report_file": result["document_file"],
            "report_type": report_type,
            "output_format": output_format,
            "timestamp": now_iso(),
        }))
    }

    async fn generate_executive_summary(&self, params: Value, ctx: &AgentContext<'_>) -> Result<Value> {
        let analysis_file = required_str(&params, "analysis_file")?;
        let result = ctx
            .call_tool(
                "document_generator",
                json!({
                    "analysis_file": analysis_file,
                    "document_type": "executive_summary",
                    "output_format": "html"
                }),
                "Executive summary generation",
            )
            .await?;

        Ok(json!({
            "status": "success",
            "message": "Executive summary generated successfully",
            "summary_file": result["document_file"],
            "timestamp": now_iso(),
        }))
    }

    fn get_compliance_status(&self) -> Value {
        let recent = self.state.recall("analysis");
        let counts: Vec<f64> = recent
            .iter()
            .map(|a| a["total_violations"].as_f64().unwrap_or(0.0))
            .collect();
        let total: f64 = counts.iter().sum();
        let average = if counts.is_empty() {
            0.0
        } else {
            total / counts.len() as f64
        };

        json!({
            "status": "success",
            "compliance_status": {
                "total_analyses": recent.len(),
                "total_violations": total as u64,
                "average_violations": round2(average),
                "trend": trend(&counts, "improving"),
                "last_analysis": recent.first(),
                "recent_analyses": recent.iter().take(5).collect::<Vec<_>>(),
            },
            "timestamp": now_iso(),
        })
    }
}

impl Default for ComplianceAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for ComplianceAgent {
    fn id(&self) -> &str {
        "compliance_agent"
    }

    fn name(&self) -> &str {
        "Compliance Analysis Agent"
    }

    fn description(&self) -> &str {
        "Analyzes Terraform plans for regulatory compliance and produces reports"
    }

    fn system_prompt(&self) -> &str {
        SYSTEM_PROMPT
    }

    fn tools(&self) -> Vec<String> {
        vec![
            "terraform_analyzer".to_string(),
            "compliance_reporter".to_string(),
            "document_generator".to_string(),
        ]
    }

    fn actions(&self) -> Vec<ActionInfo> {
        vec![
            ActionInfo::new("analyze_compliance", "Run the compliance pipeline, then write a report and an executive summary"),
            ActionInfo::new("generate_report", "Render a document from an existing analysis file"),
            ActionInfo::new("generate_executive_summary", "Render an HTML executive summary from an analysis file"),
            ActionInfo::new("get_compliance_status", "Totals, average and trend over past analyses"),
        ]
    }

    fn state(&self) -> &AgentState {
        &self.state
    }

    async fn run_action(&self, action: &str, params: Value, ctx: &AgentContext<'_>) -> Result<Value> {
        match action {
            "analyze_compliance" => self.analyze_compliance(params, ctx).await,
            "generate_report" => self.generate_report(params, ctx).await,
            "generate_executive_summary" => self.generate_executive_summary(params, ctx).await,
            "get_compliance_status" => Ok(self.get_compliance_status()),
            other => bail!("Unknown action: {}", other),
        }
    }
}
