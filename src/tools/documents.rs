//! Report and document rendering tools.
//!
//! Both read an analysis file written by another tool and write their
//! output next to it:
//!
//! | Tool | Output |
//! |------|--------|
//! | `compliance_reporter` | `<stem>_report.html` or `<stem>_report.json` |
//! | `document_generator` | `<stem>_<document_type>.<output_format>` |

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;

use super::{now_iso, sibling_path, str_param, write_file, Tool, ToolContext};
use crate::report::{
    compliance_report_html, compliance_report_json, load_analysis, render_document, DocumentType,
    OutputFormat,
};
use crate::validate::load_report;

pub struct ComplianceReporterTool;

#[async_trait]
impl Tool for ComplianceReporterTool {
    fn id(&self) -> &str {
        "compliance_reporter"
    }

    fn name(&self) -> &str {
        "Compliance Reporter"
    }

    fn description(&self) -> &str {
        "Render a compliance findings file as an HTML or JSON report"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "analysis_file": { "type": "string", "description": "Findings JSON written by terraform_analyzer" },
                "report_format": { "type": "string", "enum": ["html", "json"], "default": "html" },
                "include_recommendations": { "type": "boolean", "default": true }
            },
            "required": ["analysis_file"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let analysis_file = PathBuf::from(str_param(&params, "analysis_file"));
        if !analysis_file.exists() {
            bail!("Analysis file not found: {}", analysis_file.display());
        }
        let report = load_report(&analysis_file)?;
        let include_recs = params["include_recommendations"].as_bool().unwrap_or(true);
        let format = str_param(&params, "report_format");

        let (path, content) = match format {
            "json" => (
                sibling_path(&analysis_file, "_report", "json"),
                serde_json::to_string_pretty(&compliance_report_json(&report, include_recs))?,
            ),
            _ => (
                sibling_path(&analysis_file, "_report", "html"),
                compliance_report_html(&report, include_recs),
            ),
        };
        write_file(&path, &content)?;

        Ok(json!({
            "status": "success",
            "report_file": path,
            "report_format": format,
            "total_violations": report.violations.len(),
            "timestamp": now_iso(),
        }))
    }
}

pub struct DocumentGeneratorTool;

#[async_trait]
impl Tool for DocumentGeneratorTool {
    fn id(&self) -> &str {
        "document_generator"
    }

    fn name(&self) -> &str {
        "Document Generator"
    }

    fn description(&self) -> &str {
        "Generate an executive summary, technical report or framework compliance document from an analysis file"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "analysis_file": { "type": "string", "description": "Compliance, security or cost analysis JSON" },
                "document_type": {
                    "type": "string",
                    "enum": ["executive_summary", "technical_report", "compliance_report"]
                },
                "output_format": { "type": "string", "enum": ["html", "markdown", "json"], "default": "html" }
            },
            "required": ["analysis_file", "document_type"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let analysis_file = PathBuf::from(str_param(&params, "analysis_file"));
        let doc = DocumentType::parse(str_param(&params, "document_type"))?;
        let format = OutputFormat::parse(str_param(&params, "output_format"))?;

        let data = load_analysis(&analysis_file)?;
        let content = render_document(&data, doc, format)?;
        let path = sibling_path(
            &analysis_file,
            &format!("_{}", doc.as_str()),
            format.as_str(),
        );
        write_file(&path, &content)?;

        Ok(json!({
            "status": "success",
            "document_file": path,
            "document_type": doc.as_str(),
            "output_format": format.as_str(),
            "timestamp": now_iso(),
        }))
    }
}
