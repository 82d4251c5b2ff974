//! Category-based cost analysis tool.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;

use super::{now_iso, str_param, write_file, Tool, ToolContext};
use crate::cost::analyze_costs;
use crate::plan::load_plan;

pub struct CostAnalyzerTool;

#[async_trait]
impl Tool for CostAnalyzerTool {
    fn id(&self) -> &str {
        "cost_analyzer"
    }

    fn name(&self) -> &str {
        "Infrastructure Cost Analyzer"
    }

    fn description(&self) -> &str {
        "Estimate monthly infrastructure costs by category from a Terraform plan"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "plan_json": { "type": "string", "description": "Path to the Terraform plan JSON file" },
                "region": { "type": "string", "default": "us-east-1", "description": "AWS region for pricing" },
                "include_estimate": { "type": "boolean", "default": true, "description": "Include per-resource estimates" },
                "output_path": { "type": "string", "description": "Also write the analysis JSON here" }
            },
            "required": ["plan_json"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let plan = load_plan(&PathBuf::from(str_param(&params, "plan_json")))?;
        let analysis = analyze_costs(
            &plan,
            str_param(&params, "region"),
            params["include_estimate"].as_bool().unwrap_or(true),
        );

        let output_file = match params["output_path"].as_str() {
            Some(path) => {
                let path = PathBuf::from(path);
                write_file(&path, &serde_json::to_string_pretty(&analysis)?)?;
                Some(path)
            }
            None => None,
        };

        Ok(json!({
            "cost_analysis_status": "completed",
            "analysis": analysis,
            "output_file": output_file,
            "timestamp": now_iso(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::tools::tests::test_context;
    use crate::tools::ToolRegistry;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_cost_analyzer_categories() {
        let tmp = TempDir::new().unwrap();
        let plan = tmp.path().join("plan.json");
        std::fs::write(
            &plan,
            r#"{"resource_changes":[
                {"address":"aws_instance.a","type":"aws_instance","name":"a","change":{"actions":["create"]}},
                {"address":"aws_db_instance.d","type":"aws_db_instance","name":"d","change":{"actions":["update"]}},
                {"address":"aws_vpc.v","type":"aws_vpc","name":"v","change":{"actions":["delete"]}}
            ]}"#,
        )
        .unwrap();
        let out = tmp.path().join("cost.json");
        let ctx = test_context(tmp.path());

        let result = ToolRegistry::with_builtins()
            .invoke("cost_analyzer", json!({"plan_json": plan, "output_path": out}), &ctx)
            .await;

        let analysis = &result["result"]["analysis"];
        assert_eq!(result["result"]["cost_analysis_status"], "completed");
        assert_eq!(analysis["region"], "us-east-1");
        assert_eq!(analysis["total_estimated_monthly_cost"], 250.0);
        assert_eq!(analysis["cost_breakdown"]["compute"], 50.0);
        assert_eq!(analysis["cost_breakdown"]["database"], 200.0);
        assert_eq!(analysis["resource_costs"].as_array().unwrap().len(), 2);
        assert!(out.exists());
    }
}
