//! `cost_agent`: category cost estimates, optimization advice and cost history.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{required_str, round2, trend, ActionInfo, Agent, AgentContext, AgentState};
use crate::cost::{optimization_recommendations, potential_savings, CategoryEstimate, COST_CATEGORIES};
use crate::tools::now_iso;

const SYSTEM_PROMPT: &str = "You are a FinOps analyst. Estimate the monthly cost of planned \
infrastructure changes, break it down by category and point out the cheapest safe way to \
run each expensive resource.";

pub struct CostAgent {
    state: AgentState,
}

impl CostAgent {
    pub fn new() -> Self {
        Self {
            state: AgentState::new(),
        }
    }

    async fn analyze_costs(&self, params: Value, ctx: &AgentContext<'_>) -> Result<Value> {
        let plan_json = required_str(&params, "plan_json")?;
        let region = params["region"].as_str().unwrap_or("us-east-1");
        let include_estimate = params["include_estimate"].as_bool().unwrap_or(true);
        let output_path = ctx.output_path(&params, "output_path", "cost_analysis");

        self.state.update_progress(0.3);
        let result = ctx
            .call_tool(
                "cost_analyzer",
                json!({
                    "plan_json": plan_json,
                    "region": region,
                    "include_estimate": include_estimate,
                    "output_path": output_path
                }),
                "Cost analysis",
            )
            .await?;

        self.state.update_progress(0.7);
        let report_file = ctx
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

        let analysis = &result["analysis"];
        let total = analysis["total_estimated_monthly_cost"].as_f64().unwrap_or(0.0);
        self.state.remember(
            "cost_analysis",
            json!({
                "plan_json": plan_json,
                "region": region,
                "analysis_timestamp": now_iso(),
                "total_monthly_cost": total,
                "cost_breakdown": analysis["cost_breakdown"],
                "resource_costs": analysis["resource_costs"],
                "report_file": report_file,
            }),
        );

        Ok(json!({
            "status": "success",
            "message": "Cost analysis completed successfully",
            "analysis_file": output_path,
            "total_monthly_cost": total,
            "cost_breakdown": analysis["cost_breakdown"],
            "resource_costs": analysis["resource_costs"],
            "report_file": report_file,
            "region": region,
            "timestamp": now_iso(),
        }))
    }

    async fn optimize_costs(&self, params: Value, ctx: &AgentContext<'_>) -> Result<Value> {
        let plan_json = required_str(&params, "plan_json")?;
        let region = params["region"].as_str().unwrap_or("us-east-1");

        let result = ctx
            .call_tool(
                "cost_analyzer",
                json!({ "plan_json": plan_json, "region": region, "include_estimate": true }),
                "Cost optimization",
            )
            .await?;

        let analysis = &result["analysis"];
        let costs: Vec<CategoryEstimate> = serde_json::from_value(analysis["resource_costs"].clone())?;
        let recommendations = optimization_recommendations(&costs);
        let savings = potential_savings(&recommendations);
        let current = analysis["total_estimated_monthly_cost"].as_f64().unwrap_or(0.0);
        let percentage = if current > 0.0 {
            savings / current * 100.0
        } else {
            0.0
        };

        Ok(json!({
            "status": "success",
            "message": "Cost optimization analysis completed",
            "current_monthly_cost": current,
            "potential_monthly_savings": savings,
            "savings_percentage": round2(percentage),
            "optimization_recommendations": recommendations,
            "region": region,
            "timestamp": now_iso(),
        }))
    }

    async fn generate_cost_report(&self, params: Value, ctx: &AgentContext<'_>) -> Result<Value> {
        let analysis_file = required_str(&params, "analysis_file")?;
        let result = ctx
            .call_tool(
                "document_generator",
                json!({
                    "analysis_file": analysis_file,
                    "document_type": "executive_summary",
                    "output_format": "html"
                }),
                "Cost report generation",
            )
            .await?;
        Ok(json!({
            "status": "success",
            "message": "Cost report generated successfully",
            "report_file": result["document_file"],
            "timestamp": now_iso(),
        }))
    }

    fn get_cost_status(&self) -> Value {
        let recent = self.state.recall("cost_analysis");
        let costs: Vec<f64> = recent
            .iter()
            .map(|a| a["total_monthly_cost"].as_f64().unwrap_or(0.0))
            .collect();
        let total: f64 = costs.iter().sum();
        let average = if costs.is_empty() {
            0.0
        } else {
            total / costs.len() as f64
        };

        json!({
            "status": "success",
            "cost_status": {
                "total_analyses": recent.len(),
                "total_monthly_cost": round2(total),
                "average_monthly_cost": round2(average),
                "trend": trend(&costs, "decreasing"),
                "cost_breakdown_trends": breakdown_trends(&recent),
                "last_analysis": recent.first(),
                "recent_analyses": recent.iter().take(5).collect::<Vec<_>>(),
            },
            "timestamp": now_iso(),
        })
    }
}

/// Per-category average over the five newest analyses.
fn breakdown_trends(newest_first: &[Value]) -> Value {
    let breakdowns: Vec<&Map<String, Value>> = newest_first
        .iter()
        .take(5)
        .filter_map(|a| a["cost_breakdown"].as_object())
        .filter(|b| !b.is_empty())
        .collect();

    let mut out = Map::new();
    if breakdowns.is_empty() {
        return Value::Object(out);
    }
    for category in COST_CATEGORIES {
        let sum: f64 = breakdowns
            .iter()
            .map(|b| b.get(category).and_then(|v| v.as_f64()).unwrap_or(0.0))
            .sum();
        out.insert(
            category.to_string(),
            json!({ "average_cost": round2(sum / breakdowns.len() as f64), "trend": "stable" }),
        );
    }
    Value::Object(out)
}

impl Default for CostAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for CostAgent {
    fn id(&self) -> &str {
        "cost_agent"
    }

    fn name(&self) -> &str {
        "Cost Analysis Agent"
    }

    fn description(&self) -> &str {
        "Estimates infrastructure costs and recommends savings"
    }

    fn system_prompt(&self) -> &str {
        SYSTEM_PROMPT
    }

    fn tools(&self) -> Vec<String> {
        vec!["cost_analyzer".to_string(), "document_generator".to_string()]
    }

    fn actions(&self) -> Vec<ActionInfo> {
        vec![
            ActionInfo::new("analyze_costs", "Estimate monthly costs by category and write a summary"),
            ActionInfo::new("optimize_costs", "Recommend cheaper configurations and the potential savings"),
            ActionInfo::new("generate_cost_report", "Render an executive summary from a cost analysis file"),
            ActionInfo::new("get_cost_status", "Totals, averages and trend over past cost analyses"),
        ]
    }

    fn state(&self) -> &AgentState {
        &self.state
    }

    async fn run_action(&self, action: &str, params: Value, ctx: &AgentContext<'_>) -> Result<Value> {
        match action {
            "analyze_costs" => self.analyze_costs(params, ctx).await,
            "optimize_costs" => self.optimize_costs(params, ctx).await,
            "generate_cost_report" => self.generate_cost_report(params, ctx).await,
            "get_cost_status" => Ok(self.get_cost_status()),
            other => bail!("Unknown action: {}", other),
        }
    }
}
