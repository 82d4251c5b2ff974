//! Cost estimation for Terraform plans.
//!
//! Two views of the same plan:
//!
//! - [`summarize_costs`]: per-action groups priced with the [`CostEstimator`]
//!   (static table, optionally live AWS prices). Only creates count toward
//!   the monthly total.
//! - [`analyze_costs`]: category breakdown (compute, storage, network,
//!   database, other) with rough per-category figures, used by the cost
//!   tool and agent together with [`optimization_recommendations`].
//!
//! # Static prices (USD / month)
//!
//! | Resource type | Price |
//! |---------------|-------|
//! | `aws_instance` | 25.00 |
//! | `aws_db_instance` | 20.00 |
//! | `aws_cloudfront_distribution` | 2.50 |
//! | `aws_lambda_function` | 1.50 |
//! | `aws_kms_key` | 1.00 |
//! | `aws_s3_bucket` | 0.02 |
//! | `aws_iam_role`, `aws_subnet`, `aws_security_group`, `aws_vpc` | 0.00 |
//! | anything else | `pricing.default_cost` (0.50) |

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::config::PricingConfig;
use crate::models::{ResourceChange, TerraformPlan};

pub const STATIC_PRICES: [(&str, f64); 10] = [
    ("aws_instance", 25.0),
    ("aws_s3_bucket", 0.02),
    ("aws_cloudfront_distribution", 2.5),
    ("aws_iam_role", 0.0),
    ("aws_kms_key", 1.0),
    ("aws_db_instance", 20.0),
    ("aws_subnet", 0.0),
    ("aws_security_group", 0.0),
    ("aws_vpc", 0.0),
    ("aws_lambda_function", 1.5),
];

/// Region used when a resource carries no region hint.
pub const FALLBACK_REGION: &str = "us-west-2";

pub fn static_price(resource_type: &str) -> Option<f64> {
    STATIC_PRICES
        .iter()
        .find(|(t, _)| *t == resource_type)
        .map(|(_, p)| *p)
}

// ═══════════════════════════════════════════════════════════════════════
// Regions
// ═══════════════════════════════════════════════════════════════════════

/// Region named by a resource's own attributes, if any.
///
/// `region` wins; otherwise `availability_zone` minus its zone letter.
pub fn region_hint(values: &serde_json::Map<String, serde_json::Value>) -> Option<String> {
    if let Some(region) = values.get("region").and_then(|v| v.as_str()) {
        if !region.is_empty() {
            return Some(region.to_string());
        }
    }
    values
        .get("availability_zone")
        .and_then(|v| v.as_str())
        .filter(|az| az.len() > 1)
        .map(|az| {
            let mut region = az.to_string();
            region.pop();
            region
        })
}

/// [`region_hint`] with the `us-west-2` fallback.
pub fn detect_region(values: &serde_json::Map<String, serde_json::Value>) -> String {
    region_hint(values).unwrap_or_else(|| FALLBACK_REGION.to_string())
}

/// Pricing API location name for a region code. Unknown codes map to
/// `US West (Oregon)`.
pub fn region_to_location(region: &str) -> &'static str {
    match region {
        "us-east-1" => "US East (N. Virginia)",
        "us-east-2" => "US East (Ohio)",
        "us-west-1" => "US West (N. California)",
        "us-west-2" => "US West (Oregon)",
        "ca-central-1" => "Canada (Central)",
        "eu-west-1" => "EU (Ireland)",
        "eu-west-2" => "EU (London)",
        "eu-west-3" => "EU (Paris)",
        "eu-central-1" => "EU (Frankfurt)",
        "eu-north-1" => "EU (Stockholm)",
        "ap-southeast-1" => "Asia Pacific (Singapore)",
        "ap-southeast-2" => "Asia Pacific (Sydney)",
        "ap-northeast-1" => "Asia Pacific (Tokyo)",
        "ap-south-1" => "Asia Pacific (Mumbai)",
        "sa-east-1" => "South America (Sao Paulo)",
        "us-gov-west-1" => "AWS GovCloud (US-West)",
        "us-gov-east-1" => "AWS GovCloud (US-East)",
        _ => "US West (Oregon)",
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Estimator
// ═══════════════════════════════════════════════════════════════════════

/// A live price feed. `Ok(None)` means "no price for this resource".
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn monthly_price(&self, change: &ResourceChange, region: &str) -> Result<Option<f64>>;
}

/// Maps a resource to a monthly dollar estimate.
///
/// Live prices are cached per resource type for the estimator's lifetime.
/// The cache is never invalidated.
pub struct CostEstimator {
    default_cost: f64,
    region: Option<String>,
    live: Option<Arc<dyn PriceSource>>,
    cache: Mutex<HashMap<String, f64>>,
}

impl CostEstimator {
    /// Static table only.
    pub fn new(config: &PricingConfig) -> Self {
        Self {
            default_cost: config.default_cost,
            region: config.region.clone(),
            live: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Consult `source` first, falling back to the static table.
    pub fn with_source(config: &PricingConfig, source: Arc<dyn PriceSource>) -> Self {
        Self {
            live: Some(source),
            ..Self::new(config)
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    pub fn default_cost(&self) -> f64 {
        self.default_cost
    }

    /// Static price for a type, or the default.
    pub fn static_estimate(&self, resource_type: &str) -> f64 {
        static_price(resource_type).unwrap_or(self.default_cost)
    }

    pub fn cached(&self, resource_type: &str) -> Option<f64> {
        self.cache
            .lock()
            .ok()
            .and_then(|c| c.get(resource_type).copied())
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Region a live lookup uses for `change`: its own hint, then the
    /// configured override, then [`FALLBACK_REGION`].
    pub fn region_for(&self, change: &ResourceChange) -> String {
        match (&self.region, change.after_values()) {
            (None, Some(values)) => detect_region(values),
            (None, None) => FALLBACK_REGION.to_string(),
            (Some(fallback), values) => values.and_then(region_hint).unwrap_or_else(|| fallback.clone()),
        }
    }

    /// Estimate one resource. Never fails: live errors fall back to static.
    pub async fn estimate(&self, change: &ResourceChange) -> f64 {
        let resource_type = change.type_or_unknown();

        if let Some(source) = &self.live {
            if let Some(price) = self.cached(resource_type) {
                return price;
            }

            let region = self.region_for(change);

            match source.monthly_price(change, &region).await {
                Ok(Some(price)) => {
                    debug!(%resource_type, %region, price, "live price");
                    if let Ok(mut cache) = self.cache.lock() {
                        cache.insert(resource_type.to_string(), price);
                    }
                    return price;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(%resource_type, error = %e, "live pricing failed; using static price");
                }
            }
        }

        self.static_estimate(resource_type)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Action summary
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct ResourceCost {
    pub address: String,
    pub resource_type: String,
    pub monthly_cost: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionGroup {
    pub count: usize,
    pub cost: f64,
    pub resources: Vec<ResourceCost>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostSummary {
    /// Keys: `create`, `update`, `delete`, `other`.
    pub groups: BTreeMap<String, ActionGroup>,
    /// Sum over created resources only.
    pub total_monthly_cost: f64,
}

pub const ACTION_GROUPS: [&str; 4] = ["create", "update", "delete", "other"];

/// The first of create/update/delete present in the actions, else `other`.
pub fn action_group(change: &ResourceChange) -> &'static str {
    ["create", "update", "delete"]
        .into_iter()
        .find(|a| change.has_action(a))
        .unwrap_or("other")
}

pub async fn summarize_costs(plan: &TerraformPlan, estimator: &CostEstimator) -> CostSummary {
    let mut groups: BTreeMap<String, ActionGroup> = ACTION_GROUPS
        .iter()
        .map(|a| (a.to_string(), ActionGroup::default()))
        .collect();
    let mut total = 0.0;

    for change in &plan.resource_changes {
        let action = action_group(change);
        let cost = estimator.estimate(change).await;
        let group = groups.entry(action.to_string()).or_default();
        group.count += 1;
        group.cost += cost;
        group.resources.push(ResourceCost {
            address: change.display_name().to_string(),
            resource_type: change.type_or_unknown().to_string(),
            monthly_cost: cost,
        });
        if action == "create" {
            total += cost;
        }
    }

    CostSummary {
        groups,
        total_monthly_cost: total,
    }
}

/// `$1,234.56`
pub fn format_cost(amount: f64) -> String {
    let cents = (amount * 100.0).round() as i64;
    let dollars = cents.abs() / 100;
    let digits = dollars.to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if cents < 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, cents.abs() % 100)
}

// ═══════════════════════════════════════════════════════════════════════
// Category analysis
// ═══════════════════════════════════════════════════════════════════════

pub const COST_CATEGORIES: [&str; 5] = ["compute", "storage", "network", "database", "other"];

/// `(type fragment, category, monthly cost, description)`, first match wins.
const CATEGORY_ESTIMATES: [(&str, &str, f64, &str); 5] = [
    ("aws_instance", "compute", 50.0, "EC2 instance cost estimate"),
    ("aws_db_instance", "database", 200.0, "RDS instance cost estimate"),
    ("aws_s3_bucket", "storage", 5.0, "S3 bucket storage cost estimate"),
    ("aws_lambda_function", "compute", 10.0, "Lambda function cost estimate"),
    ("aws_cloudfront_distribution", "network", 15.0, "CloudFront distribution cost estimate"),
];

#[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq)]
pub struct CategoryEstimate {
    pub resource_type: String,
    pub resource_name: String,
    pub category: String,
    pub monthly_cost: f64,
    pub description: String,
    pub region: String,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct CostAnalysis {
    pub region: String,
    pub total_estimated_monthly_cost: f64,
    pub resource_costs: Vec<CategoryEstimate>,
    pub cost_breakdown: BTreeMap<String, f64>,
}

pub fn categorize(resource_type: &str, resource_name: &str, region: &str) -> CategoryEstimate {
    let (category, monthly_cost, description) = CATEGORY_ESTIMATES
        .iter()
        .find(|(fragment, ..)| resource_type.contains(fragment))
        .map(|(_, c, m, d)| (*c, *m, *d))
        .unwrap_or(("other", 25.0, "Generic resource cost estimate"));

    CategoryEstimate {
        resource_type: resource_type.to_string(),
        resource_name: resource_name.to_string(),
        category: category.to_string(),
        monthly_cost,
        description: description.to_string(),
        region: region.to_string(),
    }
}

/// Category breakdown over resources being created or updated.
pub fn analyze_costs(plan: &TerraformPlan, region: &str, include_estimate: bool) -> CostAnalysis {
    let mut analysis = CostAnalysis {
        region: region.to_string(),
        total_estimated_monthly_cost: 0.0,
        resource_costs: Vec::new(),
        cost_breakdown: COST_CATEGORIES.iter().map(|c| (c.to_string(), 0.0)).collect(),
    };
    if !include_estimate {
        return analysis;
    }

    for change in plan
        .resource_changes
        .iter()
        .filter(|c| c.has_action("create") || c.has_action("update"))
    {
        let estimate = categorize(
            change.resource_type.as_deref().unwrap_or_default(),
            change.name.as_deref().unwrap_or_default(),
            region,
        );
        analysis.total_estimated_monthly_cost += estimate.monthly_cost;
        *analysis
            .cost_breakdown
            .entry(estimate.category.clone())
            .or_default() += estimate.monthly_cost;
        analysis.resource_costs.push(estimate);
    }

    analysis
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OptimizationRecommendation {
    pub resource_type: String,
    pub resource_name: String,
    pub current_cost: f64,
    pub recommendation: String,
    pub potential_savings: f64,
    pub priority: String,
}

pub fn optimization_recommendations(costs: &[CategoryEstimate]) -> Vec<OptimizationRecommendation> {
    let mut out = Vec::new();

    for cost in costs {
        let c = cost.monthly_cost;
        let rule = if cost.resource_type.contains("aws_instance") && c > 100.0 {
            Some((
                "Consider using Spot Instances for non-critical workloads",
                0.6,
                if c > 200.0 { "high" } else { "medium" },
            ))
        } else if cost.resource_type.contains("aws_db_instance") && c > 150.0 {
            Some(("Review instance size and consider Reserved Instances", 0.3, "high"))
        } else if cost.resource_type.contains("aws_s3_bucket") && c > 50.0 {
            Some((
                "Implement lifecycle policies to move data to cheaper storage tiers",
                0.4,
                "medium",
            ))
        } else if cost.category == "network" && c > 100.0 {
            Some((
                "Review network configuration and consider data transfer optimization",
                0.2,
                "medium",
            ))
        } else {
            None
        };

        if let Some((recommendation, rate, priority)) = rule {
            out.push(OptimizationRecommendation {
                resource_type: cost.resource_type.clone(),
                resource_name: cost.resource_name.clone(),
                current_cost: c,
                recommendation: recommendation.to_string(),
                potential_savings: c * rate,
                priority: priority.to_string(),
            });
        }
    }

    out
}

pub fn potential_savings(recommendations: &[OptimizationRecommendation]) -> f64 {
    recommendations.iter().map(|r| r.potential_savings).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeDetail;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn change(resource_type: &str, action: &str) -> ResourceChange {
        ResourceChange {
            address: Some(format!("{}.main", resource_type)),
            resource_type: Some(resource_type.to_string()),
            name: Some("main".to_string()),
            change: ChangeDetail {
                actions: vec![action.to_string()],
                ..Default::default()
            },
        }
    }

    struct FixedSource {
        price: Option<f64>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PriceSource for FixedSource {
        async fn monthly_price(&self, _change: &ResourceChange, _region: &str) -> Result<Option<f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.price)
        }
    }

    struct FailingSource;

    #[async_trait]
    impl PriceSource for FailingSource {
        async fn monthly_price(&self, _change: &ResourceChange, _region: &str) -> Result<Option<f64>> {
            anyhow::bail!("pricing API unreachable")
        }
    }

    #[derive(Default)]
    struct RecordingSource {
        regions: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PriceSource for RecordingSource {
        async fn monthly_price(&self, _change: &ResourceChange, region: &str) -> Result<Option<f64>> {
            self.regions.lock().unwrap().push(region.to_string());
            Ok(None)
        }
    }

    fn with_after(resource_type: &str, after: serde_json::Value) -> ResourceChange {
        let mut c = change(resource_type, "create");
        c.change.after = Some(after);
        c
    }

    #[tokio::test]
    async fn test_live_lookup_without_region_hint_uses_us_west_2() {
        let source = Arc::new(RecordingSource::default());
        let estimator = CostEstimator::with_source(&PricingConfig::default(), source.clone());

        estimator
            .estimate(&with_after("aws_instance", serde_json::json!({"instance_type": "t3.micro"})))
            .await;
        estimator
            .estimate(&with_after("aws_db_instance", serde_json::json!({"availability_zone": "eu-west-1b"})))
            .await;
        estimator.estimate(&change("aws_s3_bucket", "create")).await;

        assert_eq!(
            *source.regions.lock().unwrap(),
            vec!["us-west-2", "eu-west-1", "us-west-2"]
        );
    }

    #[tokio::test]
    async fn test_configured_region_only_replaces_the_fallback() {
        let config = PricingConfig {
            region: Some("ap-south-1".to_string()),
            ..PricingConfig::default()
        };
        let estimator = CostEstimator::new(&config);

        assert_eq!(estimator.region_for(&change("aws_instance", "create")), "ap-south-1");
        assert_eq!(
            estimator.region_for(&with_after("aws_instance", serde_json::json!({"region": "eu-north-1"}))),
            "eu-north-1"
        );
    }

    #[tokio::test]
    async fn test_unmapped_type_gets_default() {
        let estimator = CostEstimator::new(&PricingConfig::default());
        let cost = estimator.estimate(&change("aws_sqs_queue", "create")).await;
        assert_eq!(cost, 0.5);
    }

    #[tokio::test]
    async fn test_static_table_hit() {
        let estimator = CostEstimator::new(&PricingConfig::default());
        assert_eq!(estimator.estimate(&change("aws_instance", "create")).await, 25.0);
        assert_eq!(estimator.estimate(&change("aws_vpc", "create")).await, 0.0);
    }

    #[tokio::test]
    async fn test_live_price_is_cached_per_type() {
        let source = Arc::new(FixedSource {
            price: Some(7.3),
            calls: AtomicUsize::new(0),
        });
        let estimator = CostEstimator::with_source(&PricingConfig::default(), source.clone());

        assert_eq!(estimator.estimate(&change("aws_instance", "create")).await, 7.3);
        assert_eq!(estimator.estimate(&change("aws_instance", "update")).await, 7.3);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(estimator.cached("aws_instance"), Some(7.3));
        assert_eq!(estimator.cache_len(), 1);
    }

    #[tokio::test]
    async fn test_live_miss_and_failure_fall_back_to_static() {
        let none = CostEstimator::with_source(
            &PricingConfig::default(),
            Arc::new(FixedSource {
                price: None,
                calls: AtomicUsize::new(0),
            }),
        );
        assert_eq!(none.estimate(&change("aws_kms_key", "create")).await, 1.0);
        assert_eq!(none.cache_len(), 0);

        let failing = CostEstimator::with_source(&PricingConfig::default(), Arc::new(FailingSource));
        assert_eq!(failing.estimate(&change("aws_widget", "create")).await, 0.5);
    }

    #[tokio::test]
    async fn test_summary_totals_creates_only() {
        let plan = TerraformPlan {
            resource_changes: vec![
                change("aws_instance", "create"),
                change("aws_db_instance", "create"),
                change("aws_instance", "delete"),
                change("aws_s3_bucket", "update"),
                change("aws_vpc", "no-op"),
            ],
        };
        let summary = summarize_costs(&plan, &CostEstimator::new(&PricingConfig::default())).await;
        assert_eq!(summary.total_monthly_cost, 45.0);
        assert_eq!(summary.groups["create"].count, 2);
        assert_eq!(summary.groups["delete"].count, 1);
        assert_eq!(summary.groups["update"].count, 1);
        assert_eq!(summary.groups["other"].count, 1);
    }

    #[test]
    fn test_action_group_precedence() {
        let mut c = change("aws_instance", "delete");
        c.change.actions.push("create".to_string());
        assert_eq!(action_group(&c), "create");
    }

    #[test]
    fn test_detect_region() {
        let values = |v: serde_json::Value| v.as_object().cloned().unwrap();
        assert_eq!(detect_region(&values(serde_json::json!({"region": "eu-west-1"}))), "eu-west-1");
        assert_eq!(
            detect_region(&values(serde_json::json!({"availability_zone": "us-east-2b"}))),
            "us-east-2"
        );
        assert_eq!(detect_region(&values(serde_json::json!({}))), "us-west-2");
    }

    #[test]
    fn test_region_to_location() {
        assert_eq!(region_to_location("us-east-1"), "US East (N. Virginia)");
        assert_eq!(region_to_location("mars-north-1"), "US West (Oregon)");
    }

    #[test]
    fn test_format_cost() {
        assert_eq!(format_cost(0.0), "$0.00");
        assert_eq!(format_cost(0.5), "$0.50");
        assert_eq!(format_cost(1234.567), "$1,234.57");
    }

    #[test]
    fn test_analyze_costs_counts_create_and_update() {
        let plan = TerraformPlan {
            resource_changes: vec![
                change("aws_instance", "create"),
                change("aws_db_instance", "update"),
                change("aws_s3_bucket", "delete"),
                change("aws_sqs_queue", "create"),
            ],
        };
        let analysis = analyze_costs(&plan, "us-east-1", true);
        assert_eq!(analysis.resource_costs.len(), 3);
        assert_eq!(analysis.total_estimated_monthly_cost, 275.0);
        assert_eq!(analysis.cost_breakdown["compute"], 50.0);
        assert_eq!(analysis.cost_breakdown["database"], 200.0);
        assert_eq!(analysis.cost_breakdown["other"], 25.0);
        assert_eq!(analysis.cost_breakdown["storage"], 0.0);
    }

    #[test]
    fn test_analyze_without_estimate_is_empty() {
        let plan = TerraformPlan {
            resource_changes: vec![change("aws_instance", "create")],
        };
        let analysis = analyze_costs(&plan, "us-east-1", false);
        assert!(analysis.resource_costs.is_empty());
        assert_eq!(analysis.total_estimated_monthly_cost, 0.0);
    }

    #[test]
    fn test_optimization_rules() {
        let mut big_vm = categorize("aws_instance", "web", "us-east-1");
        big_vm.monthly_cost = 250.0;
        let db = categorize("aws_db_instance", "db", "us-east-1");
        let small = categorize("aws_s3_bucket", "logs", "us-east-1");

        let recs = optimization_recommendations(&[big_vm, db, small]);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].priority, "high");
        assert_eq!(recs[0].potential_savings, 150.0);
        assert_eq!(recs[1].potential_savings, 60.0);
        assert_eq!(potential_savings(&recs), 210.0);
    }
}
