//! HTML, Markdown, and JSON renderers for plans and analysis results.
//!
//! Every renderer takes already-validated data and returns a string; the
//! callers decide where it is written. All interpolated text goes through
//! [`html_escape`] in HTML output.
//!
//! # Analysis files
//!
//! [`load_analysis`] accepts any of the files the tools write and
//! normalises them into [`AnalysisData`]:
//!
//! | File contents | Kind |
//! |---------------|------|
//! | `violations` / `compliance_violations` | compliance |
//! | `security_findings` | security |
//! | `resource_costs` (top level or under `analysis`) | cost |

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use crate::cost::{
    action_group, format_cost, optimization_recommendations, CostAnalysis, CostSummary,
    ACTION_GROUPS,
};
use crate::models::TerraformPlan;
use crate::security::SecurityFinding;
use crate::validate::{validate_value, ComplianceReport, Severity};

/// Escape text for inclusion in HTML element content or attribute values.
pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentType {
    ExecutiveSummary,
    TechnicalReport,
    ComplianceReport,
}

impl DocumentType {
    pub const ALL: [&'static str; 3] = ["executive_summary", "technical_report", "compliance_report"];

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "executive_summary" => Ok(DocumentType::ExecutiveSummary),
            "technical_report" => Ok(DocumentType::TechnicalReport),
            "compliance_report" => Ok(DocumentType::ComplianceReport),
            other => bail!("Unsupported document type: {}", other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::ExecutiveSummary => "executive_summary",
            DocumentType::TechnicalReport => "technical_report",
            DocumentType::ComplianceReport => "compliance_report",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            DocumentType::ExecutiveSummary => "Executive Summary",
            DocumentType::TechnicalReport => "Technical Report",
            DocumentType::ComplianceReport => "Compliance Report",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Html,
    Markdown,
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "html" => Ok(OutputFormat::Html),
            "markdown" => Ok(OutputFormat::Markdown),
            "json" => Ok(OutputFormat::Json),
            other => bail!("Unsupported output format: {}", other),
        }
    }

    /// Also the file extension.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Html => "html",
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Normalised analysis data
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    Compliance,
    Security,
    Cost,
}

impl AnalysisKind {
    fn subject(&self) -> &'static str {
        match self {
            AnalysisKind::Compliance => "Infrastructure Compliance Analysis",
            AnalysisKind::Security => "Infrastructure Security Audit",
            AnalysisKind::Cost => "Infrastructure Cost Analysis",
        }
    }
}

/// One line item of a rendered document.
#[derive(Debug, Clone, Serialize)]
pub struct ReportItem {
    pub heading: String,
    /// `High` / `Medium` / `Low`, when the source has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    pub resource: String,
    pub description: String,
    pub remediation: String,
    pub standards: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Metric {
    pub label: String,
    pub value: String,
}

fn metric(label: &str, value: impl ToString) -> Metric {
    Metric {
        label: label.to_string(),
        value: value.to_string(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisData {
    pub kind: AnalysisKind,
    pub metrics: Vec<Metric>,
    pub items: Vec<ReportItem>,
    pub recommendations: Vec<String>,
}

/// Generic next steps used when an analysis carries no recommendations.
pub const DEFAULT_RECOMMENDATIONS: [&str; 4] = [
    "Review all high-severity violations immediately",
    "Address medium-severity issues within the next sprint",
    "Consider low-severity violations for future improvements",
    "Implement automated compliance checks in your CI/CD pipeline",
];

impl AnalysisData {
    pub fn from_compliance(report: &ComplianceReport) -> Self {
        let items = report
            .violations
            .iter()
            .map(|v| ReportItem {
                heading: v.compliance_concern.clone(),
                severity: Some(v.severity.as_str().to_string()),
                resource: format!("{}.{}", v.resource_type, v.resource_name),
                description: v.compliance_concern.clone(),
                remediation: v.remediation.clone(),
                standards: v.standards.iter().map(|s| s.as_str().to_string()).collect(),
            })
            .collect();
        Self {
            kind: AnalysisKind::Compliance,
            metrics: vec![metric("Total Violations", report.violations.len())],
            items,
            recommendations: report.recommendations.clone(),
        }
    }

    pub fn from_security(findings: &[SecurityFinding]) -> Self {
        let items = findings
            .iter()
            .map(|f| ReportItem {
                heading: f.finding_type.replace('_', " "),
                severity: Severity::parse(&f.severity).map(|s| s.as_str().to_string()),
                resource: f.resource.clone(),
                description: f.description.clone(),
                remediation: remediation_steps(&f.finding_type).to_string(),
                standards: Vec::new(),
            })
            .collect();
        Self {
            kind: AnalysisKind::Security,
            metrics: vec![metric("Total Findings", findings.len())],
            items,
            recommendations: Vec::new(),
        }
    }

    pub fn from_cost(analysis: &CostAnalysis) -> Self {
        let mut metrics = vec![
            metric("Region", &analysis.region),
            metric(
                "Estimated Monthly Cost",
                format_cost(analysis.total_estimated_monthly_cost),
            ),
        ];
        for (category, amount) in &analysis.cost_breakdown {
            metrics.push(metric(category, format_cost(*amount)));
        }
        let items = analysis
            .resource_costs
            .iter()
            .map(|c| ReportItem {
                heading: format!("{} ({})", c.resource_type, c.category),
                severity: None,
                resource: format!("{}.{}", c.resource_type, c.resource_name),
                description: format!("{}: {}", c.description, format_cost(c.monthly_cost)),
                remediation: String::new(),
                standards: Vec::new(),
            })
            .collect();
        let recommendations = optimization_recommendations(&analysis.resource_costs)
            .into_iter()
            .map(|r| {
                format!(
                    "{} {}: {} (saves {}/month)",
                    r.resource_type,
                    r.resource_name,
                    r.recommendation,
                    format_cost(r.potential_savings)
                )
            })
            .collect();
        Self {
            kind: AnalysisKind::Cost,
            metrics,
            items,
            recommendations,
        }
    }

    /// Counts for `High`, `Medium`, `Low`, in that order.
    pub fn severity_counts(&self) -> [(Severity, usize); 3] {
        let count = |s: Severity| {
            self.items
                .iter()
                .filter(|i| i.severity.as_deref() == Some(s.as_str()))
                .count()
        };
        [
            (Severity::High, count(Severity::High)),
            (Severity::Medium, count(Severity::Medium)),
            (Severity::Low, count(Severity::Low)),
        ]
    }

    fn recommendations_or_default(&self) -> Vec<String> {
        if !self.recommendations.is_empty() {
            return self.recommendations.clone();
        }
        match self.kind {
            AnalysisKind::Cost => vec!["No cost optimizations identified".to_string()],
            _ => DEFAULT_RECOMMENDATIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

fn remediation_steps(finding_type: &str) -> &'static str {
    let t = finding_type.to_ascii_lowercase();
    if t.contains("ingress") || t.contains("security_group") {
        "Review security group rules; remove unnecessary open ports; allow only known CIDR ranges."
    } else if t.contains("encryption") {
        "Enable encryption at rest; configure encryption in transit; manage keys with KMS."
    } else if t.contains("logging") {
        "Enable CloudTrail and access logging; ship logs to CloudWatch; set retention policies."
    } else if t.contains("secret") {
        "Move the value to Secrets Manager or SSM Parameter Store and reference it instead."
    } else {
        "Review the resource configuration; apply the provider's security baseline; test changes outside production."
    }
}

/// Load any analysis file written by the tools.
pub fn load_analysis(path: &Path) -> Result<AnalysisData> {
    if !path.exists() {
        bail!("Analysis file not found: {}", path.display());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read analysis file: {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Analysis file is not valid JSON: {}", path.display()))?;
    analysis_from_value(&value)
}

pub fn analysis_from_value(value: &Value) -> Result<AnalysisData> {
    if let Some(findings) = value.get("security_findings") {
        let findings: Vec<SecurityFinding> =
            serde_json::from_value(findings.clone()).context("Invalid security_findings")?;
        return Ok(AnalysisData::from_security(&findings));
    }

    let cost = value
        .get("analysis")
        .filter(|a| a.get("resource_costs").is_some())
        .or_else(|| value.get("resource_costs").map(|_| value));
    if let Some(cost) = cost {
        let analysis: CostAnalysis =
            serde_json::from_value(cost.clone()).context("Invalid cost analysis")?;
        return Ok(AnalysisData::from_cost(&analysis));
    }

    Ok(AnalysisData::from_compliance(&validate_value(value).report))
}

// ═══════════════════════════════════════════════════════════════════════
// Documents
// ═══════════════════════════════════════════════════════════════════════

const STYLE: &str = "body{font-family:'Segoe UI',Arial,sans-serif;margin:0;padding:20px;background:#f5f5f5}\
.container{max-width:1200px;margin:0 auto;background:#fff;padding:30px;border-radius:8px}\
.header{border-bottom:3px solid #007acc;padding-bottom:16px;margin-bottom:24px}\
.metric{display:inline-block;margin:10px 20px;text-align:center}\
.metric-value{font-size:2em;font-weight:bold;color:#007acc}\
.metric-label{color:#666;font-size:.9em}\
.item{margin:10px 0;padding:10px;border-left:4px solid #999;background:#fafafa}\
.high{border-left-color:#dc3545}.medium{border-left-color:#ff8800}.low{border-left-color:#28a745}\
.framework{margin:20px 0;padding:16px;border:1px solid #ddd;border-radius:5px}\
.non-compliant{color:#fff;background:#e74c3c;padding:3px 8px;border-radius:3px}\
table{width:100%;border-collapse:collapse}th,td{padding:8px;text-align:left;border-bottom:1px solid #ccc}\
.action-create{background:#d4edda;color:#155724;padding:2px 6px;border-radius:4px}\
.action-update{background:#fff3cd;color:#856404;padding:2px 6px;border-radius:4px}\
.action-delete{background:#f8d7da;color:#721c24;padding:2px 6px;border-radius:4px}\
.action-other{background:#e2e3e5;color:#383d41;padding:2px 6px;border-radius:4px}";

fn html_open(title: &str, subtitle: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{t}</title>\n<style>{style}</style>\n</head>\n<body>\n<div class=\"container\">\n<div class=\"header\">\n<h1>{t}</h1>\n<h2>{s}</h2>\n<p>Generated: {ts}</p>\n</div>\n",
        t = html_escape(title),
        s = html_escape(subtitle),
        style = STYLE,
        ts = Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

const HTML_CLOSE: &str = "</div>\n</body>\n</html>\n";

fn severity_class(item: &ReportItem) -> String {
    item.severity
        .as_deref()
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default()
}

fn item_html(out: &mut String, heading: &str, item: &ReportItem, with_remediation: bool) {
    let _ = write!(
        out,
        "<div class=\"item {}\">\n<h4>{}</h4>\n",
        severity_class(item),
        html_escape(heading)
    );
    if let Some(sev) = &item.severity {
        let _ = writeln!(out, "<p><strong>Severity:</strong> {}</p>", html_escape(sev));
    }
    let _ = writeln!(
        out,
        "<p><strong>Resource:</strong> {}</p>\n<p><strong>Description:</strong> {}</p>",
        html_escape(&item.resource),
        html_escape(&item.description)
    );
    if !item.standards.is_empty() {
        let _ = writeln!(
            out,
            "<p><strong>Standards:</strong> {}</p>",
            html_escape(&item.standards.join(", "))
        );
    }
    if with_remediation && !item.remediation.is_empty() {
        let _ = writeln!(
            out,
            "<p><strong>Remediation:</strong> {}</p>",
            html_escape(&item.remediation)
        );
    }
    out.push_str("</div>\n");
}

fn list_html(out: &mut String, heading: &str, lines: &[String]) {
    let _ = writeln!(out, "<h3>{}</h3>\n<ul>", html_escape(heading));
    for line in lines {
        let _ = writeln!(out, "<li>{}</li>", html_escape(line));
    }
    out.push_str("</ul>\n");
}

fn metrics_html(out: &mut String, data: &AnalysisData) {
    out.push_str("<div class=\"summary\">\n");
    for m in &data.metrics {
        let _ = writeln!(
            out,
            "<div class=\"metric\"><div class=\"metric-value\">{}</div><div class=\"metric-label\">{}</div></div>",
            html_escape(&m.value),
            html_escape(&m.label)
        );
    }
    if data.kind != AnalysisKind::Cost {
        for (sev, n) in data.severity_counts() {
            let _ = writeln!(
                out,
                "<div class=\"metric\"><div class=\"metric-value {}\">{}</div><div class=\"metric-label\">{} Severity</div></div>",
                sev.as_str().to_ascii_lowercase(),
                n,
                sev
            );
        }
    }
    out.push_str("</div>\n");
}

/// Framework name → items citing it. Items without standards go under `Other`.
fn group_by_framework(data: &AnalysisData) -> BTreeMap<String, Vec<&ReportItem>> {
    let mut groups: BTreeMap<String, Vec<&ReportItem>> = BTreeMap::new();
    for item in &data.items {
        if item.standards.is_empty() {
            groups.entry("Other".to_string()).or_default().push(item);
        }
        for s in &item.standards {
            groups.entry(s.clone()).or_default().push(item);
        }
    }
    groups
}

pub fn executive_summary_html(data: &AnalysisData) -> String {
    let mut out = html_open("Executive Summary", data.kind.subject());
    out.push_str("<h3>Key Findings</h3>\n");
    metrics_html(&mut out, data);

    let mut recs = Vec::new();
    if data.kind != AnalysisKind::Cost {
        let [(_, high), (_, medium), _] = data.severity_counts();
        recs.push(format!(
            "Immediate action: address {} high-severity issues within 48 hours",
            high
        ));
        recs.push(format!(
            "Short term: resolve {} medium-severity issues within 30 days",
            medium
        ));
    }
    recs.extend(data.recommendations_or_default());
    list_html(&mut out, "Recommendations", &recs);
    out.push_str(HTML_CLOSE);
    out
}

pub fn technical_report_html(data: &AnalysisData) -> String {
    let mut out = html_open("Technical Report", data.kind.subject());
    out.push_str("<h3>Overview</h3>\n");
    metrics_html(&mut out, data);
    out.push_str("<h3>Details</h3>\n");
    for (i, item) in data.items.iter().enumerate() {
        item_html(&mut out, &format!("#{}: {}", i + 1, item.heading), item, true);
    }
    if data.items.is_empty() {
        out.push_str("<p>No issues found.</p>\n");
    }
    list_html(&mut out, "Recommendations", &data.recommendations_or_default());
    out.push_str(HTML_CLOSE);
    out
}

/// Items grouped by compliance framework.
pub fn framework_document_html(data: &AnalysisData) -> String {
    let mut out = html_open("Compliance Report", data.kind.subject());
    let groups = group_by_framework(data);
    if groups.is_empty() {
        out.push_str("<p>No violations found.</p>\n");
    }
    for (framework, items) in &groups {
        let _ = writeln!(
            out,
            "<div class=\"framework\">\n<h3>{} <span class=\"non-compliant\">Non-Compliant</span></h3>\n<p>Violations found: {}</p>",
            html_escape(framework),
            items.len()
        );
        for item in items {
            item_html(&mut out, &item.heading, item, true);
        }
        out.push_str("</div>\n");
    }
    out.push_str(HTML_CLOSE);
    out
}

pub fn document_markdown(data: &AnalysisData, doc: DocumentType) -> String {
    let mut out = format!("# {}\n\n_{}_\n\n", doc.title(), data.kind.subject());
    let _ = writeln!(out, "Generated: {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));

    out.push_str("## Summary\n\n");
    for m in &data.metrics {
        let _ = writeln!(out, "- **{}**: {}", m.label, m.value);
    }
    if data.kind != AnalysisKind::Cost {
        for (sev, n) in data.severity_counts() {
            let _ = writeln!(out, "- **{} Severity**: {}", sev, n);
        }
    }
    out.push('\n');

    let item_md = |out: &mut String, item: &ReportItem| {
        let _ = writeln!(out, "### {}\n", item.heading);
        if let Some(sev) = &item.severity {
            let _ = writeln!(out, "- Severity: {}", sev);
        }
        let _ = writeln!(out, "- Resource: `{}`", item.resource);
        let _ = writeln!(out, "- Description: {}", item.description);
        if !item.standards.is_empty() {
            let _ = writeln!(out, "- Standards: {}", item.standards.join(", "));
        }
        if !item.remediation.is_empty() {
            let _ = writeln!(out, "- Remediation: {}", item.remediation);
        }
        out.push('\n');
    };

    match doc {
        DocumentType::ExecutiveSummary => {}
        DocumentType::TechnicalReport => {
            out.push_str("## Details\n\n");
            for item in &data.items {
                item_md(&mut out, item);
            }
        }
        DocumentType::ComplianceReport => {
            for (framework, items) in group_by_framework(data) {
                let _ = writeln!(out, "## {} ({} violations)\n", framework, items.len());
                for item in items {
                    item_md(&mut out, item);
                }
            }
        }
    }

    out.push_str("## Recommendations\n\n");
    for rec in data.recommendations_or_default() {
        let _ = writeln!(out, "- {}", rec);
    }
    out
}

pub fn document_json(data: &AnalysisData, doc: DocumentType) -> Value {
    let breakdown: BTreeMap<String, usize> = data
        .severity_counts()
        .iter()
        .map(|(s, n)| (s.as_str().to_string(), *n))
        .collect();
    json!({
        "document_type": doc.as_str(),
        "analysis_kind": data.kind,
        "generated_at": Utc::now().to_rfc3339(),
        "metrics": data.metrics,
        "severity_breakdown": breakdown,
        "items": data.items,
        "recommendations": data.recommendations_or_default(),
    })
}

/// Render one document in one format.
pub fn render_document(data: &AnalysisData, doc: DocumentType, format: OutputFormat) -> Result<String> {
    Ok(match (format, doc) {
        (OutputFormat::Json, _) => serde_json::to_string_pretty(&document_json(data, doc))?,
        (OutputFormat::Markdown, _) => document_markdown(data, doc),
        (OutputFormat::Html, DocumentType::ExecutiveSummary) => executive_summary_html(data),
        (OutputFormat::Html, DocumentType::TechnicalReport) => technical_report_html(data),
        (OutputFormat::Html, DocumentType::ComplianceReport) => framework_document_html(data),
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Compliance reporter
// ═══════════════════════════════════════════════════════════════════════

/// The `compliance_reporter` HTML page.
pub fn compliance_report_html(report: &ComplianceReport, include_recommendations: bool) -> String {
    let data = AnalysisData::from_compliance(report);
    let mut out = html_open("Compliance Analysis Report", AnalysisKind::Compliance.subject());
    metrics_html(&mut out, &data);

    if !data.items.is_empty() {
        out.push_str("<h3>Compliance Violations</h3>\n");
        for item in &data.items {
            item_html(&mut out, &item.heading, item, include_recommendations);
        }
    }
    if include_recommendations {
        list_html(&mut out, "Recommendations", &data.recommendations_or_default());
    }
    out.push_str(HTML_CLOSE);
    out
}

/// The `compliance_reporter` JSON document.
pub fn compliance_report_json(report: &ComplianceReport, include_recommendations: bool) -> Value {
    let mut doc = json!({
        "report_type": "compliance_analysis",
        "generated_at": Utc::now().to_rfc3339(),
        "summary": {
            "total_violations": report.violations.len(),
            "severity_breakdown": report.severity_breakdown(),
        },
        "violations": report.violations,
    });
    if include_recommendations {
        doc["recommendations"] = json!(AnalysisData::from_compliance(report).recommendations_or_default());
    }
    doc
}

// ═══════════════════════════════════════════════════════════════════════
// Plan summary
// ═══════════════════════════════════════════════════════════════════════

/// Coarse grouping of resources by name, for the plan summary page.
pub fn infer_module(name: &str) -> &'static str {
    let name = name.to_ascii_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| name.contains(w));
    if has(&["vpc", "subnet", "route"]) {
        "Networking"
    } else if has(&["s3", "bucket"]) {
        "S3"
    } else if has(&["iam", "role"]) {
        "IAM"
    } else if has(&["log", "cloudwatch"]) {
        "Logging"
    } else if has(&["kms"]) {
        "Encryption"
    } else if has(&["db", "rds"]) {
        "Database"
    } else if has(&["acl", "policy"]) {
        "Access Control"
    } else if has(&["cloudfront", "cdn"]) {
        "CDN"
    } else {
        "General"
    }
}

/// Plan summary page: resources by action with per-resource cost, and an
/// optional compliance section.
pub fn plan_summary_html(
    plan: &TerraformPlan,
    costs: &CostSummary,
    compliance: Option<&ComplianceReport>,
) -> String {
    let mut out = html_open("Terraform Plan Summary", "Resource changes");
    let _ = writeln!(
        out,
        "<div class=\"meta\">\n<p>Total resources affected: <strong>{}</strong></p>\n<p>Estimated monthly AWS cost: <strong>{}</strong></p>\n</div>",
        plan.resource_changes.len(),
        format_cost(costs.total_monthly_cost)
    );

    for action in ACTION_GROUPS {
        let changes: Vec<_> = plan
            .resource_changes
            .iter()
            .filter(|c| action_group(c) == action)
            .collect();
        if changes.is_empty() {
            continue;
        }
        // Group resources are in plan order, like `changes`.
        let group_costs = costs.groups.get(action).map(|g| g.resources.as_slice()).unwrap_or(&[]);

        let _ = writeln!(
            out,
            "<h3>{} ({})</h3>\n<table class=\"plan\">\n<thead><tr><th>Module</th><th>Type</th><th>Name</th><th>Action</th><th>Cost</th></tr></thead>\n<tbody>",
            action.to_ascii_uppercase(),
            changes.len()
        );
        for (i, change) in changes.iter().enumerate() {
            let name = change.name.as_deref().unwrap_or_else(|| change.display_name());
            let cost = group_costs.get(i).map(|r| r.monthly_cost).unwrap_or(0.0);
            let _ = writeln!(
                out,
                "<tr class=\"resource-row\"><td>{}</td><td>{}</td><td>{}</td><td><span class=\"action-{}\">{}</span></td><td>{}</td></tr>",
                infer_module(name),
                html_escape(change.type_or_unknown()),
                html_escape(name),
                action,
                action.to_ascii_uppercase(),
                format_cost(cost)
            );
        }
        out.push_str("</tbody>\n</table>\n");
    }

    if let Some(report) = compliance {
        out.push_str("<h2>Compliance Findings</h2>\n");
        let breakdown = report.severity_breakdown();
        for sev in Severity::ALL {
            let n = breakdown.get(sev.as_str()).copied().unwrap_or(0);
            let _ = writeln!(
                out,
                "<p>{} Severity: {} issue{}</p>",
                sev,
                n,
                if n == 1 { "" } else { "s" }
            );
        }
        out.push_str("<table>\n<thead><tr><th>Resource</th><th>Concern</th><th>Standards</th><th>Severity</th><th>Remediation</th></tr></thead>\n<tbody>\n");
        for v in &report.violations {
            let standards: Vec<&str> = v.standards.iter().map(|s| s.as_str()).collect();
            let _ = writeln!(
                out,
                "<tr><td>{}.{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                html_escape(&v.resource_type),
                html_escape(&v.resource_name),
                html_escape(&v.compliance_concern),
                html_escape(&standards.join(", ")),
                v.severity,
                html_escape(&v.remediation)
            );
        }
        out.push_str("</tbody>\n</table>\n");
        if !report.recommendations.is_empty() {
            list_html(&mut out, "Recommendations", &report.recommendations);
        }
    }

    out.push_str(HTML_CLOSE);
    out
}
