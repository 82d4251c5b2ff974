//! Rule-based security scan of a Terraform plan.
//!
//! Runs without a model. Each rule inspects the planned (`after`) values of
//! one resource change; deleted resources have no `after` and are skipped.
//!
//! | Finding type | Level | Trigger |
//! |--------------|-------|---------|
//! | `hardcoded_secret` | any (secrets scan on) | string attribute named like a password, secret, token, or key |
//! | `missing_encryption` | any | RDS/EBS/EFS without encryption, S3 without a server-side encryption block |
//! | `public_access` | any | public S3 ACL, publicly accessible RDS, disabled public access block |
//! | `open_ingress` | any | ingress from `0.0.0.0/0` or `::/0` |
//! | `missing_logging` | comprehensive | S3 bucket without access logging, CloudTrail with logging off |
//! | `missing_versioning` | comprehensive | S3 bucket without versioning enabled |
//! | `imdsv2_not_enforced` | comprehensive | EC2 instance not requiring IMDSv2 tokens |

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::models::{ResourceChange, TerraformPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Basic,
    Comprehensive,
}

impl AuditLevel {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "basic" => Ok(AuditLevel::Basic),
            "comprehensive" => Ok(AuditLevel::Comprehensive),
            other => bail!("Unknown audit level: {}", other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLevel::Basic => "basic",
            AuditLevel::Comprehensive => "comprehensive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityFinding {
    #[serde(rename = "type")]
    pub finding_type: String,
    /// `high`, `medium`, or `low`.
    pub severity: String,
    pub resource: String,
    pub description: String,
}

impl SecurityFinding {
    fn new(finding_type: &str, severity: &str, resource: &str, description: String) -> Self {
        Self {
            finding_type: finding_type.to_string(),
            severity: severity.to_string(),
            resource: resource.to_string(),
            description,
        }
    }
}

/// What `security_auditor` writes to its output file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAudit {
    pub security_findings: Vec<SecurityFinding>,
    pub total_findings: usize,
    pub audit_level: AuditLevel,
}

impl SecurityAudit {
    pub fn high_risk_count(&self) -> usize {
        self.security_findings
            .iter()
            .filter(|f| f.severity == "high")
            .count()
    }
}

const SECRET_MARKERS: [&str; 6] = [
    "password",
    "secret",
    "token",
    "private_key",
    "access_key",
    "api_key",
];

/// Attribute names that look secret but only ever hold references.
const SECRET_SUFFIX_ALLOW: [&str; 4] = ["_arn", "_id", "_name", "_version"];

/// Settings whose names contain a marker but hold no secret.
const NOT_SECRETS: [&str; 3] = ["http_tokens", "token_validity_units", "password_policy"];

pub fn audit_plan(plan: &TerraformPlan, level: AuditLevel, secrets_scan: bool) -> SecurityAudit {
    let mut findings = Vec::new();

    for change in &plan.resource_changes {
        let Some(values) = change.after_values() else {
            continue;
        };
        let resource = change.display_name();

        if secrets_scan {
            scan_secrets(values, resource, "", &mut findings);
        }
        check_encryption(change, values, &mut findings);
        check_public_access(change, values, &mut findings);
        check_ingress(change, values, &mut findings);

        if level == AuditLevel::Comprehensive {
            check_logging_and_versioning(change, values, &mut findings);
            check_imdsv2(change, values, &mut findings);
        }
    }

    SecurityAudit {
        total_findings: findings.len(),
        security_findings: findings,
        audit_level: level,
    }
}

/// Load a plan, audit it, and write the audit JSON to `output`.
pub fn audit_plan_file(
    plan_path: &Path,
    output: &Path,
    level: AuditLevel,
    secrets_scan: bool,
) -> Result<SecurityAudit> {
    let plan = crate::plan::load_plan(plan_path)?;
    let audit = audit_plan(&plan, level, secrets_scan);

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output dir: {}", parent.display()))?;
    }
    std::fs::write(output, serde_json::to_string_pretty(&audit)?)
        .with_context(|| format!("Failed to write security audit: {}", output.display()))?;

    Ok(audit)
}

// ============ Rules ============

fn is_secret_name(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    if NOT_SECRETS.contains(&key.as_str()) {
        return false;
    }
    SECRET_MARKERS.iter().any(|m| key.contains(m))
        && !SECRET_SUFFIX_ALLOW.iter().any(|s| key.ends_with(s))
}

fn scan_secrets(values: &Map<String, Value>, resource: &str, prefix: &str, out: &mut Vec<SecurityFinding>) {
    for (key, value) in values {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::String(s) if !s.is_empty() && is_secret_name(key) => {
                out.push(SecurityFinding::new(
                    "hardcoded_secret",
                    "high",
                    resource,
                    format!("Attribute '{}' contains a hardcoded secret value", path),
                ));
            }
            Value::Object(inner) => scan_secrets(inner, resource, &path, out),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if let Value::Object(inner) = item {
                        scan_secrets(inner, resource, &format!("{}[{}]", path, i), out);
                    }
                }
            }
            _ => {}
        }
    }
}

fn is_true(values: &Map<String, Value>, key: &str) -> bool {
    values.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn non_empty(values: &Map<String, Value>, key: &str) -> bool {
    match values.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn check_encryption(change: &ResourceChange, values: &Map<String, Value>, out: &mut Vec<SecurityFinding>) {
    let resource = change.display_name();
    let (flag, severity, what) = match change.type_or_unknown() {
        "aws_db_instance" | "aws_rds_cluster" => ("storage_encrypted", "high", "Database storage"),
        "aws_ebs_volume" => ("encrypted", "medium", "EBS volume"),
        "aws_efs_file_system" => ("encrypted", "medium", "EFS file system"),
        "aws_s3_bucket" => {
            if !non_empty(values, "server_side_encryption_configuration") {
                out.push(SecurityFinding::new(
                    "missing_encryption",
                    "medium",
                    resource,
                    "S3 bucket has no server-side encryption configuration".to_string(),
                ));
            }
            return;
        }
        _ => return,
    };
    if !is_true(values, flag) {
        out.push(SecurityFinding::new(
            "missing_encryption",
            severity,
            resource,
            format!("{} is not encrypted at rest ({} is not true)", what, flag),
        ));
    }
}

fn check_public_access(change: &ResourceChange, values: &Map<String, Value>, out: &mut Vec<SecurityFinding>) {
    let resource = change.display_name();
    match change.type_or_unknown() {
        "aws_s3_bucket" | "aws_s3_bucket_acl" => {
            if let Some(acl) = values.get("acl").and_then(|v| v.as_str()) {
                if acl.starts_with("public-") {
                    out.push(SecurityFinding::new(
                        "public_access",
                        "high",
                        resource,
                        format!("S3 ACL '{}' grants public access", acl),
                    ));
                }
            }
        }
        "aws_db_instance" => {
            if is_true(values, "publicly_accessible") {
                out.push(SecurityFinding::new(
                    "public_access",
                    "high",
                    resource,
                    "Database instance is publicly accessible".to_string(),
                ));
            }
        }
        "aws_s3_bucket_public_access_block" => {
            let disabled: Vec<&str> = [
                "block_public_acls",
                "block_public_policy",
                "ignore_public_acls",
                "restrict_public_buckets",
            ]
            .into_iter()
            .filter(|k| values.get(*k).and_then(|v| v.as_bool()) == Some(false))
            .collect();
            if !disabled.is_empty() {
                out.push(SecurityFinding::new(
                    "public_access",
                    "medium",
                    resource,
                    format!("Public access block disables: {}", disabled.join(", ")),
                ));
            }
        }
        _ => {}
    }
}

fn open_to_world(rule: &Map<String, Value>) -> bool {
    ["cidr_blocks", "ipv6_cidr_blocks"].iter().any(|key| {
        rule.get(*key)
            .and_then(|v| v.as_array())
            .map(|cidrs| {
                cidrs
                    .iter()
                    .filter_map(|c| c.as_str())
                    .any(|c| c == "0.0.0.0/0" || c == "::/0")
            })
            .unwrap_or(false)
    })
}

fn port_range(rule: &Map<String, Value>) -> (i64, i64) {
    let from = rule.get("from_port").and_then(|v| v.as_i64()).unwrap_or(0);
    let to = rule.get("to_port").and_then(|v| v.as_i64()).unwrap_or(from);
    (from, to)
}

fn ingress_finding(resource: &str, rule: &Map<String, Value>) -> SecurityFinding {
    let (from, to) = port_range(rule);
    let admin_port = [22, 3389].iter().any(|p| (from..=to).contains(p));
    let all_ports = from == 0 && (to == 0 || to == 65535);
    let severity = if admin_port || all_ports { "high" } else { "medium" };
    let ports = if from == to {
        from.to_string()
    } else {
        format!("{}-{}", from, to)
    };
    SecurityFinding::new(
        "open_ingress",
        severity,
        resource,
        format!("Ingress on port {} is open to the internet", ports),
    )
}

fn check_ingress(change: &ResourceChange, values: &Map<String, Value>, out: &mut Vec<SecurityFinding>) {
    let resource = change.display_name();
    match change.type_or_unknown() {
        "aws_security_group" => {
            let rules = values.get("ingress").and_then(|v| v.as_array());
            for rule in rules.into_iter().flatten().filter_map(|r| r.as_object()) {
                if open_to_world(rule) {
                    out.push(ingress_finding(resource, rule));
                }
            }
        }
        "aws_security_group_rule" => {
            let is_ingress = values.get("type").and_then(|v| v.as_str()) == Some("ingress");
            if is_ingress && open_to_world(values) {
                out.push(ingress_finding(resource, values));
            }
        }
        "aws_vpc_security_group_ingress_rule" => {
            let cidr = values.get("cidr_ipv4").or_else(|| values.get("cidr_ipv6"));
            if matches!(cidr.and_then(|v| v.as_str()), Some("0.0.0.0/0") | Some("::/0")) {
                out.push(ingress_finding(resource, values));
            }
        }
        _ => {}
    }
}

fn check_logging_and_versioning(
    change: &ResourceChange,
    values: &Map<String, Value>,
    out: &mut Vec<SecurityFinding>,
) {
    let resource = change.display_name();
    match change.type_or_unknown() {
        "aws_s3_bucket" => {
            if !non_empty(values, "logging") {
                out.push(SecurityFinding::new(
                    "missing_logging",
                    "low",
                    resource,
                    "S3 bucket has no access logging".to_string(),
                ));
            }
            let versioned = values
                .get("versioning")
                .and_then(|v| v.as_array())
                .map(|blocks| {
                    blocks
                        .iter()
                        .any(|b| b.get("enabled").and_then(|e| e.as_bool()) == Some(true))
                })
                .unwrap_or(false);
            if !versioned {
                out.push(SecurityFinding::new(
                    "missing_versioning",
                    "low",
                    resource,
                    "S3 bucket versioning is not enabled".to_string(),
                ));
            }
        }
        "aws_cloudtrail" => {
            if values.get("enable_logging").and_then(|v| v.as_bool()) == Some(false) {
                out.push(SecurityFinding::new(
                    "missing_logging",
                    "high",
                    resource,
                    "CloudTrail logging is disabled".to_string(),
                ));
            }
        }
        _ => {}
    }
}

fn check_imdsv2(change: &ResourceChange, values: &Map<String, Value>, out: &mut Vec<SecurityFinding>) {
    if !matches!(change.type_or_unknown(), "aws_instance" | "aws_launch_template") {
        return;
    }
    let tokens = values
        .get("metadata_options")
        .and_then(|v| v.as_array())
        .and_then(|blocks| blocks.first())
        .and_then(|b| b.get("http_tokens"))
        .and_then(|t| t.as_str());
    if tokens != Some("required") {
        out.push(SecurityFinding::new(
            "imdsv2_not_enforced",
            "medium",
            change.display_name(),
            "Instance metadata service does not require IMDSv2 session tokens".to_string(),
        ));
    }
}
