//! Parsing and validation of model answers.
//!
//! A model answer goes through three steps:
//!
//! ```text
//! raw text ──strip fences──▶ JSON text ──serde_json──▶ Value ──validate each record──▶ ComplianceReport
//! ```
//!
//! Nothing here fails the run. Records that do not validate are dropped with
//! a [`ViolationError`] explaining why. Text that is not JSON at all yields an
//! empty report plus the parse error. [`write_outputs`] always writes both
//! the validated JSON and the raw answer.
//!
//! Accepted input shapes:
//!
//! | Shape | Violations read from |
//! |-------|----------------------|
//! | `{"violations": [...], "recommendations": [...]}` | `violations` |
//! | `{"compliance_violations": [...]}` | `compliance_violations` |
//! | `[...]` | the array itself |
//!
//! A record may name its standards as `standards` (list) or `standard`
//! (string or list). Severity and standard names are matched
//! case-insensitively.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, warn};

// ═══════════════════════════════════════════════════════════════════════
// Fence stripping
// ═══════════════════════════════════════════════════════════════════════

fn fenced_block() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").ok())
        .as_ref()
}

/// Remove markdown code fences around a model answer.
///
/// The first fenced block wins when the answer has prose around it. A lone
/// opening or closing fence is removed too. Repeats until nothing changes,
/// so applying it twice gives the same result as applying it once.
pub fn strip_markdown_fences(raw: &str) -> String {
    let mut current = raw.trim().to_string();
    loop {
        let next = strip_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_once(text: &str) -> String {
    let text = text.trim();

    if let Some(caps) = fenced_block().and_then(|re| re.captures(text)) {
        if let Some(inner) = caps.get(1) {
            return inner.as_str().trim().to_string();
        }
    }

    let mut out = text;
    if let Some(rest) = out.strip_prefix("```") {
        out = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    }
    if let Some(rest) = out.strip_suffix("```") {
        out = rest;
    }
    out.trim().to_string()
}

// ═══════════════════════════════════════════════════════════════════════
// Schema types
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Low, Severity::Medium, Severity::High];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compliance frameworks a violation may cite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Standard {
    #[serde(rename = "HIPAA")]
    Hipaa,
    #[serde(rename = "PCI-DSS")]
    PciDss,
    #[serde(rename = "FedRAMP")]
    FedRamp,
    #[serde(rename = "CMMC")]
    Cmmc,
    #[serde(rename = "GDPR")]
    Gdpr,
    #[serde(rename = "GLBA")]
    Glba,
    #[serde(rename = "ISO 27001")]
    Iso27001,
    #[serde(rename = "NIST")]
    Nist,
    #[serde(rename = "SOC 2")]
    Soc2,
    #[serde(rename = "SOX")]
    Sox,
    #[serde(rename = "CIS")]
    Cis,
    #[serde(rename = "CIS AWS")]
    CisAws,
    #[serde(rename = "CIS Azure")]
    CisAzure,
    #[serde(rename = "CIS GCP")]
    CisGcp,
}

impl Standard {
    pub const ALL: [Standard; 14] = [
        Standard::Hipaa,
        Standard::PciDss,
        Standard::FedRamp,
        Standard::Cmmc,
        Standard::Gdpr,
        Standard::Glba,
        Standard::Iso27001,
        Standard::Nist,
        Standard::Soc2,
        Standard::Sox,
        Standard::Cis,
        Standard::CisAws,
        Standard::CisAzure,
        Standard::CisGcp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Standard::Hipaa => "HIPAA",
            Standard::PciDss => "PCI-DSS",
            Standard::FedRamp => "FedRAMP",
            Standard::Cmmc => "CMMC",
            Standard::Gdpr => "GDPR",
            Standard::Glba => "GLBA",
            Standard::Iso27001 => "ISO 27001",
            Standard::Nist => "NIST",
            Standard::Soc2 => "SOC 2",
            Standard::Sox => "SOX",
            Standard::Cis => "CIS",
            Standard::CisAws => "CIS AWS",
            Standard::CisAzure => "CIS Azure",
            Standard::CisGcp => "CIS GCP",
        }
    }

    /// Match ignoring case, spaces, dashes, and underscores
    /// (`"pci dss"`, `"SOC2"`, `"cis_aws"` all resolve).
    pub fn parse(value: &str) -> Option<Self> {
        let key = squash(value);
        Self::ALL.into_iter().find(|s| squash(s.as_str()) == key)
    }
}

impl fmt::Display for Standard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn squash(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceViolation {
    pub resource_type: String,
    pub resource_name: String,
    pub compliance_concern: String,
    pub standards: Vec<Standard>,
    pub severity: Severity,
    pub remediation: String,
}

/// The validated document written to `<output>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceReport {
    #[serde(default)]
    pub violations: Vec<ComplianceViolation>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl ComplianceReport {
    /// Count per severity. All three levels are always present.
    pub fn severity_breakdown(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> = Severity::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for v in &self.violations {
            *counts.entry(v.severity.as_str().to_string()).or_default() += 1;
        }
        counts
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.violations
            .iter()
            .filter(|v| v.severity == severity)
            .count()
    }

    /// Violations grouped by cited standard, in standard order.
    pub fn by_standard(&self) -> BTreeMap<Standard, Vec<&ComplianceViolation>> {
        let mut groups: BTreeMap<Standard, Vec<&ComplianceViolation>> = BTreeMap::new();
        for v in &self.violations {
            for s in &v.standards {
                groups.entry(*s).or_default().push(v);
            }
        }
        groups
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════════════════════════════════

/// Why a record was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViolationError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("missing or empty field: {0}")]
    MissingField(&'static str),
    #[error("invalid severity: {0}")]
    InvalidSeverity(String),
    #[error("unknown standard: {0}")]
    UnknownStandard(String),
    #[error("no standards listed")]
    NoStandards,
}

/// A record that failed validation, by position in the model's list.
#[derive(Debug, Clone, Serialize)]
pub struct DroppedRecord {
    pub index: usize,
    pub reason: String,
}

/// Result of parsing one model answer.
#[derive(Debug, Clone, Default)]
pub struct ParsedAnswer {
    pub report: ComplianceReport,
    pub dropped: Vec<DroppedRecord>,
    /// Set when the answer was not JSON at all.
    pub parse_error: Option<String>,
}

/// Validate a single violation record.
pub fn validate_violation(value: &Value) -> Result<ComplianceViolation, ViolationError> {
    let obj = value.as_object().ok_or(ViolationError::NotAnObject)?;

    let text = |key: &'static str| -> Result<String, ViolationError> {
        obj.get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or(ViolationError::MissingField(key))
    };

    let resource_name = text("resource_name")?;
    let resource_type = text("resource_type")?;
    let compliance_concern = text("compliance_concern")?;
    let remediation = text("remediation")?;

    let severity_raw = text("severity")?;
    let severity =
        Severity::parse(&severity_raw).ok_or(ViolationError::InvalidSeverity(severity_raw))?;

    let standards = parse_standards(obj.get("standards").or_else(|| obj.get("standard")))?;

    Ok(ComplianceViolation {
        resource_type,
        resource_name,
        compliance_concern,
        standards,
        severity,
        remediation,
    })
}

fn parse_standards(value: Option<&Value>) -> Result<Vec<Standard>, ViolationError> {
    let names: Vec<String> = match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|i| match i {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(_) | None => return Err(ViolationError::MissingField("standards")),
    };

    let mut standards = Vec::with_capacity(names.len());
    for name in names {
        let standard = Standard::parse(&name).ok_or(ViolationError::UnknownStandard(name))?;
        if !standards.contains(&standard) {
            standards.push(standard);
        }
    }

    if standards.is_empty() {
        return Err(ViolationError::NoStandards);
    }
    Ok(standards)
}

/// Strip fences, decode, and validate a raw model answer.
pub fn parse_llm_output(raw: &str) -> ParsedAnswer {
    let cleaned = strip_markdown_fences(raw);
    match serde_json::from_str::<Value>(&cleaned) {
        Ok(value) => validate_value(&value),
        Err(e) => {
            warn!(error = %e, "model answer is not valid JSON; writing empty report");
            ParsedAnswer {
                parse_error: Some(e.to_string()),
                ..Default::default()
            }
        }
    }
}

/// Validate an already-decoded document.
pub fn validate_value(value: &Value) -> ParsedAnswer {
    let empty = Vec::new();
    let (records, recommendations) = match value {
        Value::Array(items) => (items, None),
        Value::Object(obj) => (
            obj.get("violations")
                .or_else(|| obj.get("compliance_violations"))
                .and_then(|v| v.as_array())
                .unwrap_or(&empty),
            obj.get("recommendations").and_then(|r| r.as_array()),
        ),
        _ => (&empty, None),
    };

    let mut parsed = ParsedAnswer::default();
    for (index, record) in records.iter().enumerate() {
        match validate_violation(record) {
            Ok(v) => parsed.report.violations.push(v),
            Err(e) => {
                debug!(index, reason = %e, "dropping violation record");
                parsed.dropped.push(DroppedRecord {
                    index,
                    reason: e.to_string(),
                });
            }
        }
    }

    parsed.report.recommendations = recommendations
        .map(|items| {
            items
                .iter()
                .filter_map(|r| r.as_str())
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    parsed
}

/// Read an analysis file written earlier (or by hand) and re-validate it.
pub fn load_report(path: &Path) -> Result<ComplianceReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read analysis file: {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Analysis file is not valid JSON: {}", path.display()))?;
    Ok(validate_value(&value).report)
}

// ═══════════════════════════════════════════════════════════════════════
// Output files
// ═══════════════════════════════════════════════════════════════════════

/// Where the raw answer goes: the output's extension becomes `raw.txt`
/// (`findings.json` → `findings.raw.txt`).
pub fn raw_output_path(output: &Path) -> PathBuf {
    if output.extension().is_some() {
        output.with_extension("raw.txt")
    } else {
        let mut name = output.as_os_str().to_owned();
        name.push(".raw.txt");
        PathBuf::from(name)
    }
}

/// Write the validated report to `output` and the raw answer next to it.
///
/// Returns the raw file's path.
pub fn write_outputs(output: &Path, raw: &str, report: &ComplianceReport) -> Result<PathBuf> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output dir: {}", parent.display()))?;
    }

    let raw_path = raw_output_path(output);
    std::fs::write(&raw_path, raw)
        .with_context(|| format!("Failed to write raw output: {}", raw_path.display()))?;

    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(output, json)
        .with_context(|| format!("Failed to write output: {}", output.display()))?;

    Ok(raw_path)
}
