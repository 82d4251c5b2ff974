//! The compliance inspection pipeline.
//!
//! ```text
//! plan.json ─┐
//! refdir/   ─┼─▶ chunk ─▶ embed ─▶ index ─▶ retrieve ─▶ prompt ─▶ LLM
//! prompts/  ─┘                                                   │
//!                 <output>.raw.txt ◀── raw text ◀────────────────┤
//!                 <output>         ◀── validate ◀── parse JSON ◀─┘
//! ```
//!
//! A malformed model answer is not an error: the raw text is kept and an
//! empty report is written. Errors are reserved for unreadable inputs, a
//! missing prompt template, and failed embedding or model calls.

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::Config;
use crate::index::{build_index, retrieve};
use crate::llm::LanguageModel;
use crate::plan::load_terraform_docs;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::prompt::{build_prompt, load_prompt_context_docs, load_prompt_template, DEFAULT_QUESTION};
use crate::references::load_reference_docs;
use crate::validate::{parse_llm_output, write_outputs, ComplianceReport, DroppedRecord};

/// Inputs for one inspection run.
#[derive(Debug, Clone, Default)]
pub struct InspectRequest {
    pub plan: PathBuf,
    pub output: PathBuf,
    /// Overrides `references.dir`.
    pub refdir: Option<PathBuf>,
    /// Overrides `<prompts.dir>/<prompts.file>`.
    pub prompt_file: Option<PathBuf>,
    pub question: Option<String>,
}

impl InspectRequest {
    pub fn new(plan: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            plan: plan.into(),
            output: output.into(),
            ..Default::default()
        }
    }
}

/// What an inspection produced.
#[derive(Debug, Clone, Serialize)]
pub struct InspectionOutcome {
    pub output_path: PathBuf,
    pub raw_output_path: PathBuf,
    pub model: String,
    pub total_violations: usize,
    pub severity_breakdown: BTreeMap<String, usize>,
    pub recommendations: usize,
    pub dropped: Vec<DroppedRecord>,
    /// Set when the model's answer was not JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    /// Source labels of the retrieved chunks, when `llm.return_sources` is on.
    pub sources: Vec<String>,
    #[serde(skip)]
    pub report: ComplianceReport,
}

/// Run the full pipeline and write `<output>` and its raw companion.
pub async fn run_inspection(
    config: &Config,
    request: &InspectRequest,
    llm: &dyn LanguageModel,
    progress: &dyn ProgressReporter,
) -> Result<InspectionOutcome> {
    let template = load_prompt_template(&config.prompts, request.prompt_file.as_deref())?;

    let mut docs = load_terraform_docs(&request.plan)?;
    progress.report(ProgressEvent::Loaded {
        source: request.plan.display().to_string(),
        documents: docs.len(),
    });

    if let Some(dir) = request.refdir.as_ref().or(config.references.dir.as_ref()) {
        let refs = load_reference_docs(dir, &config.references).await?;
        progress.report(ProgressEvent::Loaded {
            source: dir.display().to_string(),
            documents: refs.len(),
        });
        docs.extend(refs);
    }

    let prompt_docs = load_prompt_context_docs(&config.prompts)?;
    if !prompt_docs.is_empty() {
        progress.report(ProgressEvent::Loaded {
            source: config.prompts.dir.display().to_string(),
            documents: prompt_docs.len(),
        });
        docs.extend(prompt_docs);
    }

    let index = build_index(config, &docs).await?;
    progress.report(ProgressEvent::Indexed {
        chunks: index.len(),
    });

    let question = request
        .question
        .as_deref()
        .filter(|q| !q.trim().is_empty())
        .unwrap_or(DEFAULT_QUESTION);
    let hits = retrieve(config, &index, question).await?;
    progress.report(ProgressEvent::Retrieved { hits: hits.len() });

    let prompt = build_prompt(&template, &hits, question);
    progress.report(ProgressEvent::Prompting {
        model: llm.model_name().to_string(),
        prompt_chars: prompt.chars().count(),
    });
    let raw = llm.complete(&prompt).await?;

    let parsed = parse_llm_output(&raw);
    progress.report(ProgressEvent::Validated {
        kept: parsed.report.violations.len(),
        dropped: parsed.dropped.len(),
    });
    if !parsed.dropped.is_empty() {
        warn!(dropped = parsed.dropped.len(), "some violation records failed validation");
    }

    let raw_output_path = write_outputs(&request.output, &raw, &parsed.report)?;
    progress.report(ProgressEvent::Written {
        output: request.output.display().to_string(),
    });

    let sources = if config.llm.return_sources {
        unique_sources(hits.iter().map(|h| h.metadata.source.as_str()))
    } else {
        Vec::new()
    };

    info!(
        plan = %request.plan.display(),
        output = %request.output.display(),
        violations = parsed.report.violations.len(),
        "inspection complete"
    );

    Ok(InspectionOutcome {
        output_path: request.output.clone(),
        raw_output_path,
        model: llm.model_name().to_string(),
        total_violations: parsed.report.violations.len(),
        severity_breakdown: parsed.report.severity_breakdown(),
        recommendations: parsed.report.recommendations.len(),
        dropped: parsed.dropped,
        parse_error: parsed.parse_error,
        sources,
        report: parsed.report,
    })
}

fn unique_sources<'a>(labels: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for label in labels {
        if !out.iter().any(|s| s == label) {
            out.push(label.to_string());
        }
    }
    out
}

/// Render a short, human-readable summary for the CLI.
pub fn summarize(outcome: &InspectionOutcome) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Violations: {} (High {}, Medium {}, Low {})\n",
        outcome.total_violations,
        outcome.severity_breakdown.get("High").copied().unwrap_or(0),
        outcome.severity_breakdown.get("Medium").copied().unwrap_or(0),
        outcome.severity_breakdown.get("Low").copied().unwrap_or(0),
    ));
    out.push_str(&format!("Recommendations: {}\n", outcome.recommendations));
    if !outcome.dropped.is_empty() {
        out.push_str(&format!("Dropped records: {}\n", outcome.dropped.len()));
    }
    if let Some(err) = &outcome.parse_error {
        out.push_str(&format!("Model answer was not JSON ({}); wrote empty report\n", err));
    }
    if !outcome.sources.is_empty() {
        out.push_str(&format!("Sources: {}\n", outcome.sources.join(", ")));
    }
    out.push_str(&format!("Output: {}\n", outcome.output_path.display()));
    out.push_str(&format!("Raw output: {}\n", outcome.raw_output_path.display()));
    out
}
