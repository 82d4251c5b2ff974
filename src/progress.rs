//! Pipeline progress reporting.
//!
//! `coldrag inspect` reports each stage of the compliance pipeline so users
//! can see where a slow run is spending its time (embedding and the model
//! call dominate). Progress is emitted on **stderr** so stdout remains
//! parseable for scripts.

use std::io::Write;

/// A single progress event from the compliance pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// Documents loaded from one source (`plan`, `references`, `prompts`).
    Loaded { source: String, documents: usize },
    /// Documents chunked, embedded, and indexed.
    Indexed { chunks: usize },
    /// Context retrieved from the index.
    Retrieved { hits: usize },
    /// Prompt sent to the model.
    Prompting { model: String, prompt_chars: usize },
    /// Answer parsed and validated.
    Validated { kept: usize, dropped: usize },
    /// Output files written.
    Written { output: String },
}

/// Reports pipeline progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "inspect  indexed  1,234 chunks".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Loaded { source, documents } => {
                format!("inspect  loaded  {} documents from {}\n", format_number(*documents as u64), source)
            }
            ProgressEvent::Indexed { chunks } => {
                format!("inspect  indexed  {} chunks\n", format_number(*chunks as u64))
            }
            ProgressEvent::Retrieved { hits } => {
                format!("inspect  retrieved  {} context chunks\n", hits)
            }
            ProgressEvent::Prompting {
                model,
                prompt_chars,
            } => format!(
                "inspect  prompting {}  ({} chars)...\n",
                model,
                format_number(*prompt_chars as u64)
            ),
            ProgressEvent::Validated { kept, dropped } => {
                format!("inspect  validated  {} kept, {} dropped\n", kept, dropped)
            }
            ProgressEvent::Written { output } => format!("inspect  wrote  {}\n", output),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

fn event_json(event: &ProgressEvent) -> serde_json::Value {
    match event {
        ProgressEvent::Loaded { source, documents } => serde_json::json!({
            "event": "progress", "phase": "loaded", "source": source, "documents": documents
        }),
        ProgressEvent::Indexed { chunks } => serde_json::json!({
            "event": "progress", "phase": "indexed", "chunks": chunks
        }),
        ProgressEvent::Retrieved { hits } => serde_json::json!({
            "event": "progress", "phase": "retrieved", "hits": hits
        }),
        ProgressEvent::Prompting {
            model,
            prompt_chars,
        } => serde_json::json!({
            "event": "progress", "phase": "prompting", "model": model, "prompt_chars": prompt_chars
        }),
        ProgressEvent::Validated { kept, dropped } => serde_json::json!({
            "event": "progress", "phase": "validated", "kept": kept, "dropped": dropped
        }),
        ProgressEvent::Written { output } => serde_json::json!({
            "event": "progress", "phase": "written", "output": output
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
