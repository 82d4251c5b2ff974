//! Prompt templates and final prompt assembly.
//!
//! The instruction template lives at `<prompts.dir>/<prompts.file>`. Other
//! `.txt` files in the same directory may be indexed as context so the
//! model can retrieve shared guidance next to plan resources.
//!
//! The assembled prompt has a fixed layout:
//!
//! ```text
//! <instructions>
//!
//! Context:
//! [1] (source: AWS_S3_BUCKET.LOGS)
//! { ...retrieved chunk... }
//!
//! Question: <question>
//!
//! <output format suffix>
//! ```

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::config::PromptsConfig;
use crate::models::{Document, DocumentMetadata, RetrievedChunk};

/// Question used when the caller does not supply one.
pub const DEFAULT_QUESTION: &str =
    "Identify every compliance violation in the Terraform resources above.";

/// Appended to every prompt so the answer can be parsed and validated.
pub const OUTPUT_FORMAT_SUFFIX: &str = r#"Respond with a single JSON object and nothing else. Use exactly this shape:
{
  "violations": [
    {
      "resource_type": "<Terraform resource type>",
      "resource_name": "<resource address or name>",
      "compliance_concern": "<what is wrong>",
      "standards": ["<one or more of: HIPAA, PCI-DSS, FedRAMP, CMMC, GDPR, GLBA, ISO 27001, NIST, SOC 2, SOX, CIS, CIS AWS, CIS Azure, CIS GCP>"],
      "severity": "<Low | Medium | High>",
      "remediation": "<how to fix it>"
    }
  ],
  "recommendations": ["<3 to 5 short, general recommendations>"]
}
If there are no violations, return an empty "violations" list."#;

/// Resolve the template path: an explicit file wins, else `dir/file`.
pub fn template_path(config: &PromptsConfig, override_file: Option<&Path>) -> PathBuf {
    match override_file {
        Some(path) => path.to_path_buf(),
        None => config.dir.join(&config.file),
    }
}

/// Read the instruction template. A missing file is an error.
pub fn load_prompt_template(config: &PromptsConfig, override_file: Option<&Path>) -> Result<String> {
    let path = template_path(config, override_file);
    if !path.is_file() {
        bail!("Prompt template not found: {}", path.display());
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read prompt template: {}", path.display()))?;
    Ok(text.trim().to_string())
}

/// Load the other `.txt` prompt files as context documents.
///
/// The active template is skipped. A missing prompts directory yields no
/// documents.
pub fn load_prompt_context_docs(config: &PromptsConfig) -> Result<Vec<Document>> {
    if !config.include_as_context || !config.dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut paths = std::fs::read_dir(&config.dir)
        .with_context(|| format!("Failed to read prompts dir: {}", config.dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension().and_then(|e| e.to_str()) == Some("txt")
                && p.file_name().and_then(|n| n.to_str()) != Some(config.file.as_str())
        })
        .collect::<Vec<_>>();
    paths.sort();

    let mut docs = Vec::new();
    for path in paths {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;
        if text.trim().is_empty() {
            continue;
        }
        docs.push(Document::new(
            text,
            DocumentMetadata {
                source: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                standard: "PROMPT".to_string(),
                ..Default::default()
            },
        ));
    }
    Ok(docs)
}

/// Assemble instructions, retrieved context, the question, and the format suffix.
pub fn build_prompt(instructions: &str, context: &[RetrievedChunk], question: &str) -> String {
    let mut prompt = String::with_capacity(
        instructions.len() + context.iter().map(|c| c.text.len() + 48).sum::<usize>() + 1024,
    );

    prompt.push_str(instructions.trim());
    prompt.push_str("\n\nContext:\n");
    if context.is_empty() {
        prompt.push_str("(no context retrieved)\n");
    }
    for (i, chunk) in context.iter().enumerate() {
        prompt.push_str(&format!(
            "[{}] (source: {})\n{}\n\n",
            i + 1,
            chunk.metadata.source,
            chunk.text.trim()
        ));
    }

    prompt.push_str("Question: ");
    prompt.push_str(question.trim());
    prompt.push_str("\n\n");
    prompt.push_str(OUTPUT_FORMAT_SUFFIX);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &Path) -> PromptsConfig {
        PromptsConfig {
            dir: dir.to_path_buf(),
            file: "main.txt".to_string(),
            include_as_context: true,
        }
    }

    #[test]
    fn test_template_is_trimmed() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("main.txt"), "\n  Review the plan.  \n").unwrap();
        let text = load_prompt_template(&config_in(tmp.path()), None).unwrap();
        assert_eq!(text, "Review the plan.");
    }

    #[test]
    fn test_missing_template_is_error() {
        let tmp = TempDir::new().unwrap();
        let err = load_prompt_template(&config_in(tmp.path()), None).unwrap_err();
        assert!(err.to_string().contains("Prompt template not found"));
    }

    #[test]
    fn test_override_file_wins() {
        let tmp = TempDir::new().unwrap();
        let other = tmp.path().join("custom.txt");
        std::fs::write(&other, "Custom").unwrap();
        let text = load_prompt_template(&config_in(tmp.path()), Some(&other)).unwrap();
        assert_eq!(text, "Custom");
    }

    #[test]
    fn test_context_docs_skip_active_template() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("main.txt"), "template").unwrap();
        std::fs::write(tmp.path().join("hipaa.txt"), "HIPAA guidance").unwrap();
        std::fs::write(tmp.path().join("readme.md"), "ignored").unwrap();
        let docs = load_prompt_context_docs(&config_in(tmp.path())).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].metadata.source, "hipaa.txt");
        assert_eq!(docs[0].metadata.standard, "PROMPT");
    }

    #[test]
    fn test_build_prompt_layout() {
        let chunk = RetrievedChunk {
            text: "{\"type\": \"aws_s3_bucket\"}".to_string(),
            score: 0.9,
            metadata: DocumentMetadata {
                source: "AWS_S3_BUCKET.LOGS".to_string(),
                ..Default::default()
            },
        };
        let prompt = build_prompt("Check HIPAA.", &[chunk], "Any issues?");
        assert!(prompt.starts_with("Check HIPAA.\n\nContext:\n[1] (source: AWS_S3_BUCKET.LOGS)"));
        assert!(prompt.contains("Question: Any issues?"));
        assert!(prompt.ends_with(OUTPUT_FORMAT_SUFFIX));
    }
}
