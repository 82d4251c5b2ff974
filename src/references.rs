//! Reference document loader.
//!
//! Walks a reference directory (policy PDFs, control catalogs, notes) and
//! turns each matching file into a [`Document`]:
//!
//! ```text
//! refdir/
//! ├── cmmc/level1.pdf      → source "level1.pdf", standard "CMMC"
//! ├── hipaa/security.docx  → source "security.docx", standard "HIPAA"
//! └── notes.md             → source "notes.md", standard "REFDIR"
//! ```
//!
//! Files are selected with `globset` include/exclude patterns relative to
//! the directory. Extraction runs on the blocking pool. A file that cannot
//! be read is logged and skipped; it never fails the load.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::ReferencesConfig;
use crate::extract::extract_file;
use crate::models::{Document, DocumentMetadata};

/// Load every reference file under `dir` that passes the configured globs.
pub async fn load_reference_docs(dir: &Path, config: &ReferencesConfig) -> Result<Vec<Document>> {
    if !dir.is_dir() {
        bail!("Reference directory not found: {}", dir.display());
    }

    let files = discover_files(dir, config)?;
    debug!(dir = %dir.display(), files = files.len(), "discovered reference files");

    let root = dir.to_path_buf();
    tokio::task::spawn_blocking(move || read_files(&root, files))
        .await
        .context("Reference extraction task failed")
}

/// List matching files in sorted order.
pub fn discover_files(dir: &Path, config: &ReferencesConfig) -> Result<Vec<PathBuf>> {
    let include = build_globset(&config.include_globs)?;
    let exclude = build_globset(&config.exclude_globs)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        if include.is_match(rel) && !exclude.is_match(rel) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

fn read_files(root: &Path, files: Vec<PathBuf>) -> Vec<Document> {
    let mut docs = Vec::with_capacity(files.len());
    for path in files {
        let text = match extract_file(&path) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping reference file");
                continue;
            }
        };
        if text.trim().is_empty() {
            debug!(path = %path.display(), "reference file has no text");
            continue;
        }
        docs.push(Document::new(text, metadata_for(root, &path)));
    }
    docs
}

fn metadata_for(root: &Path, path: &Path) -> DocumentMetadata {
    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = path.parent().unwrap_or(root);
    let standard = parent
        .file_name()
        .map(|n| n.to_string_lossy().to_uppercase())
        .unwrap_or_else(|| "REFERENCE".to_string());

    DocumentMetadata {
        source,
        standard,
        ..Default::default()
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
