//! Core data models shared by the loaders, the retrieval index, and the
//! compliance pipeline.
//!
//! ```text
//! plan.json ──▶ Document ──▶ Chunk ──▶ (embedding) ──▶ RetrievedChunk
//!   refdir/ ──▶ Document ─┘
//! ```

use serde::{Deserialize, Serialize};

/// Metadata carried by every [`Document`] and copied onto its chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Where the text came from: a file name, or an upper-cased resource name.
    pub source: String,
    /// Terraform resource type (`aws_s3_bucket`), or `None` for reference text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    /// Terraform resource address or name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    /// Standard label, e.g. `CMMC` for a file under `refdir/cmmc/`.
    pub standard: String,
}

/// A unit of retrievable text. Immutable once a loader has produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(page_content: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            page_content: page_content.into(),
            metadata,
        }
    }
}

/// A slice of a document's text, sized for embedding.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    /// Index of the parent document in the loaded corpus.
    pub document_index: usize,
    pub chunk_index: usize,
    pub text: String,
    /// SHA-256 of `text`, used to skip duplicate chunks.
    pub hash: String,
    pub metadata: DocumentMetadata,
}

/// A chunk returned from the vector index with its similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub score: f32,
    pub metadata: DocumentMetadata,
}

/// A single entry of `resource_changes` in `terraform show -json` output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceChange {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub change: ChangeDetail,
}

/// The `change` block of a resource change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeDetail {
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub before: Option<serde_json::Value>,
    #[serde(default)]
    pub after: Option<serde_json::Value>,
}

impl ResourceChange {
    pub fn type_or_unknown(&self) -> &str {
        self.resource_type.as_deref().unwrap_or("unknown")
    }

    /// Address first (it is unique within a plan), then the bare name.
    pub fn display_name(&self) -> &str {
        self.address
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.name.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or("unknown")
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.change.actions.iter().any(|a| a == action)
    }

    /// The planned attribute values, if Terraform knows them.
    pub fn after_values(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.change.after.as_ref().and_then(|v| v.as_object())
    }
}

/// Just enough of a Terraform plan to drive cost and security checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerraformPlan {
    #[serde(default)]
    pub resource_changes: Vec<ResourceChange>,
}
