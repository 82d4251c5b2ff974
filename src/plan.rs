//! Terraform plan loading.
//!
//! Two JSON shapes are understood:
//!
//! ```text
//! plan   (terraform show -json plan.out)   { "resource_changes": [ {type, name, address, change}, ... ] }
//! state  (terraform show -json)            { "values": { "root_module": { "resources": [...],
//!                                                                           "child_modules": [...] } } }
//! ```
//!
//! [`load_terraform_docs`] turns every resource into one [`Document`] for
//! retrieval. [`load_plan`] returns the typed [`TerraformPlan`] used by the
//! cost, security, and report code.
//!
//! A directory path is also accepted: every `.tf`, `.json`, and `.txt` file
//! directly inside it becomes one raw document.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::models::{ChangeDetail, Document, DocumentMetadata, ResourceChange, TerraformPlan};

const RAW_EXTENSIONS: [&str; 3] = ["tf", "json", "txt"];

/// Load a plan (or state, or directory) as retrievable documents.
pub fn load_terraform_docs(path: &Path) -> Result<Vec<Document>> {
    if path.is_dir() {
        return load_directory(path);
    }

    let changes = read_changes(path)?;
    let docs = changes
        .iter()
        .map(|(change, raw)| change_to_document(change, raw))
        .collect::<Vec<_>>();

    debug!(path = %path.display(), documents = docs.len(), "loaded terraform documents");
    Ok(docs)
}

/// Load the typed plan used by cost estimation, security scanning, and reports.
pub fn load_plan(path: &Path) -> Result<TerraformPlan> {
    let resource_changes = read_changes(path)?
        .into_iter()
        .map(|(change, _)| change)
        .collect();
    Ok(TerraformPlan { resource_changes })
}

/// Parse plan JSON that is already in memory.
pub fn parse_plan_json(content: &str) -> Result<TerraformPlan> {
    let resource_changes = parse_changes(content)?
        .into_iter()
        .map(|(change, _)| change)
        .collect();
    Ok(TerraformPlan { resource_changes })
}

fn read_changes(path: &Path) -> Result<Vec<(ResourceChange, Value)>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read Terraform file: {}", path.display()))?;
    parse_changes(&content).with_context(|| format!("Invalid Terraform JSON: {}", path.display()))
}

fn parse_changes(content: &str) -> Result<Vec<(ResourceChange, Value)>> {
    if content.trim().is_empty() {
        bail!("Terraform JSON is empty");
    }

    let root: Value = serde_json::from_str(content).context("Failed to parse JSON")?;

    if let Some(changes) = root.get("resource_changes").and_then(|v| v.as_array()) {
        return changes
            .iter()
            .map(|raw| {
                let change: ResourceChange = serde_json::from_value(raw.clone())
                    .context("Malformed entry in resource_changes")?;
                Ok((change, raw.clone()))
            })
            .collect();
    }

    if let Some(root_module) = root.get("values").and_then(|v| v.get("root_module")) {
        let mut out = Vec::new();
        collect_state_resources(root_module, &mut out);
        return Ok(out);
    }

    bail!("Unrecognized Terraform JSON: expected resource_changes or values.root_module")
}

/// State resources carry their attributes in `values`; they map onto a
/// change with no actions and `after` set to those values.
fn collect_state_resources(module: &Value, out: &mut Vec<(ResourceChange, Value)>) {
    if let Some(resources) = module.get("resources").and_then(|v| v.as_array()) {
        for raw in resources {
            let text = |key: &str| raw.get(key).and_then(|v| v.as_str()).map(str::to_string);
            let change = ResourceChange {
                address: text("address"),
                resource_type: text("type"),
                name: text("name"),
                change: ChangeDetail {
                    actions: Vec::new(),
                    before: None,
                    after: raw.get("values").cloned(),
                },
            };
            out.push((change, raw.clone()));
        }
    }

    if let Some(children) = module.get("child_modules").and_then(|v| v.as_array()) {
        for child in children {
            collect_state_resources(child, out);
        }
    }
}

fn change_to_document(change: &ResourceChange, raw: &Value) -> Document {
    let resource_type = change.type_or_unknown().to_string();
    let resource_name = change.display_name().to_string();
    let page_content = serde_json::to_string_pretty(raw).unwrap_or_else(|_| raw.to_string());

    Document::new(
        page_content,
        DocumentMetadata {
            source: resource_name.to_uppercase(),
            standard: resource_type.to_uppercase(),
            resource_type: Some(resource_type),
            resource_name: Some(resource_name),
        },
    )
}

fn load_directory(dir: &Path) -> Result<Vec<Document>> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| RAW_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
        })
        .collect::<Vec<_>>();
    entries.sort();

    let mut docs = Vec::with_capacity(entries.len());
    for path in entries {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        docs.push(Document::new(
            content,
            DocumentMetadata {
                source: file_name,
                standard: "TERRAFORM".to_string(),
                ..Default::default()
            },
        ));
    }

    if docs.is_empty() {
        bail!("No .tf, .json, or .txt files found in {}", dir.display());
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_plan_resources_become_documents() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            &tmp,
            "plan.json",
            r#"{"resource_changes":[
                {"address":"aws_s3_bucket.logs","type":"aws_s3_bucket","name":"logs",
                 "change":{"actions":["create"],"after":{"bucket":"logs"}}},
                {"type":"aws_instance","name":"web","change":{"actions":["update"]}}
            ]}"#,
        );

        let docs = load_terraform_docs(&path).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].metadata.resource_type.as_deref(), Some("aws_s3_bucket"));
        assert_eq!(docs[0].metadata.resource_name.as_deref(), Some("aws_s3_bucket.logs"));
        assert_eq!(docs[0].metadata.standard, "AWS_S3_BUCKET");
        assert_eq!(docs[0].metadata.source, "AWS_S3_BUCKET.LOGS");
        assert!(docs[0].page_content.contains("\"bucket\": \"logs\""));
        assert_eq!(docs[1].metadata.resource_name.as_deref(), Some("web"));
    }

    #[test]
    fn test_missing_fields_become_unknown() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "plan.json", r#"{"resource_changes":[{"change":{}}]}"#);
        let docs = load_terraform_docs(&path).unwrap();
        assert_eq!(docs[0].metadata.resource_type.as_deref(), Some("unknown"));
        assert_eq!(docs[0].metadata.resource_name.as_deref(), Some("unknown"));
    }

    #[test]
    fn test_state_format_walks_child_modules() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            &tmp,
            "state.json",
            r#"{"values":{"root_module":{
                "resources":[{"address":"aws_vpc.main","type":"aws_vpc","name":"main","values":{}}],
                "child_modules":[{"resources":[
                    {"address":"module.db.aws_db_instance.db","type":"aws_db_instance","name":"db",
                     "values":{"instance_class":"db.t3.micro"}}
                ]}]
            }}}"#,
        );
        let plan = load_plan(&path).unwrap();
        assert_eq!(plan.resource_changes.len(), 2);
        assert_eq!(
            plan.resource_changes[1].display_name(),
            "module.db.aws_db_instance.db"
        );
        assert!(plan.resource_changes[1].after_values().is_some());
    }

    #[test]
    fn test_empty_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "plan.json", "   ");
        let err = format!("{:#}", load_terraform_docs(&path).unwrap_err());
        assert!(err.contains("empty"), "{}", err);
    }

    #[test]
    fn test_invalid_json_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "plan.json", "{not json");
        assert!(load_terraform_docs(&path).is_err());
    }

    #[test]
    fn test_unrecognized_format_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "plan.json", r#"{"format_version":"1.2"}"#);
        let err = format!("{:#}", load_terraform_docs(&path).unwrap_err());
        assert!(err.contains("Unrecognized"), "{}", err);
    }

    #[test]
    fn test_directory_loads_raw_files() {
        let tmp = TempDir::new().unwrap();
        write(&tmp, "main.tf", "resource \"aws_vpc\" \"main\" {}");
        write(&tmp, "notes.txt", "notes");
        write(&tmp, "image.png", "binary");
        let docs = load_terraform_docs(tmp.path()).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].metadata.source, "main.tf");
    }

    proptest! {
        #[test]
        fn test_one_document_per_resource_change(
            names in prop::collection::vec("[a-z][a-z0-9_]{0,12}", 0..20)
        ) {
            let changes: Vec<Value> = names
                .iter()
                .map(|n| serde_json::json!({
                    "address": format!("aws_s3_bucket.{}", n),
                    "type": "aws_s3_bucket",
                    "name": n,
                    "change": {"actions": ["create"]}
                }))
                .collect();
            let content = serde_json::json!({ "resource_changes": changes }).to_string();
            let tmp = TempDir::new().unwrap();
            let path = tmp.path().join("plan.json");
            std::fs::write(&path, content).unwrap();

            let docs = load_terraform_docs(&path).unwrap();
            prop_assert_eq!(docs.len(), names.len());
            for (doc, name) in docs.iter().zip(&names) {
                prop_assert_eq!(doc.metadata.resource_type.as_deref(), Some("aws_s3_bucket"));
                let expected = format!("aws_s3_bucket.{}", name);
                prop_assert_eq!(doc.metadata.resource_name.as_deref(), Some(expected.as_str()));
            }
        }
    }
}
