//! Text embeddings for the retrieval index.
//!
//! [`embed_texts`] dispatches on `embedding.provider`:
//!
//! | Config Value | Backend |
//! |-------------|---------|
//! | `"hash"` | deterministic feature hashing; no model, no network |
//! | `"openai"` | `POST /v1/embeddings` (needs `OPENAI_API_KEY`) |
//! | `"ollama"` | `POST /api/embed` on `embedding.url` |
//! | `"local"` | in-process fastembed (`local-embeddings-fastembed` feature) |
//!
//! [`cosine_similarity`] is the one vector utility the retrieval index needs.
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama providers go through [`crate::http::post_json`]:
//! 429 and 5xx responses and network errors retry with exponential backoff,
//! other 4xx responses fail immediately.

use anyhow::{anyhow, bail, Result};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::http;

/// Vector width of the hashing provider when `embedding.dims` is unset.
const HASH_DEFAULT_DIMS: usize = 384;

/// Embed a batch of texts using the configured provider.
///
/// Returns one vector per input text, in input order.
pub async fn embed_texts(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    debug!(provider = %config.provider, count = texts.len(), "embedding batch");

    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(config.batch_size.max(1)) {
        let vectors = match config.provider.as_str() {
            "hash" => Ok(embed_hash(config, batch)),
            "openai" => embed_openai(config, batch).await,
            "ollama" => embed_ollama(config, batch).await,
            #[cfg(feature = "local-embeddings-fastembed")]
            "local" => embed_local_fastembed(config, batch).await,
            #[cfg(not(feature = "local-embeddings-fastembed"))]
            "local" => bail!(
                "Local embedding provider requires --features local-embeddings-fastembed"
            ),
            other => bail!("Unknown embedding provider: {}", other),
        }?;
        if vectors.len() != batch.len() {
            bail!(
                "Embedding provider returned {} vectors for {} texts",
                vectors.len(),
                batch.len()
            );
        }
        out.extend(vectors);
    }
    Ok(out)
}

/// Embed a single query text.
pub async fn embed_query(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>> {
    embed_texts(config, &[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Empty embedding response"))
}

// ============ Hash ============

/// Feature-hashing embedder.
///
/// Each lower-cased alphanumeric token is hashed with SHA-256; the first
/// eight bytes pick a bucket and a sign. The result is L2-normalized, so
/// texts sharing vocabulary have a high cosine similarity. Useful offline
/// and in tests where no model is available.
fn embed_hash(config: &EmbeddingConfig, texts: &[String]) -> Vec<Vec<f32>> {
    let dims = config.dims.unwrap_or(HASH_DEFAULT_DIMS).max(1);
    texts.iter().map(|t| hash_vector(t, dims)).collect()
}

fn hash_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    for token in text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
    {
        let digest = Sha256::digest(token.to_lowercase().as_bytes());
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = u64::from_le_bytes(bucket_bytes);
        let index = (bucket % dims as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        v[index] += sign;
    }

    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

// ============ OpenAI ============

/// Requires `embedding.model` and the `OPENAI_API_KEY` environment variable.
async fn embed_openai(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| anyhow!("OPENAI_API_KEY not set"))?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow!("embedding.model required"))?;

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let json = post_with_backoff(
        config,
        "OpenAI",
        "https://api.openai.com/v1/embeddings",
        Some(&api_key),
        &body,
    )
    .await?;
    parse_openai_response(&json)
}

/// Extracts `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, json_to_vector(embedding)?));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Defaults to `http://localhost:11434` when `embedding.url` is unset.
async fn embed_ollama(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow!("embedding.model required"))?;
    let url = config.url.as_deref().unwrap_or("http://localhost:11434");

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let json = post_with_backoff(
        config,
        "Ollama",
        &format!("{}/api/embed", url.trim_end_matches('/')),
        None,
        &body,
    )
    .await?;
    parse_ollama_response(&json)
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(json_to_vector)
        .collect()
}

fn json_to_vector(value: &serde_json::Value) -> Result<Vec<f32>> {
    Ok(value
        .as_array()
        .ok_or_else(|| anyhow!("Invalid embedding: not an array"))?
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

/// POST through the shared retrying client with this provider's limits.
async fn post_with_backoff(
    config: &EmbeddingConfig,
    label: &str,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    let client = http::client(config.timeout_secs)?;
    http::post_json(&client, label, url, bearer, body, config.max_retries).await
}

// ============ Local (fastembed) ============

/// Normalizes Hugging Face style ids such as
/// `sentence-transformers/all-MiniLM-L6-v2` to the short local names.
pub fn local_model_name(config: &EmbeddingConfig) -> String {
    let raw = config
        .model
        .clone()
        .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
    let short = raw.rsplit('/').next().unwrap_or(&raw).to_ascii_lowercase();
    short.trim_start_matches("fast-").to_string()
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
async fn embed_local_fastembed(
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let fastembed_model = config_to_fastembed_model(&local_model_name(config))?;
    let batch_size = config.batch_size;
    let texts = texts.to_vec();

    tokio::task::spawn_blocking(move || {
        let mut model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(false),
        )
        .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;

        model
            .embed(texts, Some(batch_size))
            .map_err(|e| anyhow!("Local embedding failed: {}", e))
    })
    .await?
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_config() -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "hash".to_string(),
            dims: Some(64),
            ..Default::default()
        }
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[tokio::test]
    async fn test_hash_embeddings_are_deterministic_and_normalized() {
        let config = hash_config();
        let texts = vec!["aws_s3_bucket encryption".to_string()];
        let a = embed_texts(&config, &texts).await.unwrap();
        let b = embed_texts(&config, &texts).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hash_embeddings_rank_shared_vocabulary_higher() {
        let config = hash_config();
        let query = embed_query(&config, "s3 bucket encryption").await.unwrap();
        let docs = embed_texts(
            &config,
            &[
                "S3 bucket server side encryption".to_string(),
                "lambda memory size timeout".to_string(),
            ],
        )
        .await
        .unwrap();
        assert!(cosine_similarity(&query, &docs[0]) > cosine_similarity(&query, &docs[1]));
    }

    #[tokio::test]
    async fn test_empty_batch_is_empty() {
        let out = embed_texts(&hash_config(), &[]).await.unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let out = parse_openai_response(&json).unwrap();
        assert_eq!(out, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_ollama_response_missing_array() {
        let err = parse_ollama_response(&serde_json::json!({})).unwrap_err();
        assert!(err.to_string().contains("missing embeddings"));
    }

    #[test]
    fn test_local_model_name_strips_hub_prefix() {
        let config = EmbeddingConfig {
            model: Some("sentence-transformers/all-MiniLM-L6-v2".to_string()),
            ..Default::default()
        };
        assert_eq!(local_model_name(&config), "all-minilm-l6-v2");
    }

    #[tokio::test]
    async fn test_unknown_provider_rejected() {
        let config = EmbeddingConfig {
            provider: "magic".to_string(),
            ..Default::default()
        };
        let err = embed_texts(&config, &["text".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[tokio::test]
    async fn test_hash_dims_default_when_unset() {
        let config = EmbeddingConfig {
            provider: "hash".to_string(),
            dims: None,
            ..Default::default()
        };
        let v = embed_query(&config, "kms key rotation").await.unwrap();
        assert_eq!(v.len(), HASH_DEFAULT_DIMS);
    }
}
