//! In-memory vector index.
//!
//! A brute-force cosine store built per run: chunk the documents, embed the
//! chunks, keep `(chunk, vector)` pairs in a `Vec`, and scan on query. Plans
//! and reference sets are small enough that no external vector database is
//! needed.
//!
//! # Search modes
//!
//! | `search_type` | Behavior |
//! |---------------|----------|
//! | `similarity` | top-`k` by cosine similarity |
//! | `mmr` | fetch `fetch_k` candidates, then pick `k` by maximal marginal relevance |
//!
//! MMR score for a candidate `d` given already selected set `S`:
//!
//! ```text
//! λ · sim(q, d) − (1 − λ) · max_{s ∈ S} sim(d, s)
//! ```
//!
//! Ties are broken by insertion order, so results are deterministic.

use anyhow::{bail, Result};
use std::cmp::Ordering;
use tracing::debug;

use crate::chunk::chunk_documents;
use crate::config::{Config, RetrievalConfig};
use crate::embedding::{cosine_similarity, embed_query, embed_texts};
use crate::models::{Chunk, Document, RetrievedChunk};

struct IndexEntry {
    chunk: Chunk,
    vector: Vec<f32>,
}

pub struct VectorIndex {
    collection: String,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            entries: Vec::new(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add chunks with their vectors. Both slices must have the same length.
    pub fn add(&mut self, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<()> {
        if chunks.len() != vectors.len() {
            bail!(
                "Index insert mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }
        self.entries.extend(
            chunks
                .into_iter()
                .zip(vectors)
                .map(|(chunk, vector)| IndexEntry { chunk, vector }),
        );
        Ok(())
    }

    /// Dispatch on `config.search_type`.
    pub fn search(&self, query: &[f32], config: &RetrievalConfig) -> Vec<RetrievedChunk> {
        match config.search_type.as_str() {
            "similarity" => self.similarity_search(query, config.search_k),
            _ => self.mmr_search(query, config.search_k, config.fetch_k, config.mmr_lambda),
        }
    }

    pub fn similarity_search(&self, query: &[f32], k: usize) -> Vec<RetrievedChunk> {
        self.ranked(query)
            .into_iter()
            .take(k)
            .map(|(i, score)| self.retrieved(i, score))
            .collect()
    }

    pub fn mmr_search(
        &self,
        query: &[f32],
        k: usize,
        fetch_k: usize,
        lambda: f32,
    ) -> Vec<RetrievedChunk> {
        let candidates: Vec<(usize, f32)> = self
            .ranked(query)
            .into_iter()
            .take(fetch_k.max(k))
            .collect();

        let mut selected: Vec<(usize, f32)> = Vec::with_capacity(k);
        let mut remaining = candidates;

        while selected.len() < k && !remaining.is_empty() {
            let mut best_pos = 0;
            let mut best_score = f32::NEG_INFINITY;

            for (pos, (idx, relevance)) in remaining.iter().enumerate() {
                let redundancy = selected
                    .iter()
                    .map(|(s, _)| {
                        cosine_similarity(&self.entries[*idx].vector, &self.entries[*s].vector)
                    })
                    .fold(f32::NEG_INFINITY, f32::max);
                let redundancy = if selected.is_empty() { 0.0 } else { redundancy };
                let score = lambda * relevance - (1.0 - lambda) * redundancy;
                if score > best_score {
                    best_score = score;
                    best_pos = pos;
                }
            }

            selected.push(remaining.remove(best_pos));
        }

        selected
            .into_iter()
            .map(|(i, score)| self.retrieved(i, score))
            .collect()
    }

    /// All entries by descending similarity, insertion order on ties.
    fn ranked(&self, query: &[f32]) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query, &e.vector)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored
    }

    fn retrieved(&self, index: usize, score: f32) -> RetrievedChunk {
        let chunk = &self.entries[index].chunk;
        RetrievedChunk {
            text: chunk.text.clone(),
            score,
            metadata: chunk.metadata.clone(),
        }
    }
}

/// Chunk and embed `docs` into a fresh index.
pub async fn build_index(config: &Config, docs: &[Document]) -> Result<VectorIndex> {
    let chunks = chunk_documents(
        docs,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    );
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embed_texts(&config.embedding, &texts).await?;

    let mut index = VectorIndex::new(config.retrieval.collection.clone());
    index.add(chunks, vectors)?;
    debug!(
        collection = %index.collection(),
        chunks = index.len(),
        "built vector index"
    );
    Ok(index)
}

/// Embed `query` and search the index with the configured mode.
pub async fn retrieve(
    config: &Config,
    index: &VectorIndex,
    query: &str,
) -> Result<Vec<RetrievedChunk>> {
    if index.is_empty() {
        return Ok(Vec::new());
    }
    let vector = embed_query(&config.embedding, query).await?;
    Ok(index.search(&vector, &config.retrieval))
}
