//! Configuration parsing, environment overrides, and validation.
//!
//! Configuration is read from a TOML file (default `./config/coldrag.toml`).
//! Every section and field has a default, so an empty file is valid. After
//! parsing, a fixed set of environment variables may override individual
//! values; unparsable overrides are ignored and the file value is kept.
//!
//! # Example
//!
//! ```toml
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 100
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [retrieval]
//! search_k = 10
//! search_type = "mmr"
//!
//! [llm]
//! provider = "ollama"
//! model = "mistral"
//! url = "http://localhost:11434"
//!
//! [prompts]
//! dir = "prompts/shared"
//! file = "blanket_compliance_prompt.txt"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```
//!
//! # Environment overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `CHUNK_SIZE` / `CHUNK_OVERLAP` | `chunking.*` |
//! | `EMBEDDING_MODEL` | `embedding.model` |
//! | `SEARCH_K` / `SEARCH_TYPE` | `retrieval.*` |
//! | `QDRANT_COLLECTION_NAME` | `retrieval.collection` |
//! | `QDRANT_HOST` / `QDRANT_PORT` | `retrieval.vector_host` / `retrieval.vector_port` |
//! | `LLM_MODEL` | `llm.model` (an `ollama/` or `openai/` prefix also sets `llm.provider`) |
//! | `OLLAMA_BASE_URL` | `llm.url` |
//! | `LLM_RETURN_SOURCES` | `llm.return_sources` |
//! | `DEFAULT_PROMPTS_DIR` / `DEFAULT_PROMPT_FILE` | `prompts.*` |
//! | `REFERENCE_DIR` | `references.dir` |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Path used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/coldrag.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub references: ReferencesConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_search_k")]
    pub search_k: usize,
    /// `"mmr"` or `"similarity"`.
    #[serde(default = "default_search_type")]
    pub search_type: String,
    /// Candidate pool size for MMR re-ranking.
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    /// MMR trade-off: 1.0 is pure relevance, 0.0 is pure diversity.
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
    /// Label attached to the in-memory index.
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub vector_host: Option<String>,
    #[serde(default)]
    pub vector_port: Option<u16>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_k: default_search_k(),
            search_type: default_search_type(),
            fetch_k: default_fetch_k(),
            mmr_lambda: default_mmr_lambda(),
            collection: default_collection(),
            vector_host: None,
            vector_port: None,
        }
    }
}

fn default_search_k() -> usize {
    10
}
fn default_search_type() -> String {
    "mmr".to_string()
}
fn default_fetch_k() -> usize {
    20
}
fn default_mmr_lambda() -> f32 {
    0.5
}
fn default_collection() -> String {
    "cmmc_documents".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `"ollama"` or `"openai"` (any OpenAI-compatible chat endpoint).
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,
    #[serde(default = "default_num_predict")]
    pub num_predict: u32,
    #[serde(default = "default_seed")]
    pub seed: i64,
    /// Ask the model for a JSON object (`format: "json"` on Ollama).
    #[serde(default = "default_true")]
    pub json_format: bool,
    #[serde(default = "default_true")]
    pub return_sources: bool,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            url: default_llm_url(),
            temperature: 0.0,
            top_p: default_top_p(),
            top_k: default_top_k(),
            num_ctx: default_num_ctx(),
            repeat_penalty: default_repeat_penalty(),
            num_predict: default_num_predict(),
            seed: default_seed(),
            json_format: true,
            return_sources: true,
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_llm_provider() -> String {
    "ollama".to_string()
}
fn default_llm_model() -> String {
    "mistral".to_string()
}
fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_top_p() -> f32 {
    0.3
}
fn default_top_k() -> u32 {
    20
}
fn default_num_ctx() -> u32 {
    4096
}
fn default_repeat_penalty() -> f32 {
    1.2
}
fn default_num_predict() -> u32 {
    1024
}
fn default_seed() -> i64 {
    1
}
fn default_true() -> bool {
    true
}
fn default_llm_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptsConfig {
    #[serde(default = "default_prompts_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_prompt_file")]
    pub file: String,
    /// Load the other prompt files in `dir` as retrievable context.
    #[serde(default = "default_true")]
    pub include_as_context: bool,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            dir: default_prompts_dir(),
            file: default_prompt_file(),
            include_as_context: true,
        }
    }
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("prompts/shared")
}
fn default_prompt_file() -> String {
    "blanket_compliance_prompt.txt".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReferencesConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_reference_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for ReferencesConfig {
    fn default() -> Self {
        Self {
            dir: None,
            include_globs: default_reference_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_reference_globs() -> Vec<String> {
    ["pdf", "txt", "json", "md", "tf", "docx"]
        .iter()
        .map(|ext| format!("**/*.{}", ext))
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PricingConfig {
    /// Query the AWS Pricing API instead of using the static table only.
    #[serde(default)]
    pub live: bool,
    #[serde(default = "default_cost")]
    pub default_cost: f64,
    /// Region for resources that carry no `region`/`availability_zone`.
    /// Unset means [`crate::cost::FALLBACK_REGION`].
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_pricing_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            live: false,
            default_cost: default_cost(),
            region: None,
            endpoint: default_pricing_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_cost() -> f64 {
    0.5
}
fn default_pricing_endpoint() -> String {
    "https://api.pricing.us-east-1.amazonaws.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Where agents write analysis files when the caller gives no path.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Config {
    /// Built-in defaults with environment overrides, for runs without a config file.
    pub fn minimal() -> Self {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        config
    }
}

/// Load and validate configuration.
///
/// A missing file at [`DEFAULT_CONFIG_PATH`] falls back to
/// [`Config::minimal`]; a missing file anywhere else is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
        let config = Config::minimal();
        validate(&config)?;
        return Ok(config);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

/// Apply environment overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let parsed = |key: &str| lookup(key).map(|v| v.trim().to_string());

    if let Some(v) = parsed("CHUNK_SIZE").and_then(|v| v.parse().ok()) {
        config.chunking.chunk_size = v;
    }
    if let Some(v) = parsed("CHUNK_OVERLAP").and_then(|v| v.parse().ok()) {
        config.chunking.chunk_overlap = v;
    }
    if let Some(v) = parsed("EMBEDDING_MODEL").filter(|v| !v.is_empty()) {
        config.embedding.model = Some(v);
    }
    if let Some(v) = parsed("SEARCH_K").and_then(|v| v.parse().ok()) {
        config.retrieval.search_k = v;
    }
    if let Some(v) = parsed("SEARCH_TYPE").filter(|v| v == "mmr" || v == "similarity") {
        config.retrieval.search_type = v;
    }
    if let Some(v) = parsed("QDRANT_COLLECTION_NAME").filter(|v| !v.is_empty()) {
        config.retrieval.collection = v;
    }
    if let Some(v) = parsed("QDRANT_HOST").filter(|v| !v.is_empty()) {
        config.retrieval.vector_host = Some(v);
    }
    if let Some(v) = parsed("QDRANT_PORT").and_then(|v| v.parse().ok()) {
        config.retrieval.vector_port = Some(v);
    }
    if let Some(v) = parsed("LLM_MODEL").filter(|v| !v.is_empty()) {
        match v.split_once('/') {
            Some((provider, model)) if provider == "ollama" || provider == "openai" => {
                config.llm.provider = provider.to_string();
                config.llm.model = model.to_string();
            }
            _ => config.llm.model = v,
        }
    }
    if let Some(v) = parsed("OLLAMA_BASE_URL").filter(|v| !v.is_empty()) {
        config.llm.url = v.trim_end_matches('/').to_string();
    }
    if let Some(v) = parsed("LLM_RETURN_SOURCES").and_then(|v| parse_bool(&v)) {
        config.llm.return_sources = v;
    }
    if let Some(v) = parsed("DEFAULT_PROMPTS_DIR").filter(|v| !v.is_empty()) {
        config.prompts.dir = PathBuf::from(v);
    }
    if let Some(v) = parsed("DEFAULT_PROMPT_FILE").filter(|v| !v.is_empty()) {
        config.prompts.file = v;
    }
    if let Some(v) = parsed("REFERENCE_DIR").filter(|v| !v.is_empty()) {
        config.references.dir = Some(PathBuf::from(v));
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    if config.retrieval.search_k < 1 {
        bail!("retrieval.search_k must be >= 1");
    }
    if config.retrieval.fetch_k < 1 {
        bail!("retrieval.fetch_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.mmr_lambda) {
        bail!("retrieval.mmr_lambda must be in [0.0, 1.0]");
    }
    match config.retrieval.search_type.as_str() {
        "mmr" | "similarity" => {}
        other => bail!(
            "Unknown retrieval.search_type: '{}'. Must be mmr or similarity.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "local" | "hash" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local, ollama, openai, or hash.",
            other
        ),
    }

    match config.llm.provider.as_str() {
        "ollama" | "openai" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be ollama or openai.",
            other
        ),
    }

    if config.pricing.default_cost < 0.0 {
        bail!("pricing.default_cost must be >= 0");
    }

    Ok(())
}
