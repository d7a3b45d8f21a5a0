use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub registry: RegistryConfig,
    #[serde(default)]
    pub brokerage: BrokerageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub db_path: PathBuf,
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
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    /// Candidate multiplier: the index is asked for `k * oversample` hits
    /// to leave headroom for the company post-filter.
    #[serde(default = "default_oversample")]
    pub oversample: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            oversample: default_oversample(),
        }
    }
}

fn default_k() -> usize {
    20
}
fn default_oversample() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    pub base_url: String,
    /// Environment variable holding the registry API key.
    #[serde(default = "default_registry_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_net_timeout_secs")]
    pub timeout_secs: u64,
    /// Hard bound on listing pagination per session.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_registry_key_env() -> String {
    "REGISTRY_API_KEY".to_string()
}
fn default_net_timeout_secs() -> u64 {
    20
}
fn default_max_pages() -> usize {
    5
}
fn default_page_size() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerageConfig {
    #[serde(default = "default_brokerage_url")]
    pub base_url: String,
    #[serde(default = "default_net_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_company_reports")]
    pub max_company_reports: usize,
    #[serde(default = "default_max_industry_reports")]
    pub max_industry_reports: usize,
}

impl Default for BrokerageConfig {
    fn default() -> Self {
        Self {
            base_url: default_brokerage_url(),
            timeout_secs: default_net_timeout_secs(),
            max_company_reports: default_max_company_reports(),
            max_industry_reports: default_max_industry_reports(),
        }
    }
}

fn default_brokerage_url() -> String {
    "https://finance.naver.com".to_string()
}
fn default_max_company_reports() -> usize {
    3
}
fn default_max_industry_reports() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Endpoint override (Ollama URL or an OpenAI-compatible base).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: default_dims(),
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_dims() -> usize {
    256
}
fn default_max_retries() -> u32 {
    5
}
fn default_embed_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub providers: Vec<LlmProviderConfig>,
    /// Used when no routing entry covers a task.
    #[serde(default)]
    pub default_provider: Option<String>,
    /// Task name → provider name (e.g. `answer = "gpt"`).
    #[serde(default)]
    pub routing: HashMap<String, String>,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

fn default_llm_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmProviderConfig {
    pub name: String,
    /// OpenAI-compatible chat completions endpoint.
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Task names this provider is suited for (e.g. `["answer", "classify"]`).
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.storage.db_path.as_os_str().is_empty() {
        anyhow::bail!("storage.db_path must not be empty");
    }

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be < chunking.chunk_size");
    }

    if config.retrieval.k == 0 {
        anyhow::bail!("retrieval.k must be >= 1");
    }
    if config.retrieval.oversample == 0 {
        anyhow::bail!("retrieval.oversample must be >= 1");
    }

    if config.registry.base_url.trim().is_empty() {
        anyhow::bail!("registry.base_url must not be empty");
    }
    if config.registry.max_pages == 0 {
        anyhow::bail!("registry.max_pages must be >= 1");
    }
    if config.registry.page_size == 0 {
        anyhow::bail!("registry.page_size must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "hash" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, or ollama.",
            other
        ),
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    for (task, name) in &config.llm.routing {
        if !config.llm.providers.iter().any(|p| &p.name == name) {
            anyhow::bail!("llm.routing.{} refers to unknown provider '{}'", task, name);
        }
    }
    if let Some(name) = &config.llm.default_provider {
        if !config.llm.providers.iter().any(|p| &p.name == name) {
            anyhow::bail!("llm.default_provider refers to unknown provider '{}'", name);
        }
    }

    Ok(config)
}
