use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TOP_K: usize = 90;
pub const DEFAULT_RERANK_K: usize = 10;
pub const DEFAULT_MAX_CONTEXT_SIZE: usize = 30_000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_EMBEDDING_MODEL: &str = "nvidia/nv-embedqa-e5-v5";
pub const DEFAULT_EMBEDDING_URL: &str = "https://integrate.api.nvidia.com/v1/embeddings";
pub const DEFAULT_RERANK_MODEL: &str = "nvidia/llama-3.2-nv-rerankqa-1b-v2";
pub const DEFAULT_RERANK_URL: &str =
    "https://ai.api.nvidia.com/v1/retrieval/nvidia/llama-3_2-nv-rerankqa-1b-v2/reranking";

/// Connection settings for an embedding or reranking service
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub model: String,
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl EndpointConfig {
    pub fn embedding_default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            url: DEFAULT_EMBEDDING_URL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn rerank_default() -> Self {
        Self {
            model: DEFAULT_RERANK_MODEL.to_string(),
            url: DEFAULT_RERANK_URL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Per-call retrieval knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalOptions {
    /// Candidates fetched from the vector index
    pub top_k: usize,
    /// Documents kept after reranking or truncation
    pub rerank_k: usize,
    pub use_rerank: bool,
    /// Character budget for the assembled context
    pub max_context_size: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            rerank_k: DEFAULT_RERANK_K,
            use_rerank: true,
            max_context_size: DEFAULT_MAX_CONTEXT_SIZE,
        }
    }
}

/// Everything needed to build the services behind the server
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub atlas_path: PathBuf,
    pub code_index_dir: Option<PathBuf>,
    pub docs_index_dir: Option<PathBuf>,
    pub embedder: EndpointConfig,
    /// `None` disables reranking entirely
    pub reranker: Option<EndpointConfig>,
    pub retrieval: RetrievalOptions,
}
