use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use rmcp::{ServiceExt, transport::stdio};
use clap::Parser;
use omni_docs_mcp::atlas::Atlas;
use omni_docs_mcp::config::{self, EndpointConfig, RetrievalOptions, ServiceConfig};
use omni_docs_mcp::retrieval::{Corpus, Embedder, HttpEmbedder, HttpReranker, LazyIndex, Reranker, RetrievalPipeline};
use omni_docs_mcp::server::DocsServer;

#[cfg(feature = "trace")]
use tracing_subscriber::{EnvFilter};

#[derive(Parser)]
struct Cli {
    /// Path to the atlas JSON document (modules, classes, methods)
    #[clap(long, env = "OMNI_DOCS_ATLAS", default_value = "data/atlas.json")]
    atlas: PathBuf,
    /// Directory of the code example vector index (optional)
    #[clap(long, env = "OMNI_DOCS_CODE_INDEX")]
    code_index: Option<PathBuf>,
    /// Directory of the documentation vector index (optional)
    #[clap(long, env = "OMNI_DOCS_DOCS_INDEX")]
    docs_index: Option<PathBuf>,
    /// Embedding model identifier
    #[clap(long, env = "OMNI_DOCS_EMBEDDING_MODEL", default_value = config::DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,
    /// Embedding endpoint URL
    #[clap(long, env = "OMNI_DOCS_EMBEDDING_URL", default_value = config::DEFAULT_EMBEDDING_URL)]
    embedding_url: String,
    /// Reranking model identifier
    #[clap(long, env = "OMNI_DOCS_RERANK_MODEL", default_value = config::DEFAULT_RERANK_MODEL)]
    rerank_model: String,
    /// Reranking endpoint URL
    #[clap(long, env = "OMNI_DOCS_RERANK_URL", default_value = config::DEFAULT_RERANK_URL)]
    rerank_url: String,
    /// Disable the reranking stage
    #[clap(long)]
    no_rerank: bool,
    /// API key for the embedding and reranking services (optional)
    #[clap(long, env = "NVIDIA_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// Candidates fetched from the vector index
    #[clap(long, default_value_t = config::DEFAULT_TOP_K)]
    top_k: usize,
    /// Results kept after reranking
    #[clap(long, default_value_t = config::DEFAULT_RERANK_K)]
    rerank_k: usize,
    /// Character budget of the returned context
    #[clap(long, default_value_t = config::DEFAULT_MAX_CONTEXT_SIZE)]
    max_context_size: usize,
    /// Timeout for each embedding or reranking request, in seconds
    #[clap(long, default_value_t = config::DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,
}

impl Cli {
    fn into_config(self) -> ServiceConfig {
        let timeout = Duration::from_secs(self.timeout_secs);
        let embedder = EndpointConfig {
            model: self.embedding_model,
            url: self.embedding_url,
            api_key: self.api_key.clone(),
            timeout,
        };
        let reranker = (!self.no_rerank).then(|| EndpointConfig {
            model: self.rerank_model,
            url: self.rerank_url,
            api_key: self.api_key,
            timeout,
        });
        ServiceConfig {
            atlas_path: self.atlas,
            code_index_dir: self.code_index,
            docs_index_dir: self.docs_index,
            embedder,
            reranker,
            retrieval: RetrievalOptions {
                top_k: self.top_k,
                rerank_k: self.rerank_k,
                use_rerank: !self.no_rerank,
                max_context_size: self.max_context_size,
            },
        }
    }
}

fn build_pipeline(
    corpus: Corpus,
    dir: &Path,
    embedder: &Arc<dyn Embedder>,
    reranker: Option<&Arc<dyn Reranker>>,
    config: &ServiceConfig,
) -> Arc<RetrievalPipeline> {
    let mut pipeline = RetrievalPipeline::new(corpus, Arc::clone(embedder), Arc::new(LazyIndex::new(dir)))
        .with_upstream_timeout(config.embedder.timeout);
    if let Some(reranker) = reranker {
        pipeline = pipeline.with_reranker(Arc::clone(reranker));
    }
    Arc::new(pipeline)
}

/// You can inspect the server using the Model Context Protocol Inspector.
/// npx @modelcontextprotocol/inspector cargo run -p omni-docs-mcp

#[tokio::main]
async fn main() -> Result<()> {
    // Get command line arguments
    let config = Cli::parse().into_config();

    // Stdout carries the MCP transport, so logs go to a file
    #[cfg(feature = "trace")]
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .with_writer(std::fs::File::create("server.log")?)
        .with_ansi(false)
        .init();

    tracing::info!("Starting MCP server");

    // Atlas and indexes load lazily on first use
    let atlas = Arc::new(Atlas::from_path(&config.atlas_path));
    tracing::info!("Using atlas at {:?}", config.atlas_path);

    let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(config.embedder.clone())?);
    let reranker: Option<Arc<dyn Reranker>> = match &config.reranker {
        Some(endpoint) => Some(Arc::new(HttpReranker::new(endpoint.clone())?) as Arc<dyn Reranker>),
        None => {
            tracing::info!("Reranking disabled");
            None
        }
    };

    let mut server = DocsServer::new(atlas, config.retrieval);
    if let Some(dir) = &config.code_index_dir {
        tracing::info!("Code example index: {:?}", dir);
        server = server.with_code_search(build_pipeline(Corpus::CodeExamples, dir, &embedder, reranker.as_ref(), &config));
    } else {
        tracing::info!("No code example index specified, skipping");
    }
    if let Some(dir) = &config.docs_index_dir {
        tracing::info!("Documentation index: {:?}", dir);
        server = server.with_doc_search(build_pipeline(Corpus::Documentation, dir, &embedder, reranker.as_ref(), &config));
    } else {
        tracing::info!("No documentation index specified, skipping");
    }

    let service = server
        .serve(stdio()).await.inspect_err(|e| {
            tracing::error!("serving error: {:?}", e);
        })?;

    service.waiting().await?;
    Ok(())
}
