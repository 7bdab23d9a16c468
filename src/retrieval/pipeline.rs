//! Embed, search, rerank, assemble.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;

use crate::config::{DEFAULT_TIMEOUT_SECS, RetrievalOptions};
use crate::error::{DocsError, DocsResult};

use super::context::{self, Corpus};
use super::embedder::Embedder;
use super::index::{Document, LazyIndex, VectorIndex};
use super::reranker::{RerankHit, Reranker};

/// Attempts per upstream call: the first try plus one retry
const MAX_ATTEMPTS: u32 = 2;

/// Where a document's score came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    /// Vector distance, smaller is closer
    Distance,
    /// Reranker relevance, larger is better
    Relevance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
    pub kind: ScoreKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RerankStatus {
    Applied,
    /// Reranking was not requested or no reranker is configured
    Skipped,
    /// The reranker failed and similarity order was used instead
    Fallback { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalOutcome {
    /// Final ordered documents, before the context size budget
    pub documents: Vec<ScoredDocument>,
    /// Assembled context, or the corpus' empty message
    pub context: String,
    pub included: usize,
    pub omitted: usize,
    pub rerank: RerankStatus,
}

impl RetrievalOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self.rerank, RerankStatus::Fallback { .. })
    }
}

/// Two-stage retrieval over one vector index
pub struct RetrievalPipeline {
    corpus: Corpus,
    embedder: Arc<dyn Embedder>,
    index: Arc<LazyIndex>,
    reranker: Option<Arc<dyn Reranker>>,
    upstream_timeout: Duration,
}

impl RetrievalPipeline {
    pub fn new(corpus: Corpus, embedder: Arc<dyn Embedder>, index: Arc<LazyIndex>) -> Self {
        Self {
            corpus,
            embedder,
            index,
            reranker: None,
            upstream_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Timeout applied to each embedding or reranking attempt
    pub fn with_upstream_timeout(mut self, upstream_timeout: Duration) -> Self {
        self.upstream_timeout = upstream_timeout;
        self
    }

    pub fn corpus(&self) -> Corpus {
        self.corpus
    }

    /// Run the full chain. Embedding failures fail the call; reranking
    /// failures fall back to similarity order.
    pub async fn retrieve(
        &self,
        query: &str,
        options: RetrievalOptions,
    ) -> DocsResult<RetrievalOutcome> {
        let query = query.trim();
        validate(query, &options)?;

        let index = self.load_index().await?;
        let vector = self.embed_query(query).await?;
        if vector.len() != index.dimension() {
            return Err(DocsError::invalid_response(
                "embedding",
                format!(
                    "{} model returned {} dimensions, index expects {}",
                    self.embedder.model_name(),
                    vector.len(),
                    index.dimension()
                ),
            ));
        }
        let candidates = index.search(&vector, options.top_k)?;
        tracing::debug!(
            query,
            top_k = options.top_k,
            candidates = candidates.len(),
            "Vector search complete"
        );

        let (documents, rerank) = self.order_candidates(query, candidates, &options).await;

        let assembled = context::assemble(
            self.corpus,
            documents.iter().map(|d| &d.document),
            options.max_context_size,
        );
        let context = if assembled.included == 0 {
            self.corpus.empty_message().to_string()
        } else {
            assembled.text
        };

        tracing::info!(
            query,
            returned = documents.len(),
            included = assembled.included,
            omitted = assembled.omitted,
            degraded = matches!(rerank, RerankStatus::Fallback { .. }),
            "Retrieval complete"
        );

        Ok(RetrievalOutcome {
            documents,
            context,
            included: assembled.included,
            omitted: assembled.omitted,
            rerank,
        })
    }

    /// [`retrieve`](Self::retrieve) bounded by an overall deadline. Nothing
    /// partial is returned when the deadline passes.
    pub async fn retrieve_within(
        &self,
        query: &str,
        options: RetrievalOptions,
        deadline: Duration,
    ) -> DocsResult<RetrievalOutcome> {
        match timeout(deadline, self.retrieve(query, options)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    query,
                    deadline_ms = deadline.as_millis() as u64,
                    "Retrieval deadline exceeded"
                );
                Err(DocsError::DeadlineExceeded(deadline.as_millis()))
            }
        }
    }

    async fn load_index(&self) -> DocsResult<Arc<VectorIndex>> {
        let index = Arc::clone(&self.index);
        tokio::task::spawn_blocking(move || index.get())
            .await
            .map_err(|e| DocsError::IndexUnavailable(e.to_string()))?
    }

    async fn embed_query(&self, query: &str) -> DocsResult<Vec<f32>> {
        let embedder = Arc::clone(&self.embedder);
        call_upstream("embedding", self.upstream_timeout, || {
            let embedder = Arc::clone(&embedder);
            async move { embedder.embed(query).await }
        })
        .await
    }

    async fn order_candidates(
        &self,
        query: &str,
        candidates: Vec<(Document, f32)>,
        options: &RetrievalOptions,
    ) -> (Vec<ScoredDocument>, RerankStatus) {
        let reranker = match (&self.reranker, options.use_rerank) {
            (Some(reranker), true) if !candidates.is_empty() => Arc::clone(reranker),
            _ => {
                return (by_distance(candidates, options.rerank_k), RerankStatus::Skipped);
            }
        };

        let passages: Vec<String> = candidates.iter().map(|(d, _)| d.content.clone()).collect();
        let passage_refs: &[String] = &passages;
        let rerank_k = options.rerank_k;
        let result = call_upstream("reranking", self.upstream_timeout, || {
            let reranker = Arc::clone(&reranker);
            async move { reranker.rerank(query, passage_refs, rerank_k).await }
        })
        .await
        .and_then(|hits| check_hits(&hits, passages.len()).map(|_| hits));

        match result {
            Ok(hits) => (by_relevance(candidates, hits, rerank_k), RerankStatus::Applied),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    model = reranker.model_name(),
                    "Reranking failed, falling back to similarity order"
                );
                (
                    by_distance(candidates, rerank_k),
                    RerankStatus::Fallback {
                        reason: e.to_string(),
                    },
                )
            }
        }
    }
}

fn validate(query: &str, options: &RetrievalOptions) -> DocsResult<()> {
    if query.is_empty() {
        return Err(DocsError::InvalidInput("query must not be empty".to_string()));
    }
    if options.top_k == 0 {
        return Err(DocsError::InvalidInput("top_k must be at least 1".to_string()));
    }
    if options.rerank_k == 0 {
        return Err(DocsError::InvalidInput("rerank_k must be at least 1".to_string()));
    }
    Ok(())
}

/// Run an upstream call with a per-attempt timeout and at most one retry.
/// Only transient failures are retried.
async fn call_upstream<T, F, Fut>(service: &str, per_attempt: Duration, mut call: F) -> DocsResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DocsResult<T>>,
{
    let mut last_error = None;
    for attempt in 1..=MAX_ATTEMPTS {
        let error = match timeout(per_attempt, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if !e.is_retryable() => return Err(e),
            Ok(Err(e)) => e,
            Err(_) => DocsError::UpstreamTimeout {
                service: service.to_string(),
                timeout: per_attempt,
            },
        };
        tracing::warn!(service, attempt, error = %error, "Upstream call failed");
        last_error = Some(error);
    }
    Err(last_error.unwrap_or_else(|| DocsError::upstream(service, "no attempts made")))
}

fn check_hits(hits: &[RerankHit], passages: usize) -> DocsResult<()> {
    match hits.iter().find(|h| h.index >= passages) {
        Some(bad) => Err(DocsError::invalid_response(
            "reranking",
            format!("index {} out of range for {} passages", bad.index, passages),
        )),
        None => Ok(()),
    }
}

fn by_distance(candidates: Vec<(Document, f32)>, keep: usize) -> Vec<ScoredDocument> {
    candidates
        .into_iter()
        .take(keep)
        .map(|(document, distance)| ScoredDocument {
            document,
            score: distance,
            kind: ScoreKind::Distance,
        })
        .collect()
}

/// Materialize documents in reranker order. A repeated index keeps its first hit.
fn by_relevance(
    candidates: Vec<(Document, f32)>,
    hits: Vec<RerankHit>,
    keep: usize,
) -> Vec<ScoredDocument> {
    let mut slots: Vec<Option<Document>> = candidates.into_iter().map(|(d, _)| Some(d)).collect();
    hits.into_iter()
        .filter_map(|hit| {
            slots[hit.index].take().map(|document| ScoredDocument {
                document,
                score: hit.score,
                kind: ScoreKind::Relevance,
            })
        })
        .take(keep)
        .collect()
}
