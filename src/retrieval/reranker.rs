use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EndpointConfig;
use crate::error::{DocsError, DocsResult};

use super::embedder::http_error;

const SERVICE: &str = "reranking";

/// One reranked passage: `index` points into the passages that were sent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankHit {
    pub index: usize,
    pub score: f32,
}

/// Second-stage relevance scoring
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Up to `top_k` hits, most relevant first.
    async fn rerank(
        &self,
        query: &str,
        passages: &[String],
        top_k: usize,
    ) -> DocsResult<Vec<RerankHit>>;

    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct TextItem<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct RankingRequest<'a> {
    model: &'a str,
    query: TextItem<'a>,
    passages: Vec<TextItem<'a>>,
    truncate: &'static str,
}

#[derive(Deserialize)]
struct RankingResponse {
    rankings: Vec<Ranking>,
}

#[derive(Deserialize)]
struct Ranking {
    index: usize,
    logit: f32,
}

/// Client for a ranking endpoint taking `{query, passages}` and returning
/// `{rankings: [{index, logit}]}`
pub struct HttpReranker {
    client: reqwest::Client,
    config: EndpointConfig,
}

impl HttpReranker {
    pub fn new(config: EndpointConfig) -> DocsResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DocsError::upstream(SERVICE, e))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(
        &self,
        query: &str,
        passages: &[String],
        top_k: usize,
    ) -> DocsResult<Vec<RerankHit>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let body = RankingRequest {
            model: &self.config.model,
            query: TextItem { text: query },
            passages: passages.iter().map(|p| TextItem { text: p }).collect(),
            truncate: "END",
        };

        let mut request = self.client.post(&self.config.url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| http_error(e, SERVICE, &self.config))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DocsError::upstream(SERVICE, format!("{status}: {body}")));
        }

        let parsed: RankingResponse = response
            .json()
            .await
            .map_err(|e| http_error(e, SERVICE, &self.config))?;

        let mut hits: Vec<RerankHit> = parsed
            .rankings
            .into_iter()
            .map(|r| RerankHit {
                index: r.index,
                score: r.logit,
            })
            .collect();
        if let Some(bad) = hits.iter().find(|h| h.index >= passages.len()) {
            return Err(DocsError::invalid_response(
                SERVICE,
                format!("ranking index {} out of range for {} passages", bad.index, passages.len()),
            ));
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
