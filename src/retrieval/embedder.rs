use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EndpointConfig;
use crate::error::{DocsError, DocsResult};

const SERVICE: &str = "embedding";

/// Turns text into a query vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> DocsResult<Vec<f32>>;

    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    input_type: &'static str,
    encoding_format: &'static str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: EndpointConfig,
}

impl HttpEmbedder {
    pub fn new(config: EndpointConfig) -> DocsResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DocsError::upstream(SERVICE, e))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> DocsResult<Vec<f32>> {
        let body = EmbeddingRequest {
            model: &self.config.model,
            input: vec![text],
            input_type: "query",
            encoding_format: "float",
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

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| http_error(e, SERVICE, &self.config))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| DocsError::invalid_response(SERVICE, "response contained no embedding"))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Map a transport error to the upstream error classes.
pub(crate) fn http_error(err: reqwest::Error, service: &str, config: &EndpointConfig) -> DocsError {
    if err.is_timeout() {
        DocsError::UpstreamTimeout {
            service: service.to_string(),
            timeout: config.timeout,
        }
    } else {
        DocsError::upstream(service, err)
    }
}
