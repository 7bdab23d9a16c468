use std::sync::Arc;
use rmcp::model::{CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo};
use serde_json::{json, Value};
use serde::Deserialize;

use rmcp::{Error as McpError, ServerHandler, schemars, tool};

use crate::atlas::{Atlas, EntityKind, DEFAULT_MAX_RESULTS, DEFAULT_THRESHOLD};
use crate::config::RetrievalOptions;
use crate::error::DocsError;
use crate::input::parse_names;
use crate::retrieval::RetrievalPipeline;

#[derive(Clone)]
pub struct DocsServer {
    pub atlas: Arc<Atlas>,
    pub code_search: Option<Arc<RetrievalPipeline>>,
    pub doc_search: Option<Arc<RetrievalPipeline>>,
    pub defaults: RetrievalOptions,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ListEntitiesRequest {
    #[schemars(description = "the entity kind: module, class or method")]
    pub kind: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ResolveEntityRequest {
    #[schemars(description = "the entity kind: module, class or method")]
    pub kind: String,
    #[schemars(description = "an approximate, partial or misspelled entity name")]
    pub query: String,
    #[schemars(description = "minimum similarity in [0, 1] (default 0.5)")]
    pub threshold: Option<f64>,
    #[schemars(description = "the maximum number of candidates to return (default 5)")]
    pub max_results: Option<usize>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct EntityDetailRequest {
    #[schemars(description = "the entity kind: module, class or method")]
    pub kind: String,
    #[schemars(description = "one name, a list of names, a JSON array string or a comma-separated string")]
    #[serde(default)]
    pub names: Value,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchRequest {
    #[schemars(description = "a natural-language description of what you are looking for")]
    pub query: String,
    #[schemars(description = "candidates fetched from the vector index")]
    pub top_k: Option<usize>,
    #[schemars(description = "results kept after reranking")]
    pub rerank_k: Option<usize>,
    #[schemars(description = "whether to rerank the candidates (default true)")]
    pub use_rerank: Option<bool>,
    #[schemars(description = "maximum size of the returned context in characters")]
    pub max_context_size: Option<usize>,
}

fn parse_kind(kind: &str) -> Result<EntityKind, McpError> {
    kind.parse().map_err(to_mcp_error)
}

fn to_mcp_error(err: DocsError) -> McpError {
    McpError::invalid_params(err.to_string(), None)
}

/// Invalid input is a protocol error; every other failure is reported as a
/// tool error result the caller can show to the user.
fn failure(err: DocsError) -> Result<CallToolResult, McpError> {
    match err {
        DocsError::InvalidInput(_) => Err(to_mcp_error(err)),
        other => {
            let category = if other.is_unavailable() {
                "unavailable"
            } else if other.is_not_found() {
                "not_found"
            } else if other.is_upstream() {
                "upstream"
            } else {
                "internal"
            };
            tracing::warn!(category, "Tool call failed: {}", other);
            Ok(CallToolResult::error(vec![Content::text(
                json!({ "error": category, "message": other.to_string() }).to_string(),
            )]))
        }
    }
}

#[tool(tool_box)]
impl DocsServer {

    pub fn new(atlas: Arc<Atlas>, defaults: RetrievalOptions) -> Self {
        Self {
            atlas,
            code_search: None,
            doc_search: None,
            defaults,
        }
    }

    pub fn with_code_search(mut self, pipeline: Arc<RetrievalPipeline>) -> Self {
        self.code_search = Some(pipeline);
        self
    }

    pub fn with_doc_search(mut self, pipeline: Arc<RetrievalPipeline>) -> Self {
        self.doc_search = Some(pipeline);
        self
    }

    fn options(&self, request: &SearchRequest) -> RetrievalOptions {
        RetrievalOptions {
            top_k: request.top_k.unwrap_or(self.defaults.top_k),
            rerank_k: request.rerank_k.unwrap_or(self.defaults.rerank_k),
            use_rerank: request.use_rerank.unwrap_or(self.defaults.use_rerank),
            max_context_size: request.max_context_size.unwrap_or(self.defaults.max_context_size),
        }
    }

    async fn atlas_ready(&self) -> Result<(), DocsError> {
        Arc::clone(&self.atlas).preload().await
    }

    async fn search(
        &self,
        pipeline: Option<&Arc<RetrievalPipeline>>,
        request: SearchRequest,
    ) -> Result<CallToolResult, McpError> {
        let Some(pipeline) = pipeline else {
            return failure(DocsError::DataUnavailable(
                "no vector index is configured for this search".to_string(),
            ));
        };
        let options = self.options(&request);
        match pipeline.retrieve(&request.query, options).await {
            Ok(outcome) => {
                let mut content = vec![Content::text(outcome.context.clone())];
                if outcome.is_degraded() {
                    content.push(Content::text(
                        json!({ "rerank": outcome.rerank }).to_string(),
                    ));
                }
                Ok(CallToolResult::success(content))
            }
            Err(e) => failure(e),
        }
    }

    #[tool(description = "List every module, class or method name in the API atlas")]
    pub async fn list_entities(
        &self,
        #[tool(aggr)] ListEntitiesRequest { kind }: ListEntitiesRequest,
    ) -> Result<CallToolResult, McpError> {
        let kind = parse_kind(&kind)?;
        if let Err(e) = self.atlas_ready().await {
            return failure(e);
        }
        match self.atlas.list_entities(kind) {
            Ok(listing) => Ok(CallToolResult::success(vec![Content::text(listing.to_string())])),
            Err(e) => failure(e),
        }
    }

    #[tool(description = "Find the modules, classes or methods whose names best match an approximate name")]
    pub async fn resolve_entity(
        &self,
        #[tool(aggr)] ResolveEntityRequest { kind, query, threshold, max_results }: ResolveEntityRequest,
    ) -> Result<CallToolResult, McpError> {
        let kind = parse_kind(&kind)?;
        let threshold = threshold.unwrap_or(DEFAULT_THRESHOLD);
        let max_results = max_results.unwrap_or(DEFAULT_MAX_RESULTS);
        if let Err(e) = self.atlas_ready().await {
            return failure(e);
        }

        let candidates = match self.atlas.resolve(kind, &query, threshold, max_results) {
            Ok(candidates) => candidates,
            Err(e) => return failure(e),
        };
        if candidates.is_empty() {
            return failure(DocsError::not_found(kind, query));
        }

        let records: Vec<_> = candidates
            .iter()
            .map(|c| {
                json!({
                    "key": c.key,
                    "full_name": c.entity.full_name,
                    "score": c.score,
                })
            })
            .collect();

        let response = json!({
            "kind": kind,
            "query": query,
            "matches": records,
        });

        Ok(CallToolResult::success(vec![Content::text(
            response.to_string(),
        )]))
    }

    #[tool(description = "Get the detail of one or more modules, classes or methods, resolving approximate names")]
    pub async fn get_entity_detail(
        &self,
        #[tool(aggr)] EntityDetailRequest { kind, names }: EntityDetailRequest,
    ) -> Result<CallToolResult, McpError> {
        let kind = parse_kind(&kind)?;
        let names = parse_names(&names).map_err(to_mcp_error)?;
        if names.is_empty() {
            return Err(McpError::invalid_params("at least one name is required", None));
        }
        if let Err(e) = self.atlas_ready().await {
            return failure(e);
        }

        let batch = match self.atlas.entity_details(kind, &names) {
            Ok(batch) => batch,
            Err(e) => return failure(e),
        };

        let details: Vec<_> = batch.succeeded.iter().map(|(_, detail)| detail).collect();
        let errors: Vec<_> = batch
            .failed
            .iter()
            .map(|(name, e)| json!({ "name": name, "message": e.to_string() }))
            .collect();

        let response = json!({
            "kind": kind,
            "requested": batch.len(),
            "found": details.len(),
            "details": details,
            "errors": errors,
        });

        if batch.succeeded.is_empty() {
            return Ok(CallToolResult::error(vec![Content::text(response.to_string())]));
        }
        Ok(CallToolResult::success(vec![Content::text(response.to_string())]))
    }

    #[tool(description = "Search code examples relevant to a natural-language request")]
    pub async fn search_code_examples(
        &self,
        #[tool(aggr)] request: SearchRequest,
    ) -> Result<CallToolResult, McpError> {
        self.search(self.code_search.as_ref(), request).await
    }

    #[tool(description = "Search the API documentation for passages relevant to a natural-language request")]
    pub async fn search_documentation(
        &self,
        #[tool(aggr)] request: SearchRequest,
    ) -> Result<CallToolResult, McpError> {
        self.search(self.doc_search.as_ref(), request).await
    }
}


#[tool(tool_box)]
impl ServerHandler for DocsServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some("This server answers questions about a UI framework's API. Use 'list_entities' to browse modules, classes or methods, 'resolve_entity' to map an approximate name to canonical ones, 'get_entity_detail' for full records, and 'search_code_examples' or 'search_documentation' for relevant snippets.".to_string()),
        }
    }
}
