use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use omni_docs_mcp::config::{EndpointConfig, RetrievalOptions};
use omni_docs_mcp::error::{DocsError, DocsResult};
use omni_docs_mcp::retrieval::context::format_block;
use omni_docs_mcp::retrieval::{
    Corpus, DistanceMetric, Document, Embedder, HttpReranker, LazyIndex, RerankHit, RerankStatus,
    Reranker, RetrievalPipeline, ScoreKind, VectorIndex,
};

/// Embeds every query at the origin of a 1-d space
#[derive(Default)]
struct OriginEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for OriginEmbedder {
    async fn embed(&self, _text: &str) -> DocsResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0.0])
    }

    fn model_name(&self) -> &str {
        "origin"
    }
}

#[derive(Default)]
struct FailingEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> DocsResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DocsError::upstream("embedding", "connection refused"))
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

/// Answers in a 2-d space regardless of the index
#[derive(Default)]
struct PlaneEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for PlaneEmbedder {
    async fn embed(&self, _text: &str) -> DocsResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0.0, 0.0])
    }

    fn model_name(&self) -> &str {
        "plane"
    }
}

struct SlowEmbedder;

#[async_trait]
impl Embedder for SlowEmbedder {
    async fn embed(&self, _text: &str) -> DocsResult<Vec<f32>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(vec![0.0])
    }

    fn model_name(&self) -> &str {
        "slow"
    }
}

/// Ranks passages in reverse order, all with the same score
struct ReverseReranker;

#[async_trait]
impl Reranker for ReverseReranker {
    async fn rerank(&self, _query: &str, passages: &[String], top_k: usize) -> DocsResult<Vec<RerankHit>> {
        Ok((0..passages.len())
            .rev()
            .take(top_k)
            .map(|index| RerankHit { index, score: 0.5 })
            .collect())
    }

    fn model_name(&self) -> &str {
        "reverse"
    }
}

#[derive(Default)]
struct FailingReranker {
    calls: AtomicUsize,
}

#[async_trait]
impl Reranker for FailingReranker {
    async fn rerank(&self, _query: &str, _passages: &[String], _top_k: usize) -> DocsResult<Vec<RerankHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DocsError::UpstreamTimeout {
            service: "reranking".to_string(),
            timeout: Duration::from_secs(30),
        })
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

struct OutOfRangeReranker;

#[async_trait]
impl Reranker for OutOfRangeReranker {
    async fn rerank(&self, _query: &str, passages: &[String], _top_k: usize) -> DocsResult<Vec<RerankHit>> {
        Ok(vec![RerankHit { index: passages.len() + 3, score: 1.0 }])
    }

    fn model_name(&self) -> &str {
        "broken"
    }
}

/// Minimal HTTP server answering every request with `body`; returns its URL and a request counter
fn serve_json(body: &'static str) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/v1/ranking", listener.local_addr().unwrap());
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = requests.clone();

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut content_length = 0;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
            }
            let mut request_body = vec![0; content_length];
            let _ = reader.read_exact(&mut request_body);
            counter.fetch_add(1, Ordering::SeqCst);

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.flush();
        }
    });

    (url, requests)
}

/// A code example whose formatted block is exactly 300 characters
fn example(n: usize) -> Document {
    Document::new("x".repeat(253))
        .with_meta("file_path", format!("{n}.py"))
        .with_meta("function_name", format!("fn_{n}"))
}

/// `count` examples at distances 0.1, 0.2, ... from the origin
fn index_of(count: usize) -> Arc<LazyIndex> {
    let entries = (1..=count)
        .map(|n| (example(n), vec![n as f32 / 10.0]))
        .collect();
    Arc::new(LazyIndex::loaded(
        VectorIndex::from_parts(1, DistanceMetric::L2, entries).unwrap(),
    ))
}

fn names(outcome: &omni_docs_mcp::retrieval::RetrievalOutcome) -> Vec<String> {
    outcome
        .documents
        .iter()
        .map(|d| d.document.meta_str("function_name").unwrap().to_string())
        .collect()
}

fn options(top_k: usize, rerank_k: usize, use_rerank: bool, max_context_size: usize) -> RetrievalOptions {
    RetrievalOptions {
        top_k,
        rerank_k,
        use_rerank,
        max_context_size,
    }
}

#[test]
fn test_example_blocks_are_300_chars() {
    for n in 1..=9 {
        assert_eq!(format_block(Corpus::CodeExamples, n, &example(n)).chars().count(), 300);
    }
}

#[tokio::test]
async fn test_budget_stops_before_overflowing_block() {
    // Nine examples keep every block at 300 characters
    let pipeline = RetrievalPipeline::new(Corpus::CodeExamples, Arc::new(OriginEmbedder::default()), index_of(9))
        .with_reranker(Arc::new(ReverseReranker));

    let outcome = pipeline
        .retrieve("make a button", options(10, 3, true, 500))
        .await
        .unwrap();

    assert_eq!(outcome.documents.len(), 3);
    assert_eq!(outcome.included, 1);
    assert_eq!(outcome.omitted, 2);
    assert_eq!(outcome.context.chars().count(), 300);
    assert_eq!(outcome.context.matches("### Example").count(), 1);
}

#[tokio::test]
async fn test_context_never_exceeds_budget() {
    let pipeline = RetrievalPipeline::new(Corpus::CodeExamples, Arc::new(OriginEmbedder::default()), index_of(8));

    for max in [0, 1, 299, 300, 301, 599, 600, 901, 10_000] {
        let outcome = pipeline
            .retrieve("labels", options(8, 8, false, max))
            .await
            .unwrap();
        if outcome.included == 0 {
            assert_eq!(outcome.context, Corpus::CodeExamples.empty_message());
        } else {
            assert!(outcome.context.chars().count() <= max);
            assert_eq!(outcome.included, (max / 300).min(8));
        }
    }
}

#[tokio::test]
async fn test_rerank_order_is_applied() {
    let pipeline = RetrievalPipeline::new(Corpus::CodeExamples, Arc::new(OriginEmbedder::default()), index_of(5))
        .with_reranker(Arc::new(ReverseReranker));

    let outcome = pipeline
        .retrieve("slider", options(5, 3, true, 30_000))
        .await
        .unwrap();

    assert_eq!(outcome.rerank, RerankStatus::Applied);
    // Equal scores keep the reranker's order
    assert_eq!(names(&outcome), vec!["fn_5", "fn_4", "fn_3"]);
    assert!(outcome.documents.iter().all(|d| d.kind == ScoreKind::Relevance));
}

#[tokio::test]
async fn test_without_rerank_keeps_distance_order() {
    let pipeline = RetrievalPipeline::new(Corpus::CodeExamples, Arc::new(OriginEmbedder::default()), index_of(5))
        .with_reranker(Arc::new(ReverseReranker));

    let outcome = pipeline
        .retrieve("slider", options(5, 3, false, 30_000))
        .await
        .unwrap();

    assert_eq!(outcome.rerank, RerankStatus::Skipped);
    assert_eq!(names(&outcome), vec!["fn_1", "fn_2", "fn_3"]);
    assert!(outcome.documents[0].score < outcome.documents[1].score);
}

#[tokio::test]
async fn test_rerank_failure_falls_back_to_similarity_order() {
    let reranker = Arc::new(FailingReranker::default());
    let failing = RetrievalPipeline::new(Corpus::CodeExamples, Arc::new(OriginEmbedder::default()), index_of(6))
        .with_reranker(reranker.clone());
    let plain = RetrievalPipeline::new(Corpus::CodeExamples, Arc::new(OriginEmbedder::default()), index_of(6));

    let degraded = failing
        .retrieve("tree view", options(6, 4, true, 30_000))
        .await
        .unwrap();
    let baseline = plain
        .retrieve("tree view", options(6, 4, false, 30_000))
        .await
        .unwrap();

    assert!(degraded.is_degraded());
    assert!(matches!(degraded.rerank, RerankStatus::Fallback { .. }));
    assert_eq!(degraded.documents, baseline.documents);
    assert_eq!(degraded.context, baseline.context);
    // One retry, then fallback
    assert_eq!(reranker.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_out_of_range_rerank_hits_fall_back() {
    let pipeline = RetrievalPipeline::new(Corpus::CodeExamples, Arc::new(OriginEmbedder::default()), index_of(4))
        .with_reranker(Arc::new(OutOfRangeReranker));

    let outcome = pipeline
        .retrieve("menu", options(4, 2, true, 30_000))
        .await
        .unwrap();
    assert!(outcome.is_degraded());
    assert_eq!(names(&outcome), vec!["fn_1", "fn_2"]);
}

#[tokio::test]
async fn test_http_reranker_bad_index_falls_back_without_retry() {
    let (url, requests) = serve_json(r#"{"rankings":[{"index":99,"logit":1.0}]}"#);
    let reranker = HttpReranker::new(EndpointConfig {
        model: "test-reranker".to_string(),
        url,
        api_key: None,
        timeout: Duration::from_secs(5),
    })
    .unwrap();
    let pipeline = RetrievalPipeline::new(Corpus::CodeExamples, Arc::new(OriginEmbedder::default()), index_of(4))
        .with_reranker(Arc::new(reranker));

    let outcome = pipeline
        .retrieve("menu", options(4, 2, true, 30_000))
        .await
        .unwrap();

    assert!(outcome.is_degraded());
    assert_eq!(names(&outcome), vec!["fn_1", "fn_2"]);
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_embedding_dimension_mismatch_is_upstream_error() {
    let embedder = Arc::new(PlaneEmbedder::default());
    let pipeline = RetrievalPipeline::new(Corpus::CodeExamples, embedder.clone(), index_of(3));

    let err = pipeline
        .retrieve("window", RetrievalOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, DocsError::InvalidResponse { .. }));
    assert!(err.is_upstream());
    assert!(err.to_string().contains("2 dimensions"));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_timeout_reports_sub_second_duration() {
    let pipeline = RetrievalPipeline::new(Corpus::CodeExamples, Arc::new(SlowEmbedder), index_of(3))
        .with_upstream_timeout(Duration::from_millis(20));

    let err = pipeline
        .retrieve("window", RetrievalOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "embedding timed out after 20ms");
}

#[tokio::test]
async fn test_embedding_failure_is_fatal_after_one_retry() {
    let embedder = Arc::new(FailingEmbedder::default());
    let pipeline = RetrievalPipeline::new(Corpus::CodeExamples, embedder.clone(), index_of(3));

    let err = pipeline
        .retrieve("window", RetrievalOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_upstream());
    assert!(err.to_string().contains("connection refused"));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_embedding_timeout() {
    let pipeline = RetrievalPipeline::new(Corpus::CodeExamples, Arc::new(SlowEmbedder), index_of(3))
        .with_upstream_timeout(Duration::from_millis(20));

    let err = pipeline
        .retrieve("window", RetrievalOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DocsError::UpstreamTimeout { .. }));
}

#[tokio::test]
async fn test_deadline_aborts_whole_chain() {
    let pipeline = RetrievalPipeline::new(Corpus::CodeExamples, Arc::new(SlowEmbedder), index_of(3));

    let err = pipeline
        .retrieve_within("window", RetrievalOptions::default(), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, DocsError::DeadlineExceeded(50)));
}

#[tokio::test]
async fn test_invalid_input_makes_no_upstream_call() {
    let embedder = Arc::new(OriginEmbedder::default());
    let pipeline = RetrievalPipeline::new(Corpus::CodeExamples, embedder.clone(), index_of(3));

    let err = pipeline.retrieve("   ", RetrievalOptions::default()).await.unwrap_err();
    assert!(matches!(err, DocsError::InvalidInput(_)));

    let err = pipeline.retrieve("button", options(0, 3, false, 100)).await.unwrap_err();
    assert!(matches!(err, DocsError::InvalidInput(_)));

    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_index_is_unavailable() {
    let temp_dir = tempfile::tempdir().unwrap();
    let embedder = Arc::new(OriginEmbedder::default());
    let pipeline = RetrievalPipeline::new(
        Corpus::Documentation,
        embedder.clone(),
        Arc::new(LazyIndex::new(temp_dir.path().join("missing"))),
    );

    let err = pipeline.retrieve("button", RetrievalOptions::default()).await.unwrap_err();
    assert!(err.is_unavailable());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_index_returns_empty_message() {
    let index = VectorIndex::from_parts(1, DistanceMetric::L2, Vec::new()).unwrap();
    let pipeline = RetrievalPipeline::new(
        Corpus::Documentation,
        Arc::new(OriginEmbedder::default()),
        Arc::new(LazyIndex::loaded(index)),
    )
    .with_reranker(Arc::new(ReverseReranker));

    let outcome = pipeline.retrieve("button", RetrievalOptions::default()).await.unwrap();
    assert!(outcome.documents.is_empty());
    assert_eq!(outcome.rerank, RerankStatus::Skipped);
    assert_eq!(outcome.context, Corpus::Documentation.empty_message());
}

#[test]
fn test_documentation_block_format() {
    let doc = Document::new("Buttons fire `clicked_fn` when pressed.\n")
        .with_meta("title", "Button")
        .with_meta("source", "docs/widgets.md");
    let block = format_block(Corpus::Documentation, 2, &doc);

    assert_eq!(
        block,
        "### 2. Button\nSource: docs/widgets.md\n\nButtons fire `clicked_fn` when pressed.\n\n"
    );
}

#[test]
fn test_code_block_prefers_source_code_metadata() {
    let doc = Document::new("summary used for embedding")
        .with_meta("file_path", "demo/slider.py")
        .with_meta("class_name", "SliderDemo")
        .with_meta("line_number", 42)
        .with_meta("description", "Float slider bound to a model")
        .with_meta("source_code", "ui.FloatSlider(model)");
    let block = format_block(Corpus::CodeExamples, 1, &doc);

    assert_eq!(
        block,
        "### Example 1: SliderDemo\nFile: demo/slider.py:42\nDescription: Float slider bound to a model\n```python\nui.FloatSlider(model)\n```\n\n"
    );
}
