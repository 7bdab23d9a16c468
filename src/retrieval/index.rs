//! Read-only vector index over precomputed document embeddings.
//!
//! An index directory holds a single `index.json` written by the offline
//! indexing job:
//!
//! ```json
//! { "dimension": 3, "metric": "l2",
//!   "documents": [ { "content": "...", "metadata": {}, "embedding": [0.1, 0.2, 0.3] } ] }
//! ```
//!
//! Search is exact. Distances always sort ascending, most similar first.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DocsError, DocsResult};

pub const INDEX_FILE: &str = "index.json";

/// A retrievable unit of text with free-form metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// String metadata value, if present and non-empty
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn meta_i64(&self, key: &str) -> Option<i64> {
        self.metadata.get(key).and_then(Value::as_i64)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    #[serde(alias = "euclidean")]
    L2,
    /// Reported as the negated dot product so smaller is still closer
    #[serde(alias = "ip", alias = "dot")]
    InnerProduct,
}

impl DistanceMetric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            DistanceMetric::InnerProduct => -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
        }
    }
}

#[derive(Deserialize)]
struct IndexFile {
    dimension: usize,
    #[serde(default)]
    metric: DistanceMetric,
    documents: Vec<IndexedDocument>,
}

#[derive(Deserialize)]
struct IndexedDocument {
    content: String,
    #[serde(default)]
    metadata: Map<String, Value>,
    embedding: Vec<f32>,
}

/// Immutable, fully in-memory nearest-neighbour index
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    metric: DistanceMetric,
    documents: Vec<Document>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Load `index.json` from an index directory.
    pub fn load(dir: impl AsRef<Path>) -> DocsResult<Self> {
        let path = dir.as_ref().join(INDEX_FILE);
        let file = File::open(&path)
            .map_err(|e| DocsError::IndexLoad(format!("{}: {}", path.display(), e)))?;
        let parsed: IndexFile = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| DocsError::IndexLoad(format!("{}: {}", path.display(), e)))?;

        let entries = parsed
            .documents
            .into_iter()
            .map(|d| {
                (
                    Document {
                        content: d.content,
                        metadata: d.metadata,
                    },
                    d.embedding,
                )
            })
            .collect();
        Self::from_parts(parsed.dimension, parsed.metric, entries)
    }

    /// Build an index from documents and their embeddings
    pub fn from_parts(
        dimension: usize,
        metric: DistanceMetric,
        entries: Vec<(Document, Vec<f32>)>,
    ) -> DocsResult<Self> {
        if dimension == 0 {
            return Err(DocsError::IndexLoad("index dimension must be positive".to_string()));
        }
        let mut documents = Vec::with_capacity(entries.len());
        let mut vectors = Vec::with_capacity(entries.len());
        for (position, (document, vector)) in entries.into_iter().enumerate() {
            if vector.len() != dimension {
                return Err(DocsError::IndexLoad(format!(
                    "document {} has {} dimensions, index declares {}",
                    position,
                    vector.len(),
                    dimension
                )));
            }
            documents.push(document);
            vectors.push(vector);
        }
        Ok(Self {
            dimension,
            metric,
            documents,
            vectors,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// The `k` documents closest to `query`, ordered by increasing distance.
    /// Equal distances keep index order.
    pub fn search(&self, query: &[f32], k: usize) -> DocsResult<Vec<(Document, f32)>> {
        if query.len() != self.dimension {
            return Err(DocsError::InvalidInput(format!(
                "query vector has {} dimensions, index expects {}",
                query.len(),
                self.dimension
            )));
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, self.metric.distance(query, v)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, distance)| (self.documents[i].clone(), distance))
            .collect())
    }
}

/// Index handle that loads its directory once on first use.
///
/// A failed load is remembered: every later search reports
/// `IndexUnavailable` instead of an empty result.
pub struct LazyIndex {
    dir: Option<PathBuf>,
    cell: OnceLock<Result<Arc<VectorIndex>, String>>,
}

impl LazyIndex {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: Some(dir.as_ref().to_path_buf()),
            cell: OnceLock::new(),
        }
    }

    /// Handle around an index that is already in memory
    pub fn loaded(index: VectorIndex) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(Ok(Arc::new(index)));
        Self { dir: None, cell }
    }

    pub fn get(&self) -> DocsResult<Arc<VectorIndex>> {
        let loaded = self.cell.get_or_init(|| {
            let Some(dir) = &self.dir else {
                return Err("no index directory configured".to_string());
            };
            match VectorIndex::load(dir) {
                Ok(index) => {
                    tracing::info!(
                        dir = %dir.display(),
                        documents = index.len(),
                        dimension = index.dimension(),
                        "Loaded vector index"
                    );
                    Ok(Arc::new(index))
                }
                Err(e) => {
                    tracing::error!("Failed to load vector index from {}: {}", dir.display(), e);
                    Err(e.to_string())
                }
            }
        });

        loaded
            .clone()
            .map_err(DocsError::IndexUnavailable)
    }

    pub fn search(&self, query: &[f32], k: usize) -> DocsResult<Vec<(Document, f32)>> {
        self.get()?.search(query, k)
    }
}
