//! Semantic retrieval: embedding search over a persisted vector index,
//! optional reranking, and size-bounded context assembly.

pub mod context;
pub mod embedder;
pub mod index;
pub mod pipeline;
pub mod reranker;

pub use context::Corpus;
pub use embedder::{Embedder, HttpEmbedder};
pub use index::{DistanceMetric, Document, LazyIndex, VectorIndex};
pub use pipeline::{RerankStatus, RetrievalOutcome, RetrievalPipeline, ScoreKind, ScoredDocument};
pub use reranker::{HttpReranker, RerankHit, Reranker};
