//! # Omni Docs MCP Server
//!
//! A Model-Context-Provider (MCP) server that helps an agent find its way
//! around a UI framework's Python API: which modules, classes and methods
//! exist, and which code examples or documentation passages are relevant to
//! a request.
//!
//! ## Features
//!
//! - Fuzzy resolution of approximate or misspelled API names against an atlas
//!   of modules, classes and methods
//! - Entity detail lookups in batch, with per-name success or failure
//! - Semantic search over code examples and documentation: embedding search,
//!   optional reranking, and size-bounded context assembly
//!
//! ## Modules
//!
//! - `atlas`: entity table, similarity scoring and name resolution
//! - `retrieval`: vector index, embedding/reranking clients and the retrieval pipeline
//! - `input`: normalization of flexible name parameters
//! - `server`: MCP server implementation and tools

/// Entity atlas and fuzzy name resolution
pub mod atlas;
/// Service configuration and defaults
pub mod config;
/// Error taxonomy
pub mod error;
/// Tool parameter normalization
pub mod input;
/// Semantic retrieval pipeline
pub mod retrieval;
/// Server implementation and MCP tools
pub mod server;
