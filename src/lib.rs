#![deny(missing_docs)]

//! Core library for the docvec PDF ingestion and retrieval service.

/// HTTP routing and REST handlers.
pub mod api;
/// Chat completion client abstraction and adapters.
pub mod completion;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Concurrent page text extraction.
pub mod extraction;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion metrics helpers.
pub mod metrics;
/// Pinecone vector index integration.
pub mod pinecone;
/// Document processing pipeline and ingestion service.
pub mod processing;
