//! Pinecone vector store integration.

pub mod client;
pub mod types;

pub use client::{IndexConnection, PineconeService, VectorIndex};
pub use types::{IndexDescription, PineconeError, QueryMatch, VectorRecord};
