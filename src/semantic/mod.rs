//! Semantic matching of lost-item descriptions against found items.
//!
//! # Architecture
//!
//! - `normalize`: Text normalization shared by indexing and querying
//! - `embeddings`: `Embedder` trait and the fastembed-backed model
//! - `index`: In-memory vector index with inner-product search
//! - `metadata`: Item records aligned with index positions
//! - `lexical`: Word-set Jaccard keyword score
//! - `hybrid`: Calibrated, weighted combination of the signals
//! - `snapshot`: Binary file I/O for the vectors.bin cache
//! - `service`: Retrieval service tying the above together

pub mod embeddings;
pub mod hybrid;
mod index;
pub mod lexical;
mod metadata;
pub mod normalize;
mod service;
mod snapshot;

pub use embeddings::{Embedder, EmbeddingError, EmbeddingModel};
pub use hybrid::{HybridScorer, ScoreBreakdown};
pub use index::IndexError;
pub use service::{AddedItem, Match, RestoreReport, RetrievalOptions, RetrievalService};
pub use snapshot::VectorSnapshot;
