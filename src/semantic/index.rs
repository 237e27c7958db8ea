//! In-memory vector index with inner-product search.
//!
//! Stores found-item embeddings in insertion order. Position `i` here is
//! always position `i` in the metadata store.

/// In-memory, append-only vector index.
///
/// All stored vectors are unit-norm, so the inner product used for ranking
/// is the cosine similarity.
pub struct VectorIndex {
    /// Embeddings by position
    vectors: Vec<Vec<f32>>,
    /// Expected embedding dimensions
    dimensions: usize,
}

/// Search hit from the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Insertion position
    pub position: usize,
    /// Inner product with the query, within [-1.0, 1.0]
    pub similarity: f32,
}

/// Tolerance for "is this vector unit length".
const UNIT_NORM_TOLERANCE: f32 = 1e-3;

impl VectorIndex {
    /// Create a new empty vector index with specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            vectors: Vec::new(),
            dimensions,
        }
    }

    /// Create an index with pre-allocated capacity.
    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            vectors: Vec::with_capacity(capacity),
            dimensions,
        }
    }

    /// Get the expected embedding dimensions.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Get the number of stored vectors.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Validate a vector without storing it.
    ///
    /// `insert` cannot fail on a vector that passed this check, which lets
    /// callers verify first, persist the record, then mutate the index.
    pub fn check(&self, embedding: &[f32]) -> Result<(), IndexError> {
        if embedding.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }

        if embedding.iter().any(|x| !x.is_finite()) {
            return Err(IndexError::NonFiniteValue);
        }

        let norm = l2_norm(embedding);
        if norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        if (norm - 1.0).abs() > UNIT_NORM_TOLERANCE {
            return Err(IndexError::NotNormalized(norm));
        }

        Ok(())
    }

    /// Append a vector and return its position.
    pub fn insert(&mut self, embedding: Vec<f32>) -> Result<usize, IndexError> {
        self.check(&embedding)?;
        self.vectors.push(embedding);
        Ok(self.vectors.len() - 1)
    }

    /// Return up to `k` positions ranked by inner product with `query`.
    ///
    /// `k` is clamped to the number of stored vectors; an empty index yields
    /// an empty list. Equal similarities keep insertion order.
    pub fn query(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, IndexError> {
        self.check(query)?;

        if self.vectors.is_empty() || k == 0 {
            return Ok(vec![]);
        }

        let mut results: Vec<SearchResult> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| SearchResult {
                position,
                similarity: dot(query, vector).clamp(-1.0, 1.0),
            })
            .collect();

        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.position.cmp(&b.position))
        });

        results.truncate(k.min(self.vectors.len()));

        Ok(results)
    }

    /// Iterate over all vectors in position order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &[f32]> {
        self.vectors.iter().map(Vec::as_slice)
    }
}

/// Compute L2 norm of a vector.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,

    #[error("Vector contains NaN or infinite values")]
    NonFiniteValue,

    #[error("Vector is not unit length (norm {0})")]
    NotNormalized(f32),
}
