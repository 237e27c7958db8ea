//! Embedding model wrapper for fastembed.
//!
//! Provides a high-level interface for generating embeddings:
//! - Eager model loading with configurable cache directory
//! - L2-normalized output so inner product equals cosine similarity
//! - Multilingual models for mixed-script descriptions

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::time::Duration;

/// Default download timeout for model files (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Anything that turns text into a fixed-length unit vector.
///
/// The retrieval service only talks to this trait, so tests can swap in a
/// deterministic embedder without downloading a model.
pub trait Embedder: Send + Sync {
    /// Model name, also used to key the vector snapshot.
    fn name(&self) -> &str;

    /// Length of every vector returned by `embed`.
    fn dimensions(&self) -> usize;

    /// Embed a single (already normalized) text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// SHA256 of the model name for snapshot identification.
    fn model_id(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.name().as_bytes());
        hasher.finalize().into()
    }
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct EmbeddingModel {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

impl EmbeddingModel {
    /// Load the embedding model with the given name.
    ///
    /// Blocks until the model is downloaded (first run) and loaded.
    /// Models are cached in the `models/` subdirectory of `cache_dir`.
    ///
    /// # Arguments
    /// * `model_name` - Name of the model (e.g., "paraphrase-multilingual-minilm-l12-v2")
    /// * `cache_dir` - Directory to cache downloaded models
    /// * `download_timeout` - Optional timeout for model download
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        download_timeout: Option<Duration>,
    ) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(model_name)?;
        let timeout = download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        log::info!(
            "Loading embedding model '{}' (download timeout {}s)",
            model_name,
            timeout.as_secs()
        );

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let mut model = run_with_timeout(timeout, move || {
            TextEmbedding::try_new(options).map_err(|e| EmbeddingError::InitFailed(e.to_string()))
        })??;

        let dimensions = Self::measure_dimensions(&mut model)?;
        log::info!("Embedding model '{}' ready ({} dimensions)", model_name, dimensions);

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    /// Parse model name string to fastembed enum.
    fn parse_model_name(
        name: &str,
    ) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "paraphrase-multilingual-minilm-l12-v2" | "paraphrasemlminilml12v2" => {
                Ok(fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2)
            }
            "paraphrase-multilingual-minilm-l12-v2-q" | "paraphrasemlminilml12v2q" => {
                Ok(fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2Q)
            }
            "paraphrase-multilingual-mpnet-base-v2" | "paraphrasemlmpnetbasev2" => {
                Ok(fastembed::EmbeddingModel::ParaphraseMLMpnetBaseV2)
            }
            "all-minilm-l6-v2" | "allminiml6v2" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2)
            }
            "bge-small-en-v1.5" | "bgesmallenv15" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15)
            }
            "bge-base-en-v1.5" | "bgebaseenv15" => {
                Ok(fastembed::EmbeddingModel::BGEBaseENV15)
            }
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: paraphrase-multilingual-minilm-l12-v2 (-q), paraphrase-multilingual-mpnet-base-v2, all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                name
            ))),
        }
    }

    /// Embed a sample to determine embedding dimensions.
    fn measure_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to measure dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .filter(|len| *len > 0)
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }
}

impl Embedder for EmbeddingModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let embedding = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))?;

        if embedding.len() != self.dimensions {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "Model returned {} dimensions, expected {}",
                embedding.len(),
                self.dimensions
            )));
        }

        Ok(l2_normalize(embedding))
    }
}

/// Run `load` on a worker thread and give up after `timeout`.
///
/// A load that times out keeps running in the background; its result is
/// dropped.
fn run_with_timeout<T, F>(timeout: Duration, load: F) -> Result<T, EmbeddingError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();

    std::thread::Builder::new()
        .name("model-load".to_string())
        .spawn(move || {
            let _ = tx.send(load());
        })
        .map_err(|e| EmbeddingError::InitFailed(format!("Failed to spawn loader: {}", e)))?;

    match rx.recv_timeout(timeout) {
        Ok(value) => Ok(value),
        Err(RecvTimeoutError::Timeout) => Err(EmbeddingError::InitFailed(format!(
            "Model load timed out after {}s",
            timeout.as_secs()
        ))),
        Err(RecvTimeoutError::Disconnected) => Err(EmbeddingError::InitFailed(
            "Model loader exited without a result".to_string(),
        )),
    }
}

/// Scale a vector to unit length.
///
/// A zero (or non-finite) vector maps to the first basis vector so that
/// degenerate input such as an empty description still yields a valid
/// unit-norm embedding.
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();

    if !norm.is_finite() || norm < f32::EPSILON {
        v.iter_mut().for_each(|x| *x = 0.0);
        if let Some(first) = v.first_mut() {
            *first = 1.0;
        }
        return v;
    }

    v.iter_mut().for_each(|x| *x /= norm);
    v
}
