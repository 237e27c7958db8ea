use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::storage;

const CONFIG_FILE: &str = "config.yaml";
const ITEMS_FILE: &str = "items.csv";
const SNAPSHOT_FILE: &str = "vectors.bin";

/// Default embedding model (multilingual, 384 dimensions)
const DEFAULT_SEMANTIC_MODEL: &str = "paraphrase-multilingual-minilm-l12-v2";
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

const DEFAULT_EMBEDDING_WEIGHT: f32 = 0.70;
const DEFAULT_LEXICAL_WEIGHT: f32 = 0.30;
const DEFAULT_CATEGORY_POINTS: f32 = 5.0;

const DEFAULT_OVER_FETCH_FACTOR: usize = 2;
const DEFAULT_LIMIT: usize = 10;
const DEFAULT_MAX_LIMIT: usize = 100;

/// Save the vector snapshot after this many inserts
const DEFAULT_SNAPSHOT_EVERY: usize = 10;

const DEFAULT_LISTEN: &str = "0.0.0.0:8000";

/// Allowed drift of `embedding_weight + lexical_weight` from 1.0
const WEIGHT_SUM_TOLERANCE: f32 = 1e-3;

/// Configuration for the embedding model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SemanticConfig {
    /// Model name for embeddings (e.g., "paraphrase-multilingual-minilm-l12-v2")
    #[serde(default = "default_semantic_model")]
    pub model: String,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_SEMANTIC_MODEL.to_string(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

fn default_semantic_model() -> String {
    DEFAULT_SEMANTIC_MODEL.to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

/// How category agreement enters the final score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CategoryTerm {
    /// Add a fixed number of points on a category match
    Additive { points: f32 },
    /// Multiply the weighted sum on a category match
    Multiplicative { factor: f32 },
}

impl Default for CategoryTerm {
    fn default() -> Self {
        CategoryTerm::Additive {
            points: DEFAULT_CATEGORY_POINTS,
        }
    }
}

/// One breakpoint of the cosine → embedding score calibration curve.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub cosine: f32,
    pub score: f32,
}

impl CalibrationPoint {
    pub const fn new(cosine: f32, score: f32) -> Self {
        Self { cosine, score }
    }
}

/// Weights and curve for hybrid scoring.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_embedding_weight")]
    pub embedding_weight: f32,

    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f32,

    #[serde(default)]
    pub category: CategoryTerm,

    /// Piecewise-linear breakpoints, strictly increasing in cosine
    #[serde(default = "default_calibration")]
    pub calibration: Vec<CalibrationPoint>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            embedding_weight: DEFAULT_EMBEDDING_WEIGHT,
            lexical_weight: DEFAULT_LEXICAL_WEIGHT,
            category: CategoryTerm::default(),
            calibration: default_calibration(),
        }
    }
}

fn default_embedding_weight() -> f32 {
    DEFAULT_EMBEDDING_WEIGHT
}

fn default_lexical_weight() -> f32 {
    DEFAULT_LEXICAL_WEIGHT
}

/// Expands the high end of the cosine range, compresses the low end.
fn default_calibration() -> Vec<CalibrationPoint> {
    vec![
        CalibrationPoint::new(-1.0, 0.0),
        CalibrationPoint::new(0.0, 0.0),
        CalibrationPoint::new(0.3, 40.0),
        CalibrationPoint::new(0.5, 60.0),
        CalibrationPoint::new(0.75, 80.0),
        CalibrationPoint::new(1.0, 100.0),
    ]
}

impl ScoringConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let (we, wl) = (self.embedding_weight, self.lexical_weight);
        if !we.is_finite() || !wl.is_finite() || we < 0.0 || wl < 0.0 {
            bail!("scoring weights must be non-negative numbers, got {we} and {wl}");
        }
        if (we + wl - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            bail!(
                "scoring.embedding_weight + scoring.lexical_weight must equal 1.0, got {}",
                we + wl
            );
        }

        match self.category {
            CategoryTerm::Additive { points } => {
                if !points.is_finite() || !(0.0..=100.0).contains(&points) {
                    bail!("scoring.category.points must be between 0 and 100, got {points}");
                }
            }
            CategoryTerm::Multiplicative { factor } => {
                if !factor.is_finite() || factor < 1.0 {
                    bail!("scoring.category.factor must be at least 1.0, got {factor}");
                }
            }
        }

        if self.calibration.len() < 2 {
            bail!("scoring.calibration needs at least two breakpoints");
        }

        for point in &self.calibration {
            if !(-1.0..=1.0).contains(&point.cosine) {
                bail!(
                    "scoring.calibration cosine must be within [-1, 1], got {}",
                    point.cosine
                );
            }
            if !(0.0..=100.0).contains(&point.score) {
                bail!(
                    "scoring.calibration score must be within [0, 100], got {}",
                    point.score
                );
            }
        }

        for pair in self.calibration.windows(2) {
            if pair[1].cosine <= pair[0].cosine {
                bail!("scoring.calibration breakpoints must be strictly increasing in cosine");
            }
            if pair[1].score < pair[0].score {
                bail!("scoring.calibration scores must not decrease as cosine increases");
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Candidates fetched per requested result
    #[serde(default = "default_over_fetch_factor")]
    pub over_fetch_factor: usize,

    /// Limit used when a search request does not name one
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Upper bound for requested limits
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            over_fetch_factor: DEFAULT_OVER_FETCH_FACTOR,
            default_limit: DEFAULT_LIMIT,
            max_limit: DEFAULT_MAX_LIMIT,
        }
    }
}

fn default_over_fetch_factor() -> usize {
    DEFAULT_OVER_FETCH_FACTOR
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_max_limit() -> usize {
    DEFAULT_MAX_LIMIT
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Append-only items.csv in the base directory
    #[default]
    Csv,
    /// Process-lifetime only
    Memory,
}

impl StoreBackend {
    /// Whether records outlive the process.
    pub fn is_durable(&self) -> bool {
        matches!(self, StoreBackend::Csv)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Write the vector snapshot after this many inserts (0 disables)
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            snapshot_every: DEFAULT_SNAPSHOT_EVERY,
        }
    }
}

fn default_snapshot_every() -> usize {
    DEFAULT_SNAPSHOT_EVERY
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub semantic: SemanticConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,

    /// Category → related categories, returned as search context
    #[serde(default)]
    pub category_relations: BTreeMap<String, Vec<String>>,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.semantic.model.trim().is_empty() {
            bail!("semantic.model must not be empty");
        }
        if self.semantic.download_timeout_secs == 0 {
            bail!("semantic.download_timeout_secs must be greater than 0");
        }

        self.scoring.validate()?;

        let retrieval = &self.retrieval;
        if retrieval.over_fetch_factor == 0 {
            bail!("retrieval.over_fetch_factor must be at least 1");
        }
        if retrieval.default_limit == 0 {
            bail!("retrieval.default_limit must be greater than 0");
        }
        if retrieval.max_limit < retrieval.default_limit {
            bail!(
                "retrieval.max_limit ({}) must not be below retrieval.default_limit ({})",
                retrieval.max_limit,
                retrieval.default_limit
            );
        }

        self.server
            .listen
            .parse::<SocketAddr>()
            .with_context(|| format!("server.listen is not a socket address: {}", self.server.listen))?;

        for (category, related) in &self.category_relations {
            if category.trim().is_empty() || related.iter().any(|r| r.trim().is_empty()) {
                bail!("category_relations must not contain empty category names");
            }
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults first
    /// if needed.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        storage::ensure_dir(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;

        let config_path = base_path.join(CONFIG_FILE);

        if !config_path.exists() {
            log::info!("Writing default config to {}", config_path.display());
            let default = serde_yml::to_string(&Self::default())?;
            storage::write_atomic(&config_path, default.as_bytes())?;
        }

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("config is malformed: {}", config_path.display()))?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_str = serde_yml::to_string(&self)?;
        storage::write_atomic(&self.base_path.join(CONFIG_FILE), config_str.as_bytes())
            .context("failed to save config")
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn items_path(&self) -> PathBuf {
        self.base_path.join(ITEMS_FILE)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.base_path.join(SNAPSHOT_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_load_creates_default_file() {
        let tmp = tempfile::tempdir().unwrap();

        let config = Config::load_with(tmp.path()).unwrap();

        assert!(tmp.path().join(CONFIG_FILE).exists());
        assert_eq!(config.semantic.model, DEFAULT_SEMANTIC_MODEL);
        assert_eq!(config.store.backend, StoreBackend::Csv);
        assert_eq!(config.items_path(), tmp.path().join(ITEMS_FILE));
    }

    #[test]
    fn test_load_roundtrips_custom_values() {
        let tmp = tempfile::tempdir().unwrap();
        let yaml = r#"
scoring:
  embedding_weight: 0.9
  lexical_weight: 0.1
  category:
    kind: multiplicative
    factor: 1.05
store:
  backend: memory
category_relations:
  Wallet: [ID Card, Cash]
"#;
        std::fs::write(tmp.path().join(CONFIG_FILE), yaml).unwrap();

        let config = Config::load_with(tmp.path()).unwrap();

        assert_eq!(config.scoring.embedding_weight, 0.9);
        assert_eq!(
            config.scoring.category,
            CategoryTerm::Multiplicative { factor: 1.05 }
        );
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.retrieval, RetrievalConfig::default());
        assert_eq!(
            config.category_relations.get("Wallet"),
            Some(&vec!["ID Card".to_string(), "Cash".to_string()])
        );

        // missing sections are written back on load
        let rewritten = std::fs::read_to_string(tmp.path().join(CONFIG_FILE)).unwrap();
        assert!(rewritten.contains("over_fetch_factor"));
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut scoring = ScoringConfig::default();
        scoring.embedding_weight = 0.7;
        scoring.lexical_weight = 0.2;
        assert!(scoring.validate().is_err());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut scoring = ScoringConfig::default();
        scoring.embedding_weight = 1.2;
        scoring.lexical_weight = -0.2;
        assert!(scoring.validate().is_err());
    }

    #[test]
    fn test_calibration_must_be_monotonic() {
        let mut scoring = ScoringConfig::default();
        scoring.calibration = vec![
            CalibrationPoint::new(0.0, 50.0),
            CalibrationPoint::new(0.5, 40.0),
        ];
        assert!(scoring.validate().is_err());

        scoring.calibration = vec![
            CalibrationPoint::new(0.5, 10.0),
            CalibrationPoint::new(0.5, 40.0),
        ];
        assert!(scoring.validate().is_err());

        scoring.calibration = vec![CalibrationPoint::new(0.0, 0.0)];
        assert!(scoring.validate().is_err());
    }

    #[test]
    fn test_multiplicative_factor_below_one_rejected() {
        let mut scoring = ScoringConfig::default();
        scoring.category = CategoryTerm::Multiplicative { factor: 0.9 };
        assert!(scoring.validate().is_err());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "retrieval:\n  default_limit: 0\n",
        )
        .unwrap();

        assert!(Config::load_with(tmp.path()).is_err());
    }

    #[test]
    fn test_invalid_listen_address() {
        let mut config = Config::default();
        config.server.listen = "not an address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_only_csv_backend_is_durable() {
        assert!(StoreBackend::Csv.is_durable());
        assert!(!StoreBackend::Memory.is_durable());
    }
}
