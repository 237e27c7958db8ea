use crate::{
    app::App,
    config::{Config, StoreBackend},
    context::CategoryGraph,
    errors::MatchError,
    items::{CsvStore, InMemoryStore, RecordStore},
    semantic::{
        Embedder, EmbeddingModel, HybridScorer, RetrievalOptions, RetrievalService,
        VectorSnapshot,
    },
};
use anyhow::{Context, Result};
use homedir::my_home;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const BASE_PATH_ENV: &str = "LOSTFOUND_BASE_PATH";

/// Where the application keeps its files.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: PathBuf,
}

/// Application factory for creating and configuring application components
pub struct AppFactory;

impl AppFactory {
    /// Get application paths, creating the base directory
    pub fn get_paths() -> Result<AppPaths> {
        let base_path = Self::get_base_path()?;

        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Ok(AppPaths { base_path })
    }

    /// `$LOSTFOUND_BASE_PATH`, or `~/.local/share/lostfound`
    fn get_base_path() -> Result<PathBuf> {
        if let Ok(base_path) = std::env::var(BASE_PATH_ENV) {
            return Ok(PathBuf::from(base_path));
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;

        Ok(home.join(".local/share/lostfound"))
    }

    pub fn load_config(paths: &AppPaths) -> Result<Config> {
        Config::load_with(&paths.base_path).context("Failed to load configuration")
    }

    /// Load the configured embedding model. Blocks until the model is
    /// downloaded and ready.
    pub fn create_embedder(config: &Config) -> Result<Box<dyn Embedder>> {
        let model = EmbeddingModel::new(
            &config.semantic.model,
            config.base_path().to_path_buf(),
            Some(Duration::from_secs(config.semantic.download_timeout_secs)),
        )
        .map_err(|e| MatchError::ModelUnavailable(e.to_string()))?;

        Ok(Box::new(model))
    }

    /// Create the record store selected in the config
    pub fn create_store(config: &Config) -> Result<Box<dyn RecordStore>> {
        match config.store.backend {
            StoreBackend::Csv => {
                let store = CsvStore::open(&config.items_path())
                    .context("Failed to open item store")?;
                Ok(Box::new(store))
            }
            StoreBackend::Memory => Ok(Box::new(InMemoryStore::new())),
        }
    }

    /// Build the retrieval service around `embedder`. Nothing is loaded
    /// from the store yet.
    pub fn create_service(config: &Config, embedder: Box<dyn Embedder>) -> Result<RetrievalService> {
        let store = Self::create_store(config)?;

        // vectors of a memory store die with the process, caching them is pointless
        let snapshot = match config.store.backend {
            StoreBackend::Csv => Some(VectorSnapshot::new(config.snapshot_path())),
            StoreBackend::Memory => None,
        };

        let scorer = HybridScorer::new(config.scoring.clone())?;
        let options = RetrievalOptions {
            over_fetch_factor: config.retrieval.over_fetch_factor,
            snapshot_every: config.store.snapshot_every,
        };

        Ok(RetrievalService::new(embedder, store, snapshot, scorer, options))
    }

    /// Build the application and replay stored items into the index.
    ///
    /// With `rebuild` the vector snapshot is discarded first so every
    /// item is embedded again.
    pub fn create_app_with(config: Config, embedder: Box<dyn Embedder>, rebuild: bool) -> Result<App> {
        if rebuild {
            let snapshot = VectorSnapshot::new(config.snapshot_path());
            snapshot
                .delete()
                .with_context(|| format!("Failed to delete {}", snapshot.path().display()))?;
            log::info!("Vector snapshot removed, rebuilding embeddings");
        }

        let service = Self::create_service(&config, embedder)?;
        log::info!(
            "Model '{}' with {} store",
            service.model_name(),
            service.store_kind()
        );
        let report = service.restore().context("Failed to restore items")?;
        log::debug!("restore report: {report:?}");

        let context = CategoryGraph::from_relations(&config.category_relations);
        if context.is_empty() {
            log::info!("No category_relations configured, searches will carry no inferred context");
        }

        Ok(App {
            config,
            service: Arc::new(service),
            context,
        })
    }

    /// Create the application from the environment: paths, config and the
    /// real embedding model.
    pub fn create_app(rebuild: bool) -> Result<App> {
        let paths = Self::get_paths()?;
        let config = Self::load_config(&paths)?;
        let embedder = Self::create_embedder(&config)?;

        log::info!("Using base path {}", paths.base_path.display());

        Self::create_app_with(config, embedder, rebuild)
    }
}
