use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use homedir::my_home;

use crate::app::context::AppContext;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::llm::LlmClient;
use crate::search::SearchService;
use crate::semantic::{
    ClipEmbedder, EmbeddingProvider, IndexBuilder, ReconcileResult, VectorIndex, VectorStorage,
    VECTORS_FILE,
};

/// Application factory for creating and configuring application components
pub struct AppFactory;

impl AppFactory {
    /// Get application paths, creating the base directory
    pub fn get_paths() -> Result<AppPaths> {
        let base_path = Self::get_base_path()?;

        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Ok(AppPaths::new(base_path))
    }

    fn get_base_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("JEWEL_BASE_PATH") {
            return Ok(PathBuf::from(path));
        }

        let home = my_home()
            .map_err(|e| anyhow::anyhow!("Could not determine home directory: {e:?}"))?
            .context("Home directory path is empty")?;
        Ok(home.join(".local/share/jewel-search"))
    }

    pub fn create_config(paths: &AppPaths) -> Result<Config> {
        Config::load_with(&paths.base_path)
            .with_context(|| format!("Failed to load config from {}", paths.base_path.display()))
    }

    pub fn create_embedder(config: &Config, paths: &AppPaths) -> Result<Arc<ClipEmbedder>> {
        log::info!("loading embedding model '{}'", config.model.name);
        let timeout = Duration::from_secs(config.model.download_timeout_secs);
        let embedder = ClipEmbedder::new(&config.model.name, paths.base_path.clone(), Some(timeout))
            .context("Failed to initialize embedding model")?;
        Ok(Arc::new(embedder))
    }

    pub fn create_catalog(config: &Config) -> Result<Arc<Catalog>> {
        let catalog = Catalog::load(&config.data, &config.vocabulary.categories)
            .context("Failed to load catalog")?;
        Ok(Arc::new(catalog))
    }

    pub fn build_index(
        provider: &dyn EmbeddingProvider,
        catalog: &Catalog,
        config: &Config,
        paths: &AppPaths,
        show_progress: bool,
    ) -> Result<(VectorIndex, ReconcileResult)> {
        let storage = VectorStorage::new(paths.vectors_path.clone());
        IndexBuilder::new(provider, storage, config.model.batch_size)
            .show_progress(show_progress)
            .build(catalog)
            .context("Failed to build vector index")
    }

    pub fn create_llm(config: &Config) -> Result<Option<Arc<LlmClient>>> {
        let client = LlmClient::from_config(&config.llm).context("Failed to create LLM client")?;
        match &client {
            Some(c) => log::info!("vision model enabled ({})", c.model()),
            None => log::info!("vision model disabled, OCR and generated descriptions are off"),
        }
        Ok(client.map(Arc::new))
    }

    /// Wire config, model, catalog, index and language model together.
    pub fn create_context(show_progress: bool) -> Result<AppContext> {
        let paths = Self::get_paths()?;
        let config = Self::create_config(&paths)?;

        let embedder = Self::create_embedder(&config, &paths)?;
        let catalog = Self::create_catalog(&config)?;
        let (index, _) = Self::build_index(embedder.as_ref(), &catalog, &config, &paths, show_progress)?;
        let llm = Self::create_llm(&config)?;

        let mut service = SearchService::new(
            embedder,
            Arc::new(index),
            catalog,
            config.vocabulary.clone(),
            config.search.clone(),
        );
        if let Some(llm) = &llm {
            service = service.with_text_extractor(llm.clone());
        }

        let mut context = AppContext::new(Arc::new(service), Arc::new(config));
        if let Some(llm) = llm {
            context = context.with_describer(llm);
        }
        Ok(context)
    }
}

/// Application paths structure
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: PathBuf,
    pub vectors_path: PathBuf,
}

impl AppPaths {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        let base_path = base_path.as_ref().to_path_buf();
        Self {
            vectors_path: base_path.join(VECTORS_FILE),
            base_path,
        }
    }
}
