//! Chat orchestration: owns the index, the live generator and the model
//! manager, and is the only place the generator is replaced.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::Config;
use crate::embedder::{self, Embedder};
use crate::extractor;
use crate::generator::{ResponseGenerator, get_handler};
use crate::index::{EmbeddingIndex, RetrievalResult};
use crate::models::ModelManager;

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
    /// Distinct source filenames in retrieval order.
    pub sources: Vec<String>,
    pub response_time_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub provider: &'static str,
    pub current_model: String,
    pub backend_available: bool,
    pub installed_models: usize,
    pub total_chunks: usize,
}

pub struct ChatService {
    config_path: PathBuf,
    config: RwLock<Config>,
    index: EmbeddingIndex,
    generator: RwLock<Arc<ResponseGenerator>>,
    models: ModelManager,
}

impl ChatService {
    /// Load and validate the configuration, then build every component.
    pub async fn from_config_file(config_path: impl Into<PathBuf>) -> Result<Self> {
        let config_path = config_path.into();
        let config = Config::load(&config_path)?;
        config.validate().context("invalid configuration")?;

        let embedder = embedder::from_config(&config.embedding)
            .context("failed to initialize the embedding model")?;
        Self::new(config, config_path, embedder).await
    }

    /// Build the service around an explicit embedder.
    pub async fn new(
        config: Config,
        config_path: impl Into<PathBuf>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let index = EmbeddingIndex::open(&config, embedder).context("failed to open the index")?;
        let generator = get_handler(&config.llm).await;
        info!(
            "Response generator: {} ({})",
            generator.provider(),
            generator.current_model()
        );
        let config_path = config_path.into();
        let models = ModelManager::new(&config, config_path.clone());

        Ok(Self {
            config_path,
            config: RwLock::new(config),
            index,
            generator: RwLock::new(Arc::new(generator)),
            models,
        })
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    pub fn models(&self) -> &ModelManager {
        &self.models
    }

    pub async fn generator(&self) -> Arc<ResponseGenerator> {
        Arc::clone(&*self.generator.read().await)
    }

    /// Extract `path` and index it under `doc_id`. Returns the chunk count.
    pub async fn ingest_file(&self, doc_id: &str, path: &Path) -> Result<usize> {
        let limit = self.config.read().await.max_file_size_bytes();
        let size = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?
            .len();
        if size > limit {
            bail!(
                "{} is {size} bytes, larger than the {limit} byte upload limit",
                path.display()
            );
        }

        // Parsers are synchronous and can take a while on large files.
        let document = {
            let doc_id = doc_id.to_string();
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || extractor::extract_document(&doc_id, &path))
                .await
                .context("extraction task failed")??
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("doc_id".to_string(), doc_id.to_string());
        if let Some(name) = path.file_name() {
            metadata.insert("filename".to_string(), name.to_string_lossy().into_owned());
        }
        metadata.insert("media_type".to_string(), document.media_type.to_string());

        let count = self
            .index
            .add_document(&document.id, &document.raw_text, &metadata)
            .await?;
        Ok(count)
    }

    /// Retrieve, generate and report sources for one question.
    pub async fn chat(&self, query: &str) -> Result<ChatResponse> {
        let started = Instant::now();
        let top_k = self.config.read().await.search_top_k;

        let results = self.index.search(query, top_k).await?;
        let context = build_context(&results);
        let sources = collect_sources(&results);

        let generator = self.generator().await;
        let response = generator.generate(&context, query).await;

        Ok(ChatResponse {
            response,
            sources,
            response_time_secs: started.elapsed().as_secs_f64(),
        })
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let generator = self.generator().await;
        let backend_available = self.models.is_available().await;
        let installed_models = if backend_available {
            self.models.list_installed().await.len()
        } else {
            0
        };
        Ok(StatusReport {
            provider: generator.provider(),
            current_model: generator.current_model(),
            backend_available,
            installed_models,
            total_chunks: self.index.get_stats().await?.total_chunks,
        })
    }

    /// Log whether the local inference server answers and what it has installed.
    pub async fn check_backend(&self) {
        if !self.models.is_available().await {
            info!("Local inference server is not reachable");
            return;
        }
        let names: Vec<String> = self
            .models
            .list_installed()
            .await
            .into_iter()
            .map(|m| m.full_name)
            .collect();
        if names.is_empty() {
            warn!("Local inference server is up but has no models installed");
        } else {
            info!("Local inference server models: {}", names.join(", "));
        }
    }

    /// Persist `name` as the active model, reload the configuration and
    /// rebuild the generator from it. In-flight requests keep the old one.
    pub async fn activate_model(&self, name: &str) -> Result<Arc<ResponseGenerator>> {
        if !self.models.set_active(name) {
            bail!("could not persist {name} as the active model");
        }

        let reloaded = Config::load(&self.config_path)?;
        let rebuilt = Arc::new(get_handler(&reloaded.llm).await);
        if rebuilt.current_model() != name {
            warn!(
                "Active model is {} after rebuild (requested {name})",
                rebuilt.current_model()
            );
        }

        *self.config.write().await = reloaded;
        *self.generator.write().await = Arc::clone(&rebuilt);
        info!(
            "Generator rebuilt: {} ({})",
            rebuilt.provider(),
            rebuilt.current_model()
        );
        Ok(rebuilt)
    }
}

/// Retrieved contents separated by blank lines.
pub fn build_context(results: &[RetrievalResult]) -> String {
    results
        .iter()
        .map(|r| r.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Distinct `filename` metadata values, first occurrence first.
pub fn collect_sources(results: &[RetrievalResult]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for name in results.iter().filter_map(|r| r.metadata.get("filename")) {
        if !sources.contains(name) {
            sources.push(name.clone());
        }
    }
    sources
}
