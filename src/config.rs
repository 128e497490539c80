/// Configuration module for docrag.
///
/// Handles loading, validating, and providing default configuration values,
/// and the single in-place edit the model manager needs (switching the
/// active local model).
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

/// Startup-time configuration problems.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing configuration section: {0}")]
    MissingSection(String),
}

// ── Default value functions ──────────────────────────────────────────

fn default_documents_path() -> String {
    "./data/documents".to_string()
}

fn default_max_file_size_mb() -> u64 {
    50
}

fn default_embedding_backend() -> String {
    "onnx".to_string()
}

fn default_model_name() -> String {
    "multilingual-e5-small".to_string()
}

fn default_model_dir() -> String {
    "models/multilingual-e5-small".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_vector_db_path() -> String {
    "./data/vectors.db".to_string()
}

fn default_collection_name() -> String {
    "documents".to_string()
}

fn default_search_top_k() -> usize {
    5
}

fn default_provider() -> String {
    "template".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "mistral".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_generation_timeout_secs() -> u64 {
    180
}

fn default_probe_timeout_secs() -> u64 {
    3
}

fn default_remove_timeout_secs() -> u64 {
    30
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_gemini_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_gemini_timeout_secs() -> u64 {
    60
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub vector_db: VectorDbConfig,

    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,

    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_documents_path")]
    pub documents_path: String,

    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// `onnx` for the sentence encoder, `mock` for hash-based vectors.
    #[serde(default = "default_embedding_backend")]
    pub backend: String,

    #[serde(default = "default_model_name")]
    pub model_name: String,

    #[serde(default = "default_model_dir")]
    pub model_dir: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VectorDbConfig {
    #[serde(default = "default_vector_db_path")]
    pub path: String,

    #[serde(default = "default_collection_name")]
    pub collection_name: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    /// `template`, `gemini` or `ollama`. Anything else resolves to `template`.
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Absent section means the local backend is not configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ollama: Option<OllamaConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini: Option<GeminiConfig>,

    #[serde(default)]
    pub available_models: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub url: String,

    #[serde(default = "default_ollama_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_remove_timeout_secs")]
    pub remove_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GeminiConfig {
    #[serde(default = "default_gemini_model")]
    pub model: String,

    /// Name of the environment variable holding the API key.
    #[serde(default = "default_gemini_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    #[serde(default = "default_gemini_timeout_secs")]
    pub timeout_secs: u64,
}

/// One entry of the static catalog of installable local models.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CatalogEntry {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub size: String,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            vector_db: VectorDbConfig::default(),
            search_top_k: default_search_top_k(),
            llm: LlmConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            documents_path: default_documents_path(),
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: default_embedding_backend(),
            model_name: default_model_name(),
            model_dir: default_model_dir(),
            dimensions: default_dimensions(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            path: default_vector_db_path(),
            collection_name: default_collection_name(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            ollama: None,
            gemini: None,
            available_models: Vec::new(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            model: default_ollama_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            remove_timeout_secs: default_remove_timeout_secs(),
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: default_gemini_model(),
            api_key_env: default_gemini_key_env(),
            base_url: default_gemini_base_url(),
            timeout_secs: default_gemini_timeout_secs(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// A file that exists but does not parse is an error: silently running
    /// with defaults would point the index at the wrong collection.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            info!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("invalid YAML in {}", path.display()))?;

        info!("Loaded configuration from {}", path.display());
        Ok(cfg)
    }

    /// Save configuration to a YAML file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let data = serde_yaml::to_string(self).context("failed to serialize config")?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration values. Called once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_chunking(self.embedding.chunk_size, self.embedding.chunk_overlap)?;
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Invalid(
                "embedding.dimensions must be positive".to_string(),
            ));
        }
        if self.search_top_k == 0 {
            return Err(ConfigError::Invalid(
                "search_top_k must be positive".to_string(),
            ));
        }
        if self.vector_db.collection_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "vector_db.collection_name must not be empty".to_string(),
            ));
        }
        if let Some(ollama) = &self.llm.ollama {
            if ollama.timeout_secs == 0 {
                return Err(ConfigError::Invalid(
                    "llm.ollama.timeout_secs must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Maximum accepted upload size in bytes.
    #[must_use]
    pub fn max_file_size_bytes(&self) -> u64 {
        self.storage.max_file_size_mb * 1024 * 1024
    }
}

/// Check the chunk size / overlap relationship.
pub fn validate_chunking(chunk_size: usize, chunk_overlap: usize) -> Result<(), ConfigError> {
    if chunk_size == 0 {
        return Err(ConfigError::Invalid(
            "embedding.chunk_size must be positive".to_string(),
        ));
    }
    if chunk_overlap >= chunk_size {
        return Err(ConfigError::Invalid(format!(
            "embedding.chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
        )));
    }
    Ok(())
}

/// Rewrite `llm.ollama.model` in the YAML file at `path`, leaving every other
/// key untouched (including ones this crate does not model).
pub fn set_ollama_model<P: AsRef<Path>>(path: P, model_name: &str) -> Result<()> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    let mut doc: serde_yaml::Value = serde_yaml::from_str(&data)
        .with_context(|| format!("invalid YAML in {}", path.display()))?;

    let ollama = doc
        .get_mut("llm")
        .and_then(|llm| llm.get_mut("ollama"))
        .and_then(serde_yaml::Value::as_mapping_mut)
        .ok_or_else(|| ConfigError::MissingSection("llm.ollama".to_string()))?;

    ollama.insert(
        serde_yaml::Value::String("model".to_string()),
        serde_yaml::Value::String(model_name.to_string()),
    );

    let out = serde_yaml::to_string(&doc).context("failed to serialize config")?;
    std::fs::write(path, out)
        .with_context(|| format!("failed to write config: {}", path.display()))?;

    info!("Persisted active model {model_name} to {}", path.display());
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.embedding.chunk_size, 1000);
        assert_eq!(config.embedding.chunk_overlap, 200);
        assert_eq!(config.embedding.dimensions, 384);
        assert_eq!(config.search_top_k, 5);
        assert_eq!(config.llm.provider, "template");
        assert!(config.llm.ollama.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_yaml() {
        let yaml = r#"
embedding:
  chunk_size: 200
  chunk_overlap: 20
llm:
  provider: ollama
  ollama:
    url: http://127.0.0.1:9999
  available_models:
    - name: mistral
      description: Mistral 7B
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.embedding.chunk_size, 200);
        assert_eq!(config.embedding.chunk_overlap, 20);
        // Other fields should have defaults
        assert_eq!(config.embedding.dimensions, 384);
        let ollama = config.llm.ollama.unwrap();
        assert_eq!(ollama.url, "http://127.0.0.1:9999");
        assert_eq!(ollama.model, "mistral");
        assert_eq!(ollama.timeout_secs, 180);
        assert_eq!(config.llm.available_models.len(), 1);
    }

    #[test]
    fn test_validate_overlap_not_smaller_than_size() {
        let mut config = Config::default();
        config.embedding.chunk_overlap = config.embedding.chunk_size;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_bad_top_k() {
        let mut config = Config::default();
        config.search_top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("nope.yaml")).unwrap();
        assert_eq!(config.vector_db.collection_name, "documents");
    }

    #[test]
    fn test_load_invalid_yaml_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "embedding: [unclosed").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_set_ollama_model_preserves_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "app:\n  name: chatbot\nllm:\n  provider: ollama\n  ollama:\n    url: http://x\n    model: mistral\n",
        )
        .unwrap();

        set_ollama_model(&path, "llama3").unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("name: chatbot"));
        let config = Config::load(&path).unwrap();
        assert_eq!(config.llm.ollama.unwrap().model, "llama3");
    }

    #[test]
    fn test_set_ollama_model_without_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "llm:\n  provider: template\n").unwrap();
        let err = set_ollama_model(&path, "llama3").unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[test]
    fn test_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.yaml");
        let mut config = Config::default();
        config.llm.ollama = Some(OllamaConfig::default());
        config.save(&path).unwrap();
        let parsed = Config::load(&path).unwrap();
        assert_eq!(parsed.embedding.chunk_size, config.embedding.chunk_size);
        assert_eq!(parsed.llm.ollama.unwrap().url, "http://localhost:11434");
    }
}
