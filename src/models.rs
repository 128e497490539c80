//! Local model lifecycle against the Ollama HTTP API.
//!
//! Installs run as background tasks that stream pull progress into a shared
//! table; callers poll [`ModelManager::download_status`] instead of waiting.
//! Changing the active model only rewrites the configuration file. Whoever
//! owns the live generator has to rebuild it afterwards.
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{self, CatalogEntry, Config, OllamaConfig};
use crate::generator::local::probe;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LifecycleError {
    #[error("local inference server is not available at {0}")]
    BackendUnavailable(String),

    #[error("{op} of model {model} failed: {diagnostic}")]
    OperationFailed {
        op: &'static str,
        model: String,
        diagnostic: String,
    },
}

/// A model as seen by the backend (and the static catalog) right now.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelDescriptor {
    pub name: String,
    pub full_name: String,
    pub installed: bool,
    pub downloading: bool,
    pub size: String,
    pub digest: String,
    pub description: String,
    pub modified_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Starting,
    Downloading,
    Completed,
    Error,
}

impl DownloadStatus {
    pub fn in_flight(self) -> bool {
        matches!(self, Self::Starting | Self::Downloading)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DownloadProgress {
    pub status: DownloadStatus,
    /// Percent, 0 to 100.
    pub progress: f64,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl DownloadProgress {
    fn new(status: DownloadStatus, progress: f64, message: impl Into<String>) -> Self {
        Self {
            status,
            progress,
            message: message.into(),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstallOutcome {
    /// A new background download was started.
    Accepted { model: String },
    /// The model was already downloading; nothing new was started.
    AlreadyInProgress(DownloadProgress),
}

type ProgressTable = Arc<Mutex<HashMap<String, DownloadProgress>>>;

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    digest: String,
    modified_at: Option<String>,
}

#[derive(Deserialize)]
struct PullLine {
    #[serde(default)]
    status: String,
    error: Option<String>,
    total: Option<u64>,
    completed: Option<u64>,
}

pub struct ModelManager {
    client: Client,
    base_url: String,
    catalog: Vec<CatalogEntry>,
    config_path: PathBuf,
    probe_timeout: Duration,
    request_timeout: Duration,
    downloads: ProgressTable,
}

impl ModelManager {
    /// `config_path` is the file [`ModelManager::set_active`] rewrites.
    pub fn new(cfg: &Config, config_path: impl Into<PathBuf>) -> Self {
        let ollama = cfg.llm.ollama.clone().unwrap_or_else(OllamaConfig::default);
        Self {
            client: Client::new(),
            base_url: ollama.url.trim_end_matches('/').to_string(),
            catalog: cfg.llm.available_models.clone(),
            config_path: config_path.into(),
            probe_timeout: Duration::from_secs(ollama.probe_timeout_secs),
            request_timeout: Duration::from_secs(ollama.remove_timeout_secs),
            downloads: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn is_available(&self) -> bool {
        probe(&self.client, &self.base_url, self.probe_timeout).await
    }

    /// Installed models. Empty when the backend cannot be reached.
    pub async fn list_installed(&self) -> Vec<ModelDescriptor> {
        match self.fetch_tags().await {
            Ok(tags) => tags
                .models
                .into_iter()
                .map(|m| ModelDescriptor {
                    name: short_name(&m.name).to_string(),
                    installed: true,
                    downloading: false,
                    size: human_size(m.size),
                    digest: m.digest.chars().take(12).collect(),
                    description: String::new(),
                    modified_at: m.modified_at,
                    full_name: m.name,
                })
                .collect(),
            Err(e) => {
                warn!("Could not list installed models: {e}");
                Vec::new()
            }
        }
    }

    /// The static catalog annotated with live installed/downloading state.
    pub async fn list_available(&self) -> Vec<ModelDescriptor> {
        let installed = self.list_installed().await;
        let table = self.table();

        self.catalog
            .iter()
            .map(|entry| {
                let found = installed.iter().find(|m| m.name == entry.name);
                ModelDescriptor {
                    name: entry.name.clone(),
                    full_name: found
                        .map_or_else(|| entry.name.clone(), |m| m.full_name.clone()),
                    installed: found.is_some(),
                    downloading: table
                        .get(&entry.name)
                        .is_some_and(|p| p.status.in_flight()),
                    size: entry.size.clone(),
                    digest: found.map(|m| m.digest.clone()).unwrap_or_default(),
                    description: entry.description.clone(),
                    modified_at: found.and_then(|m| m.modified_at.clone()),
                }
            })
            .collect()
    }

    /// Start downloading `name` in the background and return immediately.
    ///
    /// A second request for a model that is still downloading returns the
    /// in-flight progress instead of starting another pull.
    pub async fn install(&self, name: &str) -> Result<InstallOutcome, LifecycleError> {
        if let Some(existing) = self.in_flight(name) {
            info!("Model {name} is already downloading");
            return Ok(InstallOutcome::AlreadyInProgress(existing));
        }
        if !self.is_available().await {
            return Err(LifecycleError::BackendUnavailable(self.base_url.clone()));
        }

        // Checked again under the lock: another request may have started
        // the same pull while the probe was in flight.
        {
            let mut table = self.table();
            if let Some(existing) = table.get(name).filter(|p| p.status.in_flight()) {
                info!("Model {name} is already downloading");
                return Ok(InstallOutcome::AlreadyInProgress(existing.clone()));
            }
            table.insert(
                name.to_string(),
                DownloadProgress::new(DownloadStatus::Starting, 0.0, "Starting download"),
            );
        }

        tokio::spawn(pull(
            self.client.clone(),
            self.base_url.clone(),
            name.to_string(),
            Arc::clone(&self.downloads),
        ));

        info!("Download of {name} started");
        Ok(InstallOutcome::Accepted {
            model: name.to_string(),
        })
    }

    /// Remove an installed model. Returns the fully qualified name removed.
    pub async fn remove(&self, name: &str) -> Result<String, LifecycleError> {
        if !self.is_available().await {
            return Err(LifecycleError::BackendUnavailable(self.base_url.clone()));
        }

        let full_name = self
            .list_installed()
            .await
            .into_iter()
            .find(|m| m.name == name || m.full_name == name)
            .map_or_else(|| name.to_string(), |m| m.full_name);

        info!("Removing model {full_name}");
        let failed = |diagnostic: String| LifecycleError::OperationFailed {
            op: "remove",
            model: full_name.clone(),
            diagnostic,
        };

        let response = self
            .client
            .delete(format!("{}/api/delete", self.base_url))
            .json(&serde_json::json!({ "model": full_name }))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let diagnostic = if body.trim().is_empty() {
                format!("backend returned {status}")
            } else {
                body
            };
            error!("Failed to remove {full_name}: {diagnostic}");
            return Err(failed(diagnostic));
        }

        info!("Model {full_name} removed");
        Ok(full_name)
    }

    /// Persist `name` as the active local model. Returns whether the write
    /// succeeded; the live generator is not touched.
    pub fn set_active(&self, name: &str) -> bool {
        match config::set_ollama_model(&self.config_path, name) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to set active model {name}: {e:#}");
                false
            }
        }
    }

    fn in_flight(&self, name: &str) -> Option<DownloadProgress> {
        self.table()
            .get(name)
            .filter(|p| p.status.in_flight())
            .cloned()
    }

    pub fn download_status(&self, name: &str) -> Option<DownloadProgress> {
        self.table().get(name).cloned()
    }

    pub fn downloads(&self) -> BTreeMap<String, DownloadProgress> {
        self.table()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    async fn fetch_tags(&self) -> Result<TagsResponse, reqwest::Error> {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, DownloadProgress>> {
        lock_table(&self.downloads)
    }
}

fn lock_table(table: &ProgressTable) -> MutexGuard<'_, HashMap<String, DownloadProgress>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn record(table: &ProgressTable, name: &str, progress: DownloadProgress) {
    lock_table(table).insert(name.to_string(), progress);
}

/// Stream `POST /api/pull` and mirror its NDJSON progress into `table`.
async fn pull(client: Client, base_url: String, name: String, table: ProgressTable) {
    let outcome = stream_pull(&client, &base_url, &name, &table).await;
    match outcome {
        Ok(()) => {
            info!("Model {name} installed");
            record(
                &table,
                &name,
                DownloadProgress::new(DownloadStatus::Completed, 100.0, "Download complete"),
            );
        }
        Err(message) => {
            error!("Download of {name} failed: {message}");
            let progress = lock_table(&table).get(&name).map_or(0.0, |p| p.progress);
            record(
                &table,
                &name,
                DownloadProgress::new(DownloadStatus::Error, progress, message),
            );
        }
    }
}

async fn stream_pull(
    client: &Client,
    base_url: &str,
    name: &str,
    table: &ProgressTable,
) -> Result<(), String> {
    let mut response = client
        .post(format!("{base_url}/api/pull"))
        .json(&serde_json::json!({ "model": name, "stream": true }))
        .send()
        .await
        .map_err(|e| e.to_string())?
        .error_for_status()
        .map_err(|e| e.to_string())?;

    let mut buffer: Vec<u8> = Vec::new();
    let mut succeeded = false;

    while let Some(bytes) = response.chunk().await.map_err(|e| e.to_string())? {
        buffer.extend_from_slice(&bytes);
        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            succeeded |= apply_pull_line(&line, name, table)?;
        }
    }
    if !buffer.is_empty() {
        succeeded |= apply_pull_line(&buffer, name, table)?;
    }

    if succeeded {
        Ok(())
    } else {
        Err("pull stream ended before completion".to_string())
    }
}

/// Apply one progress line. Returns `Ok(true)` on the final success line.
fn apply_pull_line(line: &[u8], name: &str, table: &ProgressTable) -> Result<bool, String> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(false);
    }

    let parsed: PullLine =
        serde_json::from_str(text).map_err(|e| format!("bad progress line: {e}"))?;
    if let Some(err) = parsed.error {
        return Err(err);
    }
    if parsed.status == "success" {
        return Ok(true);
    }

    let percent = match (parsed.completed, parsed.total) {
        (Some(done), Some(total)) if total > 0 => (done as f64 / total as f64 * 100.0).min(100.0),
        _ => lock_table(table).get(name).map_or(0.0, |p| p.progress),
    };
    record(
        table,
        name,
        DownloadProgress::new(DownloadStatus::Downloading, percent, parsed.status),
    );
    Ok(false)
}

/// `mistral:latest` -> `mistral`.
fn short_name(full: &str) -> &str {
    full.split(':').next().unwrap_or(full)
}

/// 1024-based size with one decimal, e.g. `3.8 GB`.
pub fn human_size(bytes: u64) -> String {
    const LABELS: [&str; 5] = ["", "K", "M", "G", "T"];
    let mut size = bytes as f64;
    let mut n = 0;
    while size >= 1024.0 && n < LABELS.len() - 1 {
        size /= 1024.0;
        n += 1;
    }
    format!("{size:.1} {}B", LABELS[n])
}
