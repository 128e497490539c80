//! Embedding index: chunk, embed and persist documents, answer nearest
//! neighbor queries.
//!
//! A collection remembers the dimensionality and model it was created with.
//! Opening it with an embedder of a different dimensionality is refused, so
//! vectors from two models never end up compared against each other.
//! Switching embedding models therefore requires re-indexing into a fresh
//! collection.
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info, warn};

use crate::chunker::TextSplitter;
use crate::config::{Config, ConfigError};
use crate::embedder::{Embedder, EmbedderError};
use crate::store::{ChunkRecord, Collection, StoreError, VectorStore};

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("vector store error: {0}")]
    Store(#[from] StoreError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedderError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(
        "collection {collection} holds {stored}-dim vectors from {stored_model}, \
         but the configured embedder {configured_model} produces {configured}; re-index into a new collection"
    )]
    DimensionMismatch {
        collection: String,
        stored: usize,
        stored_model: String,
        configured: usize,
        configured_model: String,
    },
}

/// One ranked chunk returned by [`EmbeddingIndex::search`].
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub content: String,
    pub metadata: BTreeMap<String, String>,
    pub distance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub total_chunks: usize,
}

/// Embedding and SQLite calls run on the blocking pool so they never stall
/// the async workers.
pub struct EmbeddingIndex {
    store: Arc<Mutex<VectorStore>>,
    collection: Collection,
    embedder: Arc<dyn Embedder>,
    splitter: TextSplitter,
    /// Held across the embed + write sequence of `add_document`.
    ingest_lock: TokioMutex<()>,
}

impl EmbeddingIndex {
    /// Open the configured collection on disk.
    pub fn open(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Self, IndexError> {
        let splitter =
            TextSplitter::new(config.embedding.chunk_size, config.embedding.chunk_overlap)?;
        let store = VectorStore::open(&config.vector_db.path)?;
        Self::new(store, &config.vector_db.collection_name, embedder, splitter)
    }

    /// Wrap an already opened store, creating `collection_name` if needed.
    pub fn new(
        store: VectorStore,
        collection_name: &str,
        embedder: Arc<dyn Embedder>,
        splitter: TextSplitter,
    ) -> Result<Self, IndexError> {
        let collection = store.get_or_create_collection(
            collection_name,
            embedder.dimensions(),
            embedder.model_name(),
        )?;

        if collection.dimensions != embedder.dimensions() {
            return Err(IndexError::DimensionMismatch {
                collection: collection.name,
                stored: collection.dimensions,
                stored_model: collection.model_name,
                configured: embedder.dimensions(),
                configured_model: embedder.model_name().to_string(),
            });
        }
        if collection.model_name != embedder.model_name() {
            warn!(
                "Collection {} was built with {}, now embedding with {}",
                collection.name,
                collection.model_name,
                embedder.model_name()
            );
        }

        Ok(Self {
            store: Arc::new(Mutex::new(store)),
            collection,
            embedder,
            splitter,
            ingest_lock: TokioMutex::new(()),
        })
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn splitter(&self) -> &TextSplitter {
        &self.splitter
    }

    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, IndexError> {
        let embedder = Arc::clone(&self.embedder);
        let vectors = tokio::task::spawn_blocking(move || {
            let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
            embedder.embed_batch(&inputs)
        })
        .await??;
        Ok(vectors)
    }

    /// Run `op` against the store on the blocking pool.
    async fn with_store<T, F>(&self, op: F) -> Result<T, IndexError>
    where
        T: Send + 'static,
        F: FnOnce(&mut VectorStore, &Collection) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let collection = self.collection.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
            op(&mut *store, &collection)
        })
        .await??;
        Ok(result)
    }

    /// Chunk, embed and store `text` under `doc_id`, replacing any chunks
    /// previously stored for it. Returns the number of chunks stored.
    pub async fn add_document(
        &self,
        doc_id: &str,
        text: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<usize, IndexError> {
        let _guard = self.ingest_lock.lock().await;

        let chunks = self.splitter.split(text);
        if chunks.is_empty() {
            info!("Document {doc_id} produced no chunks, nothing to index");
            return Ok(0);
        }

        let embeddings = self.embed_texts(chunks.clone()).await?;

        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (content, embedding))| {
                let mut chunk_meta = metadata.clone();
                chunk_meta.insert("chunk_id".to_string(), i.to_string());
                chunk_meta.insert("doc_id".to_string(), doc_id.to_string());
                ChunkRecord {
                    chunk_id: format!("{doc_id}_{i}"),
                    doc_id: doc_id.to_string(),
                    position: i,
                    content,
                    embedding,
                    metadata: chunk_meta,
                }
            })
            .collect();

        let owned_id = doc_id.to_string();
        let stored = self
            .with_store(move |store, collection| {
                store.replace_document(collection, &owned_id, &records)
            })
            .await?;

        info!("Indexed document {doc_id}: {stored} chunks");
        Ok(stored)
    }

    /// Up to `top_k` chunks nearest to `query`, nearest first.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, IndexError> {
        let vector = self
            .embed_texts(vec![query.to_string()])
            .await?
            .pop()
            .ok_or_else(|| EmbedderError::InferenceFailed("no vector for query".to_string()))?;
        if vector.len() != self.collection.dimensions {
            return Err(IndexError::DimensionMismatch {
                collection: self.collection.name.clone(),
                stored: self.collection.dimensions,
                stored_model: self.collection.model_name.clone(),
                configured: vector.len(),
                configured_model: self.embedder.model_name().to_string(),
            });
        }

        let hits = self
            .with_store(move |store, collection| store.query(collection, &vector, top_k))
            .await?;
        debug!("Search returned {} hits", hits.len());

        Ok(hits
            .into_iter()
            .map(|hit| RetrievalResult {
                content: hit.content,
                metadata: hit.metadata,
                distance: hit.distance,
            })
            .collect())
    }

    /// Remove every chunk whose metadata `doc_id` equals `doc_id`.
    pub async fn delete_document(&self, doc_id: &str) -> Result<usize, IndexError> {
        let owned_id = doc_id.to_string();
        let removed = self
            .with_store(move |store, collection| {
                store.delete_where(collection, "doc_id", &owned_id)
            })
            .await?;
        if removed == 0 {
            debug!("No chunks found for document {doc_id}");
        } else {
            info!("Deleted document {doc_id}: {removed} chunks");
        }
        Ok(removed)
    }

    pub async fn get_stats(&self) -> Result<IndexStats, IndexError> {
        let total_chunks = self
            .with_store(|store, collection| store.count(collection))
            .await?;
        Ok(IndexStats { total_chunks })
    }
}
