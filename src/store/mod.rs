//! Persistent vector collections using SQLite and sqlite-vec
use rusqlite::{Connection, OptionalExtension, params};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;
use tracing::info;

pub mod chunks;
pub mod models;
pub mod search;

pub use models::{ChunkRecord, Collection, QueryHit};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    dimensions INTEGER NOT NULL,
    model_name TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    chunk_id TEXT NOT NULL,
    doc_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    UNIQUE(collection, chunk_id),
    FOREIGN KEY (collection) REFERENCES collections(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chunks_doc ON chunks(collection, doc_id);
"#;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata serialization error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("invalid collection name: {0:?}")]
    InvalidCollectionName(String),

    #[error("vector has {actual} dimensions, collection {collection} expects {expected}")]
    VectorDimensions {
        collection: String,
        expected: usize,
        actual: usize,
    },
}

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// A SQLite connection initialized with sqlite-vec and the collection schema.
pub struct VectorStore {
    pub(crate) conn: Connection,
}

impl VectorStore {
    /// Open (or create) the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!("Opening vector store: {}", path.display());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        init_sqlite_vec();
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        info!("sqlite-vec version: {}", vec_version);

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Look up a collection by name.
    pub fn collection(&self, name: &str) -> Result<Option<Collection>, StoreError> {
        validate_collection_name(name)?;
        let found = self
            .conn
            .query_row(
                "SELECT dimensions, model_name FROM collections WHERE name = ?",
                params![name],
                |row| {
                    Ok(Collection {
                        name: name.to_string(),
                        dimensions: row.get::<_, i64>(0)? as usize,
                        model_name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(found)
    }

    /// Open the named collection, creating it with the given vector shape if
    /// it does not exist yet.
    ///
    /// An existing collection is returned as recorded, so the caller can
    /// compare its dimensions against the embedder in use.
    pub fn get_or_create_collection(
        &self,
        name: &str,
        dimensions: usize,
        model_name: &str,
    ) -> Result<Collection, StoreError> {
        if let Some(existing) = self.collection(name)? {
            return Ok(existing);
        }

        let collection = Collection {
            name: name.to_string(),
            dimensions,
            model_name: model_name.to_string(),
        };

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO collections (name, dimensions, model_name) VALUES (?, ?, ?)",
            params![name, dimensions as i64, model_name],
        )?;
        // vec0 columns are fixed-width, so each collection gets its own table.
        tx.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING vec0(embedding FLOAT[{dimensions}]);",
            collection.vec_table()
        ))?;
        tx.commit()?;

        info!(
            "Created collection {name} ({dimensions} dims, model {model_name})"
        );
        Ok(collection)
    }
}

/// Collection names become part of a table name, so only ASCII
/// alphanumerics and underscores are accepted.
fn validate_collection_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StoreError::InvalidCollectionName(name.to_string()));
    }
    Ok(())
}

/// Helper to serialize a float32 vector into bytes for vec0 virtual table
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}
