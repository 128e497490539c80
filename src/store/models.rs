use std::collections::BTreeMap;

/// A named vector collection and the shape it was created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub name: String,
    pub dimensions: usize,
    pub model_name: String,
}

impl Collection {
    /// Name of the vec0 table holding this collection's embeddings.
    pub(crate) fn vec_table(&self) -> String {
        format!("vec_{}", self.name)
    }
}

/// One chunk ready to be written: id, text, vector and metadata.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub doc_id: String,
    pub position: usize,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: BTreeMap<String, String>,
}

/// A nearest-neighbor match returned by a collection query.
#[derive(Debug, Clone)]
pub struct QueryHit {
    pub chunk_id: String,
    pub content: String,
    pub metadata: BTreeMap<String, String>,
    pub distance: f64,
}
