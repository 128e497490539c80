use super::{ChunkRecord, Collection, StoreError, VectorStore, serialize_vector};
use rusqlite::params;

impl VectorStore {
    /// Replace every chunk of `doc_id` with `records` in one transaction.
    ///
    /// Readers never observe a partially written batch: either the old
    /// chunks or the complete new set is visible.
    pub fn replace_document(
        &mut self,
        collection: &Collection,
        doc_id: &str,
        records: &[ChunkRecord],
    ) -> Result<usize, StoreError> {
        for record in records {
            check_dimensions(collection, &record.embedding)?;
        }

        let vec_table = collection.vec_table();
        let tx = self.conn.transaction()?;

        // Virtual table rows are not covered by foreign keys.
        tx.execute(
            &format!(
                "DELETE FROM {vec_table} WHERE rowid IN \
                 (SELECT id FROM chunks WHERE collection = ? AND doc_id = ?)"
            ),
            params![collection.name, doc_id],
        )?;
        tx.execute(
            "DELETE FROM chunks WHERE collection = ? AND doc_id = ?",
            params![collection.name, doc_id],
        )?;

        for record in records {
            // A chunk id claimed by another document is overwritten too.
            tx.execute(
                &format!(
                    "DELETE FROM {vec_table} WHERE rowid IN \
                     (SELECT id FROM chunks WHERE collection = ? AND chunk_id = ?)"
                ),
                params![collection.name, record.chunk_id],
            )?;
            tx.execute(
                "DELETE FROM chunks WHERE collection = ? AND chunk_id = ?",
                params![collection.name, record.chunk_id],
            )?;

            let metadata = serde_json::to_string(&record.metadata)?;
            tx.execute(
                "INSERT INTO chunks (collection, chunk_id, doc_id, position, content, metadata) \
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    collection.name,
                    record.chunk_id,
                    record.doc_id,
                    record.position as i64,
                    record.content,
                    metadata
                ],
            )?;
            let row_id = tx.last_insert_rowid();

            tx.execute(
                &format!("INSERT INTO {vec_table} (rowid, embedding) VALUES (?, ?)"),
                params![row_id, serialize_vector(&record.embedding)],
            )?;
        }

        tx.commit()?;
        Ok(records.len())
    }

    /// Delete every chunk whose metadata field `key` equals `value`.
    /// Returns the number of chunks removed.
    pub fn delete_where(
        &mut self,
        collection: &Collection,
        key: &str,
        value: &str,
    ) -> Result<usize, StoreError> {
        let vec_table = collection.vec_table();
        let path = format!("$.\"{}\"", key.replace('"', ""));
        let tx = self.conn.transaction()?;

        tx.execute(
            &format!(
                "DELETE FROM {vec_table} WHERE rowid IN \
                 (SELECT id FROM chunks WHERE collection = ? AND json_extract(metadata, ?) = ?)"
            ),
            params![collection.name, path, value],
        )?;
        let removed = tx.execute(
            "DELETE FROM chunks WHERE collection = ? AND json_extract(metadata, ?) = ?",
            params![collection.name, path, value],
        )?;

        tx.commit()?;
        Ok(removed)
    }

    /// Live number of chunks in the collection.
    pub fn count(&self, collection: &Collection) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE collection = ?",
            params![collection.name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

pub(crate) fn check_dimensions(collection: &Collection, vector: &[f32]) -> Result<(), StoreError> {
    if vector.len() != collection.dimensions {
        return Err(StoreError::VectorDimensions {
            collection: collection.name.clone(),
            expected: collection.dimensions,
            actual: vector.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(doc_id: &str, i: usize, content: &str, fill: f32) -> ChunkRecord {
        let mut metadata = BTreeMap::new();
        metadata.insert("doc_id".to_string(), doc_id.to_string());
        metadata.insert("chunk_id".to_string(), i.to_string());
        ChunkRecord {
            chunk_id: format!("{doc_id}_{i}"),
            doc_id: doc_id.to_string(),
            position: i,
            content: content.to_string(),
            embedding: vec![fill; 4],
            metadata,
        }
    }

    fn vec_rows(store: &VectorStore) -> i64 {
        store
            .conn
            .query_row("SELECT COUNT(*) FROM vec_documents", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_replace_document_overwrites() {
        let mut store = VectorStore::open_in_memory().unwrap();
        let col = store.get_or_create_collection("documents", 4, "mock").unwrap();

        let first = vec![
            record("1", 0, "alpha", 0.1),
            record("1", 1, "beta", 0.2),
            record("1", 2, "gamma", 0.3),
        ];
        assert_eq!(store.replace_document(&col, "1", &first).unwrap(), 3);
        assert_eq!(store.count(&col).unwrap(), 3);
        assert_eq!(vec_rows(&store), 3);

        // Shorter re-add leaves no stale higher-index chunks behind.
        let second = vec![record("1", 0, "replaced", 0.5)];
        store.replace_document(&col, "1", &second).unwrap();
        assert_eq!(store.count(&col).unwrap(), 1);
        assert_eq!(vec_rows(&store), 1);
    }

    #[test]
    fn test_delete_where_metadata() {
        let mut store = VectorStore::open_in_memory().unwrap();
        let col = store.get_or_create_collection("documents", 4, "mock").unwrap();

        store
            .replace_document(&col, "a", &[record("a", 0, "one", 0.1), record("a", 1, "two", 0.2)])
            .unwrap();
        store
            .replace_document(&col, "b", &[record("b", 0, "three", 0.3)])
            .unwrap();

        assert_eq!(store.delete_where(&col, "doc_id", "a").unwrap(), 2);
        assert_eq!(store.count(&col).unwrap(), 1);
        assert_eq!(vec_rows(&store), 1);

        // No match is a no-op.
        assert_eq!(store.delete_where(&col, "doc_id", "missing").unwrap(), 0);
        assert_eq!(store.count(&col).unwrap(), 1);
    }

    #[test]
    fn test_rejects_wrong_dimensions() {
        let mut store = VectorStore::open_in_memory().unwrap();
        let col = store.get_or_create_collection("documents", 4, "mock").unwrap();

        let mut bad = record("x", 0, "short", 0.1);
        bad.embedding = vec![0.1; 3];
        let err = store.replace_document(&col, "x", &[bad]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::VectorDimensions {
                expected: 4,
                actual: 3,
                ..
            }
        ));
        assert_eq!(store.count(&col).unwrap(), 0);
    }
}
