use super::chunks::check_dimensions;
use super::{Collection, QueryHit, StoreError, VectorStore, serialize_vector};
use rusqlite::params;
use std::collections::BTreeMap;

impl VectorStore {
    /// Nearest neighbors of `query_vector` by cosine distance, nearest first.
    ///
    /// Equal distances are ordered by chunk id so identical inputs always
    /// produce identical rankings.
    pub fn query(
        &self,
        collection: &Collection,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryHit>, StoreError> {
        check_dimensions(collection, query_vector)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            SELECT
                c.chunk_id,
                c.content,
                c.metadata,
                vec_distance_cosine(v.embedding, ?) AS distance
            FROM {} v
            JOIN chunks c ON v.rowid = c.id
            WHERE c.collection = ?
            ORDER BY distance ASC, c.chunk_id ASC
            LIMIT ?
            "#,
            collection.vec_table()
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                serialize_vector(query_vector),
                collection.name,
                top_k as i64
            ],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            },
        )?;

        let mut results = Vec::new();
        for row in rows {
            let (chunk_id, content, metadata, distance) = row?;
            let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata)?;
            results.push(QueryHit {
                chunk_id,
                content,
                metadata,
                distance,
            });
        }

        Ok(results)
    }
}
