//! Vector index over chunk embeddings.
//!
//! Entries live in the same SQLite file as the catalog, so the two are
//! persisted and loaded together and cannot drift across restarts. A
//! document and its vector entries are written in one transaction: either
//! both land or neither does. Search is a brute-force cosine scan, which
//! degrades gracefully to zero or one entries.

use sqlx::Row;

use crate::catalog::Store;
use crate::chunk::split_text;
use crate::config::Config;
use crate::embedding::{blob_to_vec, cosine_similarity, embed_texts, vec_to_blob};
use crate::models::{Document, SourceType, VectorEntry};

/// Failure while writing or reading the paired catalog/index state.
#[derive(Debug)]
pub enum IndexError {
    /// A second write for an existing `document_id` carried different text.
    /// Writes are serialized per document id upstream, so this is a caller
    /// contract violation rather than a race.
    Duplicate(String),
    Write(String),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::Duplicate(id) => {
                write!(f, "document {} already stored with different content", id)
            }
            IndexError::Write(e) => write!(f, "index write failed: {}", e),
        }
    }
}

impl std::error::Error for IndexError {}

impl Store {
    /// Chunk, embed, and persist a document together with its vector
    /// entries. Returns the chunk count written.
    ///
    /// Re-ingesting an identical document is a no-op returning the stored
    /// chunk count; documents are immutable once cached.
    pub async fn ingest(&self, config: &Config, doc: &Document) -> Result<i64, IndexError> {
        if let Some(existing) = self
            .get(&doc.document_id)
            .await
            .map_err(|e| IndexError::Write(e.to_string()))?
        {
            if existing.raw_text == doc.raw_text {
                return Ok(existing.chunk_count);
            }
            return Err(IndexError::Duplicate(doc.document_id.clone()));
        }

        let chunks = split_text(
            &doc.raw_text,
            config.chunking.chunk_size,
            config.chunking.chunk_overlap,
        );
        if chunks.is_empty() {
            return Err(IndexError::Write(format!(
                "document {} has no indexable text",
                doc.document_id
            )));
        }

        // Embed before opening the transaction so a provider failure leaves
        // the store untouched.
        let vectors = embed_texts(&config.embedding, &chunks)
            .await
            .map_err(|e| IndexError::Write(e.to_string()))?;
        if vectors.len() != chunks.len() {
            return Err(IndexError::Write(format!(
                "embedding count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }

        let chunk_count = chunks.len() as i64;
        let tags_json = serde_json::to_string(&doc.industry_tags)
            .map_err(|e| IndexError::Write(e.to_string()))?;
        let now = chrono::Utc::now().timestamp();

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| IndexError::Write(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO documents (document_id, source_type, company_name, title,
                published_date, raw_text, industry_tags, chunk_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.document_id)
        .bind(doc.source_type.as_str())
        .bind(&doc.company_name)
        .bind(&doc.title)
        .bind(&doc.published_date)
        .bind(&doc.raw_text)
        .bind(&tags_json)
        .bind(chunk_count)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| IndexError::Write(e.to_string()))?;

        for (i, (text, vector)) in chunks.iter().zip(vectors.iter()).enumerate() {
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (document_id, chunk_index, chunk_count,
                    company_name, published_date, source_type, text, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&doc.document_id)
            .bind(i as i64)
            .bind(chunk_count)
            .bind(&doc.company_name)
            .bind(&doc.published_date)
            .bind(doc.source_type.as_str())
            .bind(text)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await
            .map_err(|e| IndexError::Write(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| IndexError::Write(e.to_string()))?;

        Ok(chunk_count)
    }

    /// Nearest-neighbor scan: distance is `1 - cosine`, ascending, ties
    /// broken by insertion order for determinism. Returns at most `limit`
    /// hits; an empty index yields an empty list, not an error.
    pub async fn search_vectors(
        &self,
        query: &[f32],
        limit: usize,
    ) -> anyhow::Result<Vec<(VectorEntry, f32)>> {
        let rows = sqlx::query(
            "SELECT id, document_id, chunk_index, chunk_count, company_name, \
             published_date, source_type, text, embedding FROM chunk_vectors ORDER BY id ASC",
        )
        .fetch_all(self.pool())
        .await?;

        let mut scored: Vec<(i64, VectorEntry, f32)> = Vec::with_capacity(rows.len());

        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&blob);
            let distance = 1.0 - cosine_similarity(query, &vector);

            let source_type_str: String = row.get("source_type");
            let source_type = SourceType::parse(&source_type_str).ok_or_else(|| {
                anyhow::anyhow!("Unknown source_type in index: {}", source_type_str)
            })?;

            scored.push((
                row.get("id"),
                VectorEntry {
                    document_id: row.get("document_id"),
                    chunk_index: row.get("chunk_index"),
                    chunk_count: row.get("chunk_count"),
                    company_name: row.get("company_name"),
                    published_date: row.get("published_date"),
                    source_type,
                    text: row.get("text"),
                },
                distance,
            ));
        }

        scored.sort_by(|a, b| {
            a.2.partial_cmp(&b.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(limit);

        Ok(scored.into_iter().map(|(_, e, d)| (e, d)).collect())
    }
}
