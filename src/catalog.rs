//! Metadata catalog: the durable source of truth for "have we already
//! fetched this document."
//!
//! One row per document, keyed by `document_id`, holding provenance plus the
//! full raw text so a cache hit never needs a second fetch. Vector entries
//! for a document are written in the same transaction (see `index`), so the
//! catalog and the index cannot drift.

use anyhow::Result;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::models::{Document, IndexStats, SourceType};

/// Handle to the shared catalog + vector index. One instance is owned by the
/// process and passed by reference to every session.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn open(config: &Config) -> Result<Store> {
        let pool = db::connect(config).await?;
        Ok(Store { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Store {
        Store { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The authoritative cache-hit signal used before any network fetch.
    pub async fn exists(&self, document_id: &str) -> Result<bool> {
        let found: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM documents WHERE document_id = ?")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(found)
    }

    pub async fn get(&self, document_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT document_id, source_type, company_name, title, published_date, raw_text, \
             industry_tags, chunk_count FROM documents WHERE document_id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_document(&r)).transpose()
    }

    /// Brokerage company notes for one company, exact case-insensitive match,
    /// newest first.
    pub async fn find_by_company(&self, company_name: &str) -> Result<Vec<Document>> {
        let rows = self
            .fetch_by_source_type(SourceType::BrokerageCompany)
            .await?;
        let want = company_name.to_lowercase();
        let mut docs: Vec<Document> = rows
            .into_iter()
            .filter(|d| d.company_name.to_lowercase() == want)
            .collect();
        sort_newest_first(&mut docs);
        Ok(docs)
    }

    /// Registry filings for one company, exact case-insensitive match,
    /// newest first.
    pub async fn find_filings_by_company(&self, company_name: &str) -> Result<Vec<Document>> {
        let rows = self.fetch_by_source_type(SourceType::Filing).await?;
        let want = company_name.to_lowercase();
        let mut docs: Vec<Document> = rows
            .into_iter()
            .filter(|d| d.company_name.to_lowercase() == want)
            .collect();
        sort_newest_first(&mut docs);
        Ok(docs)
    }

    /// Brokerage industry notes whose title or tag set mentions any of the
    /// given keywords, newest first.
    pub async fn find_by_keywords(&self, keywords: &[String]) -> Result<Vec<Document>> {
        let rows = self
            .fetch_by_source_type(SourceType::BrokerageIndustry)
            .await?;
        let mut docs: Vec<Document> = rows
            .into_iter()
            .filter(|d| matches_any_keyword(d, keywords))
            .collect();
        sort_newest_first(&mut docs);
        Ok(docs)
    }

    /// Clear all catalog records and vector entries in one transaction.
    pub async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunk_vectors")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let document_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;
        let company_count: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT lower(company_name)) FROM documents")
                .fetch_one(&self.pool)
                .await?;
        let total_text_size: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(octet_length(raw_text)), 0) FROM documents")
                .fetch_one(&self.pool)
                .await?;

        Ok(IndexStats {
            document_count,
            chunk_count,
            company_count,
            total_text_size,
        })
    }

    async fn fetch_by_source_type(&self, source_type: SourceType) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT document_id, source_type, company_name, title, published_date, raw_text, \
             industry_tags, chunk_count FROM documents WHERE source_type = ? ORDER BY rowid ASC",
        )
        .bind(source_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_document).collect()
    }
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let source_type_str: String = row.get("source_type");
    let source_type = SourceType::parse(&source_type_str)
        .ok_or_else(|| anyhow::anyhow!("Unknown source_type in catalog: {}", source_type_str))?;
    let tags_json: String = row.get("industry_tags");
    let industry_tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();

    Ok(Document {
        document_id: row.get("document_id"),
        source_type,
        company_name: row.get("company_name"),
        title: row.get("title"),
        published_date: row.get("published_date"),
        raw_text: row.get("raw_text"),
        industry_tags,
        chunk_count: row.get("chunk_count"),
    })
}

/// Sort newest first. Unparseable or missing dates rank lowest so they land
/// at the end without ever failing the sort. Stable, so equal keys keep
/// catalog insertion order.
pub fn sort_newest_first(docs: &mut [Document]) {
    docs.sort_by(|a, b| date_sort_key(&b.published_date).cmp(&date_sort_key(&a.published_date)));
}

/// Total-order sort key for free-form date strings. `None` compares lowest.
pub fn date_sort_key(date: &str) -> Option<NaiveDate> {
    let trimmed = date.trim();
    const FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d", "%Y.%m.%d", "%Y/%m/%d", "%y.%m.%d"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

fn matches_any_keyword(doc: &Document, keywords: &[String]) -> bool {
    let title = doc.title.to_lowercase();
    keywords.iter().any(|kw| {
        let kw = kw.to_lowercase();
        if kw.is_empty() {
            return false;
        }
        title.contains(&kw)
            || doc
                .industry_tags
                .iter()
                .any(|tag| tag.to_lowercase().contains(&kw))
    })
}
