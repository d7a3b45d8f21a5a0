//! Index statistics overview.
//!
//! Provides a quick summary of what's indexed: document counts, chunk
//! counts, distinct companies, and per-source breakdowns. Used by
//! `flens stats` to give confidence that acquisitions are landing.

use anyhow::Result;
use sqlx::Row;

use crate::catalog::Store;
use crate::config::Config;

/// Run the stats command: query the index and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = Store::open(config).await?;
    let stats = store.stats().await?;

    let db_size = std::fs::metadata(&config.storage.db_path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("FilingLens — Index Stats");
    println!("========================");
    println!();
    println!("  Database:    {}", config.storage.db_path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", stats.document_count);
    println!("  Chunks:      {}", stats.chunk_count);
    println!("  Companies:   {}", stats.company_count);
    println!("  Text:        {}", format_bytes(stats.total_text_size.max(0) as u64));

    let source_rows = sqlx::query(
        r#"
        SELECT source_type, COUNT(*) AS doc_count, COALESCE(SUM(chunk_count), 0) AS chunk_count
        FROM documents
        GROUP BY source_type
        ORDER BY doc_count DESC
        "#,
    )
    .fetch_all(store.pool())
    .await?;

    if !source_rows.is_empty() {
        println!();
        println!("  By source:");
        println!("  {:<28} {:>6} {:>8}", "SOURCE", "DOCS", "CHUNKS");
        println!("  {}", "-".repeat(44));
        for row in &source_rows {
            let source: String = row.get("source_type");
            let doc_count: i64 = row.get("doc_count");
            let chunk_count: i64 = row.get("chunk_count");
            println!("  {:<28} {:>6} {:>8}", source, doc_count, chunk_count);
        }
    }

    println!();

    store.pool().close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
