//! Retrieval engine: embed the question, oversample the index, post-filter
//! by company, truncate to `k`.

use anyhow::Result;

use crate::catalog::Store;
use crate::config::Config;
use crate::embedding;
use crate::models::{Query, ScoredChunk};

/// Return the best `k` chunks for a query. An empty result is a valid
/// terminal state (no matching content), never an error.
pub async fn retrieve(store: &Store, config: &Config, query: &Query) -> Result<Vec<ScoredChunk>> {
    if query.question.trim().is_empty() || query.k == 0 {
        return Ok(Vec::new());
    }

    let query_vector = embedding::embed_query(&config.embedding, &query.question).await?;

    // Oversample so the company filter does not starve the result set.
    let limit = query.k * config.retrieval.oversample.max(1);
    let mut hits = store.search_vectors(&query_vector, limit).await?;

    if let Some(company) = &query.company_name {
        let want = company.to_lowercase();
        hits.retain(|(entry, _)| entry.company_name.to_lowercase() == want);
    }
    hits.truncate(query.k);

    Ok(hits
        .into_iter()
        .map(|(entry, distance)| ScoredChunk { entry, distance })
        .collect())
}
