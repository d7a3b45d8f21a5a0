//! Core data models used throughout FilingLens.
//!
//! These types represent the documents, chunks, and retrieval results that
//! flow through the acquisition and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// Which source a document was fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    #[serde(rename = "filing")]
    Filing,
    #[serde(rename = "brokerage-company-report")]
    BrokerageCompany,
    #[serde(rename = "brokerage-industry-report")]
    BrokerageIndustry,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Filing => "filing",
            SourceType::BrokerageCompany => "brokerage-company-report",
            SourceType::BrokerageIndustry => "brokerage-industry-report",
        }
    }

    pub fn parse(s: &str) -> Option<SourceType> {
        match s {
            "filing" => Some(SourceType::Filing),
            "brokerage-company-report" => Some(SourceType::BrokerageCompany),
            "brokerage-industry-report" => Some(SourceType::BrokerageIndustry),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fetched, text-extracted filing or brokerage note. Immutable once
/// stored; `document_id` is unique across the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Registry accession number, or a deterministic hash of the source URL
    /// for scraped items.
    pub document_id: String,
    pub source_type: SourceType,
    pub company_name: String,
    pub title: String,
    /// Free-form date string as published by the source; not guaranteed ISO.
    pub published_date: String,
    pub raw_text: String,
    /// Set for brokerage-industry documents only.
    pub industry_tags: Vec<String>,
    /// Number of chunks written to the vector index; 0 until ingested.
    pub chunk_count: i64,
}

/// One vector index entry, denormalized so a hit resolves to chunk text and
/// provenance without a catalog lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    pub document_id: String,
    pub chunk_index: i64,
    pub chunk_count: i64,
    pub company_name: String,
    pub published_date: String,
    pub source_type: SourceType,
    pub text: String,
}

/// A retrieval request.
#[derive(Debug, Clone)]
pub struct Query {
    /// Exact, case-insensitive company filter.
    pub company_name: Option<String>,
    pub question: String,
    pub k: usize,
}

/// One retrieval hit. Lower distance is more relevant.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub entry: VectorEntry,
    pub distance: f32,
}

/// A resolved company identity from the filing registry.
#[derive(Debug, Clone)]
pub struct CompanyIdentity {
    pub company_id: String,
    pub canonical_name: String,
    pub ticker: Option<String>,
}

/// Provenance of one supplementary report included in a session result.
#[derive(Debug, Clone, Serialize)]
pub struct ReportRef {
    pub title: String,
    pub published_date: String,
}

/// Terminal record of one analysis session.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub success: bool,
    pub company_name: String,
    pub company_id: Option<String>,
    pub ticker: Option<String>,
    pub filings_found: usize,
    pub primary_title: Option<String>,
    pub answer: Option<String>,
    pub company_reports: Vec<ReportRef>,
    pub industry_reports: Vec<ReportRef>,
    pub error: Option<String>,
}

impl AnalysisResult {
    /// Empty shell for a session that has not produced anything yet.
    pub fn empty(company_name: &str) -> Self {
        Self {
            success: false,
            company_name: company_name.to_string(),
            company_id: None,
            ticker: None,
            filings_found: 0,
            primary_title: None,
            answer: None,
            company_reports: Vec::new(),
            industry_reports: Vec::new(),
            error: None,
        }
    }
}

/// One status line emitted at a stage boundary of a running session.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub stage: String,
    pub message: String,
}

/// Aggregate counts over the catalog and index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub document_count: i64,
    pub chunk_count: i64,
    pub company_count: i64,
    /// Total raw text size in bytes across all catalog records.
    pub total_text_size: i64,
}
