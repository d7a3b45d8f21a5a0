//! Analysis session orchestration.
//!
//! [`run_analysis`] drives one question about one company end to end:
//! identity resolution against the registry, scope inference, bounded
//! filing discovery, cache-first document acquisition, supplementary
//! brokerage collection, retrieval over the vector index, and answer
//! synthesis. Supplementary failures degrade the result; only a missing
//! company or an empty primary filing is fatal.
//!
//! [`SessionHub`] runs sessions as background tasks and hands out
//! status streams and one-shot results by session id.

use chrono::{Duration as ChronoDuration, Local};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::brokerage::{scraped_id, BrokeragePortal, PortalEntry};
use crate::catalog::{date_sort_key, Store};
use crate::classify;
use crate::config::Config;
use crate::extract;
use crate::index::IndexError;
use crate::llm::{LanguageModel, LlmError, Task};
use crate::chunk::split_text;
use crate::models::{
    AnalysisResult, CompanyIdentity, Document, Query, ReportRef, ScoredChunk, SourceType,
    StatusEvent, VectorEntry,
};
use crate::registry::{CompanyEntry, FilingListing, RegistryApi};
use crate::retrieval;

/// Historical filings indexed beyond the primary one.
const MAX_HISTORICAL_FILINGS: usize = 3;

#[derive(Debug)]
pub enum SessionError {
    CompanyNotFound(String),
    EmptyDocument(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::CompanyNotFound(name) => {
                write!(f, "company not found in registry: {}", name)
            }
            SessionError::EmptyDocument(id) => {
                write!(f, "document {} yielded no text", id)
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Per-session overrides supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub lookback_years: Option<i64>,
}

/// Best-effort status emitter. A full or closed channel drops events
/// rather than stalling the pipeline.
#[derive(Clone)]
pub struct StatusSender {
    tx: Option<mpsc::Sender<StatusEvent>>,
}

impl StatusSender {
    pub fn new(tx: mpsc::Sender<StatusEvent>) -> StatusSender {
        StatusSender { tx: Some(tx) }
    }

    pub fn disabled() -> StatusSender {
        StatusSender { tx: None }
    }

    pub fn emit(&self, stage: &str, message: &str) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(StatusEvent {
                stage: stage.to_string(),
                message: message.to_string(),
            });
        }
    }
}

/// Everything a session needs: configuration, the shared store, and
/// the external collaborators behind their trait seams.
pub struct Services {
    pub config: Config,
    pub store: Store,
    pub registry: Arc<dyn RegistryApi>,
    pub portal: Arc<dyn BrokeragePortal>,
    pub llm: Arc<dyn LanguageModel>,
    doc_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Services {
    pub fn new(
        config: Config,
        store: Store,
        registry: Arc<dyn RegistryApi>,
        portal: Arc<dyn BrokeragePortal>,
        llm: Arc<dyn LanguageModel>,
    ) -> Services {
        Services {
            config,
            store,
            registry,
            portal,
            llm,
            doc_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub async fn from_config(config: Config) -> anyhow::Result<Services> {
        let store = Store::open(&config).await?;
        crate::migrate::apply_schema(store.pool()).await?;
        let registry = Arc::new(crate::registry::HttpRegistry::from_config(&config.registry)?);
        let portal = Arc::new(crate::brokerage::HttpPortal::from_config(&config.brokerage)?);
        let llm = Arc::new(crate::llm::ChatRouter::from_config(&config.llm)?);
        Ok(Services::new(config, store, registry, portal, llm))
    }

    /// One lock per document id, so concurrent sessions fetching the
    /// same document serialize instead of downloading twice. Locks no
    /// session currently holds are pruned on each access.
    fn doc_lock(&self, document_id: &str) -> Arc<Mutex<()>> {
        let mut locks = match self.doc_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(document_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Runs one analysis session to completion. Always returns a result:
/// fatal failures are reported through `error` with `success = false`.
pub async fn run_analysis(
    svc: &Services,
    company: &str,
    question: &str,
    opts: &SessionOptions,
    status: &StatusSender,
) -> AnalysisResult {
    let mut result = AnalysisResult::empty(company);

    // Stage 1: resolve the company against the registry.
    status.emit("identity", &format!("resolving company '{}'", company));
    let identity = match resolve_identity(svc, company).await {
        Ok(identity) => identity,
        Err(e) => {
            result.error = Some(e.to_string());
            return result;
        }
    };
    result.company_name = identity.canonical_name.clone();
    result.company_id = Some(identity.company_id.clone());
    result.ticker = identity.ticker.clone();
    status.emit(
        "identity",
        &format!("resolved as {} ({})", identity.canonical_name, identity.company_id),
    );

    // Stage 2: decide the search window and filing categories.
    status.emit("scope", "inferring search scope from the question");
    let mut scope = classify::question_scope(svc.llm.as_ref(), question).await;
    if let Some(years) = opts.lookback_years {
        scope.lookback_years = years.clamp(1, 10);
    }
    status.emit(
        "scope",
        &format!(
            "searching {} years for: {}",
            scope.lookback_years,
            scope.categories.join(", ")
        ),
    );

    // Stage 3: bounded pagination over the filing listings.
    status.emit("filings", "listing registry filings");
    let matches = match collect_filings(svc, &identity, &scope).await {
        Ok(matches) => matches,
        Err(e) => {
            result.error = Some(e.to_string());
            return result;
        }
    };
    result.filings_found = matches.len();
    let Some(primary) = matches.first().cloned() else {
        result.error = Some(format!(
            "no matching filings found for {} in the last {} years",
            identity.canonical_name, scope.lookback_years
        ));
        return result;
    };
    status.emit(
        "filings",
        &format!("{} matching filings, primary: {}", matches.len(), primary.title),
    );

    // Stage 4: acquire the primary filing, cache first. If its index
    // write failed, the extracted text is carried for retrieval fallback.
    status.emit("primary", &format!("fetching {}", primary.document_id));
    let unindexed_primary = match fetch_filing(svc, &identity, &primary).await {
        Ok(fallback) => fallback,
        Err(e) => {
            result.error = Some(e.to_string());
            return result;
        }
    };
    result.primary_title = Some(primary.title.clone());

    // Stage 5: supplementary filings, best effort.
    status.emit("history", "collecting supplementary filings");
    collect_supplementary_filings(svc, &identity, &scope, &matches, status).await;

    // Stage 6: brokerage company reports, best effort.
    status.emit("reports", "collecting brokerage company reports");
    result.company_reports = collect_company_reports(svc, &identity).await;

    // Stage 7: industry reports keyed off inferred keywords, best effort.
    status.emit("industry", "collecting industry reports");
    result.industry_reports = collect_industry_reports(svc, &identity, question).await;

    // Stage 8: retrieve evidence and synthesize the answer.
    status.emit("retrieval", "searching indexed chunks");
    let query = Query {
        company_name: Some(identity.canonical_name.clone()),
        question: question.to_string(),
        k: svc.config.retrieval.k,
    };
    let mut chunks = match retrieval::retrieve(&svc.store, &svc.config, &query).await {
        Ok(chunks) => chunks,
        Err(e) => {
            eprintln!("warn: retrieval failed: {}", e);
            Vec::new()
        }
    };

    // A primary filing that never made it into the index still has its
    // extracted text in memory; chunk that directly so the session can
    // answer from it.
    if chunks.is_empty() {
        if let Some(doc) = &unindexed_primary {
            chunks = in_memory_chunks(&svc.config, doc);
        }
    }

    if chunks.is_empty() {
        result.answer = Some(format!(
            "No indexed evidence matched this question for {}. The primary filing \
             was acquired but its content did not align with the query.",
            identity.canonical_name
        ));
        result.success = true;
        return result;
    }

    status.emit("answer", &format!("synthesizing from {} chunks", chunks.len()));
    match synthesize(svc, &identity, question, &chunks).await {
        Ok(answer) => {
            result.answer = Some(answer);
            result.success = true;
        }
        Err(LlmError::Quota(_)) => {
            result.answer = Some(degraded_answer(&result, &chunks));
            result.success = true;
        }
        Err(e) => {
            result.error = Some(e.to_string());
        }
    }

    result
}

async fn resolve_identity(svc: &Services, company: &str) -> Result<CompanyIdentity, SessionError> {
    let variants = classify::name_variants(svc.llm.as_ref(), company).await;

    // Exact pass first. The first variant with an exact hit wins and no
    // later variant is searched; results are kept for the containment
    // pass so no variant is searched twice.
    let mut searched: Vec<(String, Vec<CompanyEntry>)> = Vec::new();
    for variant in &variants {
        let entries = match svc.registry.search_companies(variant).await {
            Ok(entries) => entries,
            Err(e) => {
                eprintln!("warn: registry search for '{}' failed: {}", variant, e);
                continue;
            }
        };
        if let Some(identity) = exact_match(variant, &entries) {
            return Ok(identity);
        }
        searched.push((variant.clone(), entries));
    }

    containment_match(&searched).ok_or_else(|| SessionError::CompanyNotFound(company.to_string()))
}

fn has_ticker(entry: &CompanyEntry) -> bool {
    entry.ticker.as_deref().is_some_and(|t| !t.trim().is_empty())
}

fn to_identity(entry: &CompanyEntry) -> CompanyIdentity {
    CompanyIdentity {
        company_id: entry.company_id.clone(),
        canonical_name: entry.name.clone(),
        ticker: entry.ticker.clone().filter(|t| !t.trim().is_empty()),
    }
}

/// Exact case-insensitive match for one name variant, preferring listed
/// companies (ones with a ticker) over unlisted ones.
pub fn exact_match(variant: &str, entries: &[CompanyEntry]) -> Option<CompanyIdentity> {
    let needle = variant.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    let exact: Vec<&CompanyEntry> = entries
        .iter()
        .filter(|e| e.name.trim().to_lowercase() == needle)
        .collect();
    let pick = exact.iter().find(|e| has_ticker(e)).or_else(|| exact.first())?;
    Some(to_identity(pick))
}

/// Containment fallback over every searched variant: pools entries whose
/// name contains the variant, deduped by company id in search order, then
/// applies the same ticker preference across the whole pool. Used only
/// when no variant produced an exact match.
pub fn containment_match(searched: &[(String, Vec<CompanyEntry>)]) -> Option<CompanyIdentity> {
    let mut pool: Vec<&CompanyEntry> = Vec::new();
    for (variant, entries) in searched {
        let needle = variant.trim().to_lowercase();
        if needle.is_empty() {
            continue;
        }
        for entry in entries {
            if entry.name.to_lowercase().contains(&needle)
                && !pool.iter().any(|e| e.company_id == entry.company_id)
            {
                pool.push(entry);
            }
        }
    }
    let pick = pool.iter().find(|e| has_ticker(e)).or_else(|| pool.first())?;
    Some(to_identity(pick))
}

/// Pages through the registry listings inside the lookback window,
/// newest first, stopping at the page bound, the registry's reported
/// total, or the first page that yields a category match.
async fn collect_filings(
    svc: &Services,
    identity: &CompanyIdentity,
    scope: &classify::QuestionScope,
) -> anyhow::Result<Vec<FilingListing>> {
    let date_to = Local::now().date_naive();
    let date_from = date_to - ChronoDuration::days(365 * scope.lookback_years);

    let mut matched: Vec<FilingListing> = Vec::new();
    let max_pages = svc.config.registry.max_pages as u32;

    for page in 1..=max_pages {
        let listings_page = svc
            .registry
            .list_documents(&identity.company_id, date_from, date_to, page)
            .await?;

        for listing in &listings_page.listings {
            if matches_category(&listing.title, &scope.categories) {
                matched.push(listing.clone());
            }
        }

        if !matched.is_empty() || page >= listings_page.total_pages {
            break;
        }
    }

    matched.sort_by(|a, b| date_sort_key(&b.published_date).cmp(&date_sort_key(&a.published_date)));
    Ok(matched)
}

fn matches_category(title: &str, categories: &[String]) -> bool {
    let title = title.to_lowercase();
    categories
        .iter()
        .any(|c| !c.trim().is_empty() && title.contains(&c.trim().to_lowercase()))
}

/// Supplementary filings beyond the primary: first the remaining
/// category matches, then a second bounded listing pass with the
/// default category set when the question narrowed it. A catalog that
/// already holds enough filings for the company skips the extra pass.
async fn collect_supplementary_filings(
    svc: &Services,
    identity: &CompanyIdentity,
    scope: &classify::QuestionScope,
    matches: &[FilingListing],
    status: &StatusSender,
) {
    let mut fetched = 0usize;
    let mut seen: Vec<String> = matches.iter().map(|l| l.document_id.clone()).collect();

    for listing in matches.iter().skip(1) {
        if fetched >= MAX_HISTORICAL_FILINGS {
            return;
        }
        status.emit("history", &format!("fetching {}", listing.title));
        match fetch_filing(svc, identity, listing).await {
            Ok(_) => fetched += 1,
            Err(e) => {
                eprintln!("warn: skipping historical filing {}: {}", listing.document_id, e)
            }
        }
    }
    if fetched >= MAX_HISTORICAL_FILINGS {
        return;
    }

    let broad = classify::QuestionScope {
        lookback_years: scope.lookback_years,
        categories: classify::DEFAULT_TARGET_CATEGORIES
            .iter()
            .map(|c| c.to_string())
            .collect(),
    };
    if same_categories(&scope.categories, &broad.categories) {
        return;
    }

    match svc.store.find_filings_by_company(&identity.canonical_name).await {
        Ok(cached) if cached.len() > MAX_HISTORICAL_FILINGS => return,
        Ok(_) => {}
        Err(e) => eprintln!("warn: cached filing lookup failed: {}", e),
    }

    let extra = match collect_filings(svc, identity, &broad).await {
        Ok(listings) => listings,
        Err(e) => {
            eprintln!("warn: supplementary listing pass failed: {}", e);
            return;
        }
    };
    for listing in extra {
        if fetched >= MAX_HISTORICAL_FILINGS {
            return;
        }
        if seen.contains(&listing.document_id) {
            continue;
        }
        status.emit("history", &format!("fetching {}", listing.title));
        match fetch_filing(svc, identity, &listing).await {
            Ok(_) => fetched += 1,
            Err(e) => {
                eprintln!("warn: skipping supplementary filing {}: {}", listing.document_id, e)
            }
        }
        seen.push(listing.document_id);
    }
}

fn same_categories(a: &[String], b: &[String]) -> bool {
    let norm = |cats: &[String]| {
        let mut v: Vec<String> = cats.iter().map(|c| c.trim().to_lowercase()).collect();
        v.sort();
        v
    };
    norm(a) == norm(b)
}

/// Cache-first filing acquisition under a per-document lock. A cached
/// document short-circuits the download entirely. An empty extraction
/// is an error; an index write failure is logged and the extracted
/// document is returned so the caller can keep using its text.
async fn fetch_filing(
    svc: &Services,
    identity: &CompanyIdentity,
    listing: &FilingListing,
) -> anyhow::Result<Option<Document>> {
    let lock = svc.doc_lock(&listing.document_id);
    let _guard = lock.lock().await;

    if svc.store.exists(&listing.document_id).await? {
        return Ok(None);
    }

    let bytes = svc.registry.fetch_document(&listing.document_id).await?;
    let text = extract::document_text(&bytes)?;
    if text.trim().is_empty() {
        return Err(SessionError::EmptyDocument(listing.document_id.clone()).into());
    }

    let doc = Document {
        document_id: listing.document_id.clone(),
        source_type: SourceType::Filing,
        company_name: identity.canonical_name.clone(),
        title: listing.title.clone(),
        published_date: listing.published_date.clone(),
        raw_text: text,
        industry_tags: Vec::new(),
        chunk_count: 0,
    };

    if let Err(e) = svc.store.ingest(&svc.config, &doc).await {
        match e {
            IndexError::Duplicate(id) => {
                eprintln!("warn: document {} already indexed with different content", id);
            }
            IndexError::Write(msg) => {
                eprintln!("warn: index write failed for {}: {}", listing.document_id, msg);
            }
        }
        return Ok(Some(doc));
    }

    Ok(None)
}

/// Evidence built straight from a document that never reached the
/// index, chunked with the configured window.
fn in_memory_chunks(config: &Config, doc: &Document) -> Vec<ScoredChunk> {
    let pieces = split_text(
        &doc.raw_text,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    );
    let chunk_count = pieces.len() as i64;
    pieces
        .into_iter()
        .take(config.retrieval.k)
        .enumerate()
        .map(|(i, text)| ScoredChunk {
            entry: VectorEntry {
                document_id: doc.document_id.clone(),
                chunk_index: i as i64,
                chunk_count,
                company_name: doc.company_name.clone(),
                published_date: doc.published_date.clone(),
                source_type: doc.source_type,
                text,
            },
            distance: 0.0,
        })
        .collect()
}

/// Brokerage reports about the company itself. Cached reports are
/// reused wholesale; otherwise the portal is scraped and each report
/// is downloaded and indexed. Every failure here is non-fatal.
async fn collect_company_reports(svc: &Services, identity: &CompanyIdentity) -> Vec<ReportRef> {
    match svc.store.find_by_company(&identity.canonical_name).await {
        Ok(cached) if !cached.is_empty() => {
            return cached
                .iter()
                .take(svc.config.brokerage.max_company_reports)
                .map(|d| ReportRef {
                    title: d.title.clone(),
                    published_date: d.published_date.clone(),
                })
                .collect();
        }
        Ok(_) => {}
        Err(e) => eprintln!("warn: company report lookup failed: {}", e),
    }

    let entries = match svc.portal.search(&identity.canonical_name).await {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("warn: portal search for '{}' failed: {}", identity.canonical_name, e);
            return Vec::new();
        }
    };

    let limit = svc.config.brokerage.max_company_reports;
    let mut refs = Vec::new();
    for entry in entries.into_iter().take(limit) {
        match index_portal_report(svc, &entry, "bk-co-", &identity.canonical_name, &[]).await {
            Ok(()) => refs.push(ReportRef {
                title: entry.title,
                published_date: entry.published_date,
            }),
            Err(e) => eprintln!("warn: skipping company report '{}': {}", entry.title, e),
        }
    }
    refs
}

/// Industry reports found via inferred keywords, cached tags first.
async fn collect_industry_reports(
    svc: &Services,
    identity: &CompanyIdentity,
    question: &str,
) -> Vec<ReportRef> {
    let hint = match svc.registry.get_company_profile(&identity.company_id).await {
        Ok(hint) => hint,
        Err(e) => {
            eprintln!("warn: company profile lookup failed: {}", e);
            None
        }
    };

    let keywords = classify::industry_keywords(svc.llm.as_ref(), question, hint.as_deref()).await;
    if keywords.is_empty() {
        return Vec::new();
    }

    match svc.store.find_by_keywords(&keywords).await {
        Ok(cached) if !cached.is_empty() => {
            return cached
                .iter()
                .take(svc.config.brokerage.max_industry_reports)
                .map(|d| ReportRef {
                    title: d.title.clone(),
                    published_date: d.published_date.clone(),
                })
                .collect();
        }
        Ok(_) => {}
        Err(e) => eprintln!("warn: industry report lookup failed: {}", e),
    }

    let limit = svc.config.brokerage.max_industry_reports;
    let mut refs = Vec::new();
    'outer: for keyword in &keywords {
        let entries = match svc.portal.search(keyword).await {
            Ok(entries) => entries,
            Err(e) => {
                eprintln!("warn: portal search for '{}' failed: {}", keyword, e);
                continue;
            }
        };
        for entry in entries {
            if refs.len() >= limit {
                break 'outer;
            }
            match index_portal_report(svc, &entry, "bk-ind-", &identity.canonical_name, &keywords)
                .await
            {
                Ok(()) => refs.push(ReportRef {
                    title: entry.title,
                    published_date: entry.published_date,
                }),
                Err(e) => eprintln!("warn: skipping industry report '{}': {}", entry.title, e),
            }
        }
    }
    refs
}

async fn index_portal_report(
    svc: &Services,
    entry: &PortalEntry,
    id_prefix: &str,
    company_name: &str,
    industry_tags: &[String],
) -> anyhow::Result<()> {
    let document_id = scraped_id(id_prefix, &entry.pdf_url);
    let lock = svc.doc_lock(&document_id);
    let _guard = lock.lock().await;

    if svc.store.exists(&document_id).await? {
        return Ok(());
    }

    let bytes = svc.portal.download(&entry.pdf_url).await?;
    let text = extract::document_text(&bytes)?;
    if text.trim().is_empty() {
        return Err(SessionError::EmptyDocument(document_id).into());
    }

    let source_type = if id_prefix == "bk-ind-" {
        SourceType::BrokerageIndustry
    } else {
        SourceType::BrokerageCompany
    };

    let doc = Document {
        document_id,
        source_type,
        company_name: company_name.to_string(),
        title: entry.title.clone(),
        published_date: entry.published_date.clone(),
        raw_text: text,
        industry_tags: industry_tags.to_vec(),
        chunk_count: 0,
    };

    svc.store
        .ingest(&svc.config, &doc)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    Ok(())
}

async fn synthesize(
    svc: &Services,
    identity: &CompanyIdentity,
    question: &str,
    chunks: &[ScoredChunk],
) -> Result<String, LlmError> {
    let evidence = format_evidence(chunks);
    let prompt = format!(
        "You are a financial analyst. Answer the question about {} using only \
         the evidence below. Cite figures as they appear and say so when the \
         evidence does not cover part of the question.\n\n\
         Question: {}\n\nEvidence:\n{}",
        identity.canonical_name, question, evidence
    );
    svc.llm.generate(&prompt, Task::Answer).await
}

fn format_evidence(chunks: &[ScoredChunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        let e = &chunk.entry;
        out.push_str(&format!(
            "[{} | {} | {} | chunk {}/{}]\n{}\n\n",
            e.source_type.as_str(),
            e.company_name,
            e.published_date,
            e.chunk_index + 1,
            e.chunk_count,
            e.text
        ));
    }
    out
}

/// Structured fallback when the language model quota is exhausted:
/// the evidence was collected, so report what exists instead of failing.
fn degraded_answer(result: &AnalysisResult, chunks: &[ScoredChunk]) -> String {
    let mut out = String::new();
    out.push_str("Answer synthesis is temporarily unavailable (model quota exceeded). ");
    out.push_str("Collected evidence summary:\n");
    if let Some(title) = &result.primary_title {
        out.push_str(&format!("- Primary filing: {}\n", title));
    }
    out.push_str(&format!("- Matching filings found: {}\n", result.filings_found));
    for r in &result.company_reports {
        out.push_str(&format!("- Company report: {} ({})\n", r.title, r.published_date));
    }
    for r in &result.industry_reports {
        out.push_str(&format!("- Industry report: {} ({})\n", r.title, r.published_date));
    }
    out.push_str(&format!("- Relevant indexed chunks: {}\n", chunks.len()));
    out
}

struct SessionSlot {
    status: Option<mpsc::Receiver<StatusEvent>>,
    result: Option<AnalysisResult>,
    done: bool,
}

/// Owns running sessions. Status streams and results are each handed
/// out at most once; a retrieved result removes the session.
pub struct SessionHub {
    services: Arc<Services>,
    sessions: Arc<Mutex<HashMap<String, SessionSlot>>>,
}

impl SessionHub {
    pub fn new(services: Arc<Services>) -> SessionHub {
        SessionHub {
            services,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Spawns a session and returns its id immediately.
    pub async fn start_session(
        &self,
        company: String,
        question: String,
        opts: SessionOptions,
    ) -> String {
        let session_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(64);

        {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(
                session_id.clone(),
                SessionSlot {
                    status: Some(rx),
                    result: None,
                    done: false,
                },
            );
        }

        let services = self.services.clone();
        let sessions = self.sessions.clone();
        let id = session_id.clone();

        tokio::spawn(async move {
            let status = StatusSender::new(tx);
            let result =
                run_analysis(&services, &company, &question, &opts, &status).await;
            if result.success {
                status.emit("done", "analysis complete");
            } else {
                status.emit(
                    "done",
                    result.error.as_deref().unwrap_or("analysis failed"),
                );
            }
            drop(status);

            let mut sessions = sessions.lock().await;
            if let Some(slot) = sessions.get_mut(&id) {
                slot.result = Some(result);
                slot.done = true;
            }
        });

        session_id
    }

    /// Takes the status stream for a session. `None` when the session
    /// is unknown or the stream was already claimed.
    pub async fn take_status(&self, session_id: &str) -> Option<mpsc::Receiver<StatusEvent>> {
        let mut sessions = self.sessions.lock().await;
        sessions.get_mut(session_id)?.status.take()
    }

    /// Takes the result of a finished session, removing it. `None`
    /// when the session is unknown or still running.
    pub async fn take_result(&self, session_id: &str) -> Option<AnalysisResult> {
        let mut sessions = self.sessions.lock().await;
        let done = sessions.get(session_id)?.done;
        if !done {
            return None;
        }
        sessions.remove(session_id)?.result
    }
}
