//! End-to-end pipeline tests with in-process fakes for the registry,
//! the brokerage portal, and the language model. The hash embedding
//! provider keeps everything deterministic and offline.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use filinglens::brokerage::{BrokeragePortal, PortalEntry};
use filinglens::catalog::Store;
use filinglens::config::{
    BrokerageConfig, ChunkingConfig, Config, EmbeddingConfig, LlmConfig, RegistryConfig,
    RetrievalConfig, ServerConfig, StorageConfig,
};
use filinglens::llm::{LanguageModel, LlmError, Task};
use filinglens::migrate::apply_schema;
use filinglens::models::Query;
use filinglens::registry::{
    CompanyEntry, FilingListing, ListingsPage, RegistryApi, RegistryError,
};
use filinglens::retrieval::retrieve;
use filinglens::session::{run_analysis, Services, SessionOptions, StatusSender};

fn test_config(tmp: &TempDir) -> Config {
    Config {
        storage: StorageConfig {
            db_path: tmp.path().join("flens.db"),
        },
        chunking: ChunkingConfig {
            chunk_size: 200,
            chunk_overlap: 40,
        },
        retrieval: RetrievalConfig { k: 8, oversample: 3 },
        registry: RegistryConfig {
            base_url: "http://registry.test".to_string(),
            api_key_env: "REGISTRY_API_KEY".to_string(),
            timeout_secs: 5,
            max_pages: 5,
            page_size: 50,
        },
        brokerage: BrokerageConfig::default(),
        embedding: EmbeddingConfig {
            dims: 64,
            ..EmbeddingConfig::default()
        },
        llm: LlmConfig::default(),
        server: ServerConfig::default(),
    }
}

struct FakeRegistry {
    companies: Vec<CompanyEntry>,
    pages: Vec<Vec<FilingListing>>,
    total_pages: u32,
    documents: HashMap<String, Vec<u8>>,
    fetch_calls: AtomicUsize,
    list_calls: AtomicUsize,
    windows: Mutex<Vec<(NaiveDate, NaiveDate)>>,
}

impl FakeRegistry {
    fn new(companies: Vec<CompanyEntry>, pages: Vec<Vec<FilingListing>>) -> FakeRegistry {
        let total_pages = pages.len() as u32;
        FakeRegistry {
            companies,
            pages,
            total_pages,
            documents: HashMap::new(),
            fetch_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            windows: Mutex::new(Vec::new()),
        }
    }

    fn with_total_pages(mut self, total_pages: u32) -> FakeRegistry {
        self.total_pages = total_pages;
        self
    }
}

#[async_trait]
impl RegistryApi for FakeRegistry {
    async fn search_companies(&self, name: &str) -> Result<Vec<CompanyEntry>, RegistryError> {
        let needle = name.to_lowercase();
        Ok(self
            .companies
            .iter()
            .filter(|c| c.name.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn list_documents(
        &self,
        _company_id: &str,
        date_from: NaiveDate,
        date_to: NaiveDate,
        page: u32,
    ) -> Result<ListingsPage, RegistryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.windows.lock().unwrap().push((date_from, date_to));
        let listings = self
            .pages
            .get((page - 1) as usize)
            .cloned()
            .unwrap_or_default();
        Ok(ListingsPage {
            listings,
            total_pages: self.total_pages,
        })
    }

    async fn fetch_document(&self, document_id: &str) -> Result<Vec<u8>, RegistryError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.documents.get(document_id).cloned().unwrap_or_else(|| {
            format!(
                "Annual filing {}. Revenue grew twelve percent year over year driven by \
                 strong demand. Operating profit margin expanded on cost discipline. \
                 The company expects continued growth in its core segments next year.",
                document_id
            )
            .into_bytes()
        }))
    }

    async fn get_company_profile(
        &self,
        _company_id: &str,
    ) -> Result<Option<String>, RegistryError> {
        Ok(Some("memory semiconductors".to_string()))
    }
}

struct FakePortal {
    entries: Vec<PortalEntry>,
    fail: bool,
    download_calls: AtomicUsize,
}

impl FakePortal {
    fn new(entries: Vec<PortalEntry>) -> FakePortal {
        FakePortal {
            entries,
            fail: false,
            download_calls: AtomicUsize::new(0),
        }
    }

    fn broken() -> FakePortal {
        FakePortal {
            entries: Vec::new(),
            fail: true,
            download_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BrokeragePortal for FakePortal {
    async fn search(&self, _keyword: &str) -> anyhow::Result<Vec<PortalEntry>> {
        if self.fail {
            anyhow::bail!("portal unreachable");
        }
        Ok(self.entries.clone())
    }

    async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        if self.fail {
            anyhow::bail!("portal unreachable");
        }
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "Research report discussing the company outlook and sector dynamics. \
             Source document located at {}.",
            url
        )
        .into_bytes())
    }
}

struct FakeLlm {
    quota_on_answer: bool,
    variants: Vec<String>,
}

impl FakeLlm {
    fn new() -> FakeLlm {
        FakeLlm {
            quota_on_answer: false,
            variants: vec!["Acme Corp".to_string()],
        }
    }

    fn over_quota() -> FakeLlm {
        FakeLlm {
            quota_on_answer: true,
            ..FakeLlm::new()
        }
    }

    fn with_variants(variants: &[&str]) -> FakeLlm {
        FakeLlm {
            variants: variants.iter().map(|v| v.to_string()).collect(),
            ..FakeLlm::new()
        }
    }
}

#[async_trait]
impl LanguageModel for FakeLlm {
    async fn generate(&self, prompt: &str, task: Task) -> Result<String, LlmError> {
        match task {
            Task::Answer => {
                if self.quota_on_answer {
                    Err(LlmError::Quota("insufficient_quota".to_string()))
                } else {
                    Ok("Based on the indexed filings, revenue grew strongly.".to_string())
                }
            }
            Task::Classify => {
                if prompt.contains("lookback_years") {
                    Ok("{\"lookback_years\": 3, \"categories\": [\"Annual Report\"]}".to_string())
                } else if prompt.contains("variants") {
                    Ok(serde_json::json!({ "variants": self.variants }).to_string())
                } else if prompt.contains("keywords") {
                    Ok("{\"keywords\": [\"semiconductors\"]}".to_string())
                } else {
                    Ok("{}".to_string())
                }
            }
        }
    }
}

fn acme() -> Vec<CompanyEntry> {
    vec![CompanyEntry {
        company_id: "00126380".to_string(),
        name: "Acme Corp".to_string(),
        ticker: Some("005930".to_string()),
    }]
}

fn annual_report_page() -> Vec<Vec<FilingListing>> {
    vec![vec![
        FilingListing {
            document_id: "20240315000001".to_string(),
            title: "Annual Report (Fiscal 2023)".to_string(),
            published_date: "2024-03-15".to_string(),
        },
        FilingListing {
            document_id: "20240220000002".to_string(),
            title: "Insider Trading Disclosure".to_string(),
            published_date: "2024-02-20".to_string(),
        },
    ]]
}

fn portal_entries() -> Vec<PortalEntry> {
    vec![PortalEntry {
        title: "Acme Corp initiation".to_string(),
        published_date: "24.05.01".to_string(),
        pdf_url: "https://files.test/reports/acme-init.pdf".to_string(),
    }]
}

async fn setup(
    config: Config,
    registry: Arc<FakeRegistry>,
    portal: Arc<FakePortal>,
    llm: Arc<FakeLlm>,
) -> Services {
    let store = Store::open(&config).await.unwrap();
    apply_schema(store.pool()).await.unwrap();
    Services::new(config, store, registry, portal, llm)
}

#[tokio::test]
async fn answers_from_acquired_filing() {
    let tmp = TempDir::new().unwrap();
    let registry = Arc::new(FakeRegistry::new(acme(), annual_report_page()));
    let portal = Arc::new(FakePortal::new(portal_entries()));
    let svc = setup(test_config(&tmp), registry.clone(), portal, Arc::new(FakeLlm::new())).await;

    let result = run_analysis(
        &svc,
        "acme",
        "How did revenue develop?",
        &SessionOptions::default(),
        &StatusSender::disabled(),
    )
    .await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.company_name, "Acme Corp");
    assert_eq!(result.company_id.as_deref(), Some("00126380"));
    assert_eq!(result.ticker.as_deref(), Some("005930"));
    assert_eq!(result.filings_found, 1);
    assert_eq!(
        result.primary_title.as_deref(),
        Some("Annual Report (Fiscal 2023)")
    );
    let answer = result.answer.unwrap();
    assert!(answer.contains("revenue grew"));
    assert!(!result.company_reports.is_empty());

    let stats = svc.store.stats().await.unwrap();
    assert!(stats.document_count >= 2, "filing plus at least one report");
    assert!(stats.chunk_count >= stats.document_count);
}

#[tokio::test]
async fn primary_filing_fetched_once_across_sessions() {
    let tmp = TempDir::new().unwrap();
    let registry = Arc::new(FakeRegistry::new(acme(), annual_report_page()));
    let portal = Arc::new(FakePortal::new(portal_entries()));
    let svc = setup(test_config(&tmp), registry.clone(), portal, Arc::new(FakeLlm::new())).await;

    for question in ["How did revenue develop?", "What about margins?"] {
        let result = run_analysis(
            &svc,
            "acme",
            question,
            &SessionOptions::default(),
            &StatusSender::disabled(),
        )
        .await;
        assert!(result.success, "error: {:?}", result.error);
    }

    assert_eq!(
        registry.fetch_calls.load(Ordering::SeqCst),
        1,
        "second session must hit the cache"
    );
}

#[tokio::test]
async fn pagination_stops_at_configured_bound() {
    let tmp = TempDir::new().unwrap();
    // No page ever matches the target categories and the registry
    // claims far more pages than the bound allows.
    let noise = vec![FilingListing {
        document_id: "x".to_string(),
        title: "Shareholder Meeting Notice".to_string(),
        published_date: "2024-01-01".to_string(),
    }];
    let registry = Arc::new(
        FakeRegistry::new(acme(), vec![noise.clone(); 5]).with_total_pages(100),
    );
    let portal = Arc::new(FakePortal::new(Vec::new()));
    let svc = setup(test_config(&tmp), registry.clone(), portal, Arc::new(FakeLlm::new())).await;

    let result = run_analysis(
        &svc,
        "acme",
        "How did revenue develop?",
        &SessionOptions::default(),
        &StatusSender::disabled(),
    )
    .await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("no matching filings"));
    assert_eq!(registry.list_calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn lookback_override_is_clamped() {
    let tmp = TempDir::new().unwrap();
    let registry = Arc::new(FakeRegistry::new(acme(), annual_report_page()));
    let portal = Arc::new(FakePortal::new(Vec::new()));
    let svc = setup(test_config(&tmp), registry.clone(), portal, Arc::new(FakeLlm::new())).await;

    // Inferred scope: 3 years.
    run_analysis(
        &svc,
        "acme",
        "How did revenue develop?",
        &SessionOptions::default(),
        &StatusSender::disabled(),
    )
    .await;

    // Explicit 25 years clamps to 10.
    run_analysis(
        &svc,
        "acme",
        "Long-term trends?",
        &SessionOptions {
            lookback_years: Some(25),
        },
        &StatusSender::disabled(),
    )
    .await;

    let windows = registry.windows.lock().unwrap();
    assert_eq!((windows[0].1 - windows[0].0).num_days(), 3 * 365);
    let last = windows.last().copied().unwrap();
    assert_eq!((last.1 - last.0).num_days(), 10 * 365);
}

#[tokio::test]
async fn broken_portal_is_non_fatal() {
    let tmp = TempDir::new().unwrap();
    let registry = Arc::new(FakeRegistry::new(acme(), annual_report_page()));
    let portal = Arc::new(FakePortal::broken());
    let svc = setup(test_config(&tmp), registry, portal, Arc::new(FakeLlm::new())).await;

    let result = run_analysis(
        &svc,
        "acme",
        "How did revenue develop?",
        &SessionOptions::default(),
        &StatusSender::disabled(),
    )
    .await;

    assert!(result.success, "error: {:?}", result.error);
    assert!(result.answer.is_some());
    assert!(result.company_reports.is_empty());
    assert!(result.industry_reports.is_empty());
}

#[tokio::test]
async fn quota_yields_degraded_answer() {
    let tmp = TempDir::new().unwrap();
    let registry = Arc::new(FakeRegistry::new(acme(), annual_report_page()));
    let portal = Arc::new(FakePortal::new(portal_entries()));
    let svc = setup(test_config(&tmp), registry, portal, Arc::new(FakeLlm::over_quota())).await;

    let result = run_analysis(
        &svc,
        "acme",
        "How did revenue develop?",
        &SessionOptions::default(),
        &StatusSender::disabled(),
    )
    .await;

    assert!(result.success);
    let answer = result.answer.unwrap();
    assert!(answer.contains("quota"));
    assert!(answer.contains("Annual Report (Fiscal 2023)"));
}

#[tokio::test]
async fn unknown_company_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let registry = Arc::new(FakeRegistry::new(Vec::new(), Vec::new()));
    let portal = Arc::new(FakePortal::new(Vec::new()));
    let svc = setup(test_config(&tmp), registry, portal, Arc::new(FakeLlm::new())).await;

    let result = run_analysis(
        &svc,
        "Nonexistent Industries",
        "Anything?",
        &SessionOptions::default(),
        &StatusSender::disabled(),
    )
    .await;

    assert!(!result.success);
    assert!(result.answer.is_none());
    assert!(result.error.unwrap().contains("not found"));
}

#[tokio::test]
async fn reset_clears_catalog_and_index() {
    let tmp = TempDir::new().unwrap();
    let registry = Arc::new(FakeRegistry::new(acme(), annual_report_page()));
    let portal = Arc::new(FakePortal::new(portal_entries()));
    let svc = setup(test_config(&tmp), registry, portal, Arc::new(FakeLlm::new())).await;

    run_analysis(
        &svc,
        "acme",
        "How did revenue develop?",
        &SessionOptions::default(),
        &StatusSender::disabled(),
    )
    .await;
    assert!(svc.store.stats().await.unwrap().document_count > 0);

    svc.store.reset().await.unwrap();

    let stats = svc.store.stats().await.unwrap();
    assert_eq!(stats.document_count, 0);
    assert_eq!(stats.chunk_count, 0);
    assert_eq!(stats.company_count, 0);
}

#[tokio::test]
async fn exact_match_on_later_variant_wins_over_containment() {
    let tmp = TempDir::new().unwrap();
    let companies = vec![
        CompanyEntry {
            company_id: "SUBSTR".to_string(),
            name: "Acme Corp Holdings".to_string(),
            ticker: Some("111111".to_string()),
        },
        CompanyEntry {
            company_id: "EXACT".to_string(),
            name: "Acme Corporation".to_string(),
            ticker: None,
        },
    ];
    let registry = Arc::new(FakeRegistry::new(companies, annual_report_page()));
    let portal = Arc::new(FakePortal::new(Vec::new()));
    let llm = Arc::new(FakeLlm::with_variants(&["Acme Corp", "Acme Corporation"]));
    let svc = setup(test_config(&tmp), registry, portal, llm).await;

    let result = run_analysis(
        &svc,
        "Acme Corp",
        "How did revenue develop?",
        &SessionOptions::default(),
        &StatusSender::disabled(),
    )
    .await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.company_id.as_deref(), Some("EXACT"));
    assert_eq!(result.company_name, "Acme Corporation");
}

#[tokio::test]
async fn supplementary_pass_widens_to_default_categories() {
    let tmp = TempDir::new().unwrap();
    // The classifier narrows to annual reports; half-year filings are
    // only reachable through the second, default-category pass.
    let page = vec![
        FilingListing {
            document_id: "f-annual".to_string(),
            title: "Annual Report (Fiscal 2023)".to_string(),
            published_date: "2024-03-15".to_string(),
        },
        FilingListing {
            document_id: "f-h1".to_string(),
            title: "Half-Year Report (2023 H2)".to_string(),
            published_date: "2023-09-15".to_string(),
        },
        FilingListing {
            document_id: "f-h2".to_string(),
            title: "Half-Year Report (2023 H1)".to_string(),
            published_date: "2023-03-10".to_string(),
        },
        FilingListing {
            document_id: "f-h3".to_string(),
            title: "Half-Year Report (2022 H2)".to_string(),
            published_date: "2022-09-12".to_string(),
        },
        FilingListing {
            document_id: "f-h4".to_string(),
            title: "Half-Year Report (2022 H1)".to_string(),
            published_date: "2022-03-08".to_string(),
        },
    ];
    let registry = Arc::new(FakeRegistry::new(acme(), vec![page]));
    let portal = Arc::new(FakePortal::new(Vec::new()));
    let svc = setup(test_config(&tmp), registry.clone(), portal, Arc::new(FakeLlm::new())).await;

    let result = run_analysis(
        &svc,
        "acme",
        "How did revenue develop?",
        &SessionOptions::default(),
        &StatusSender::disabled(),
    )
    .await;
    assert!(result.success, "error: {:?}", result.error);

    // The primary plus three supplementary filings, newest first.
    for id in ["f-annual", "f-h1", "f-h2", "f-h3"] {
        assert!(svc.store.exists(id).await.unwrap(), "missing {}", id);
    }
    assert!(!svc.store.exists("f-h4").await.unwrap());
    assert_eq!(registry.list_calls.load(Ordering::SeqCst), 2);

    // A second session finds enough cached filings to skip the second
    // listing pass entirely.
    let fetches_before = registry.fetch_calls.load(Ordering::SeqCst);
    run_analysis(
        &svc,
        "acme",
        "What about margins?",
        &SessionOptions::default(),
        &StatusSender::disabled(),
    )
    .await;
    assert_eq!(registry.list_calls.load(Ordering::SeqCst), 3);
    assert_eq!(registry.fetch_calls.load(Ordering::SeqCst), fetches_before);
}

#[tokio::test]
async fn index_write_failure_answers_from_extracted_text() {
    let tmp = TempDir::new().unwrap();
    let registry = Arc::new(FakeRegistry::new(acme(), annual_report_page()));
    let portal = Arc::new(FakePortal::new(Vec::new()));
    let svc = setup(test_config(&tmp), registry, portal, Arc::new(FakeLlm::new())).await;

    // Every vector write fails from here on; the catalog itself stays up.
    sqlx::query("DROP TABLE chunk_vectors")
        .execute(svc.store.pool())
        .await
        .unwrap();

    let result = run_analysis(
        &svc,
        "acme",
        "How did revenue develop?",
        &SessionOptions::default(),
        &StatusSender::disabled(),
    )
    .await;

    assert!(result.success, "error: {:?}", result.error);
    let answer = result.answer.unwrap();
    assert!(
        answer.contains("revenue grew"),
        "expected a synthesized answer from the unindexed filing, got: {}",
        answer
    );
}

#[tokio::test]
async fn catalog_and_index_chunk_counts_agree() {
    let tmp = TempDir::new().unwrap();
    let registry = Arc::new(FakeRegistry::new(acme(), annual_report_page()));
    let portal = Arc::new(FakePortal::new(portal_entries()));
    let svc = setup(test_config(&tmp), registry, portal, Arc::new(FakeLlm::new())).await;

    run_analysis(
        &svc,
        "acme",
        "How did revenue develop?",
        &SessionOptions::default(),
        &StatusSender::disabled(),
    )
    .await;

    let catalog_sum: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(chunk_count), 0) FROM documents")
            .fetch_one(svc.store.pool())
            .await
            .unwrap();
    let stats = svc.store.stats().await.unwrap();
    assert!(catalog_sum > 0);
    assert_eq!(catalog_sum, stats.chunk_count);

    svc.store.reset().await.unwrap();
    let stats = svc.store.stats().await.unwrap();
    assert_eq!(stats.document_count, 0);
    assert_eq!(stats.chunk_count, 0);
}

#[tokio::test]
async fn retrieval_is_deterministic() {
    let tmp = TempDir::new().unwrap();
    let registry = Arc::new(FakeRegistry::new(acme(), annual_report_page()));
    let portal = Arc::new(FakePortal::new(portal_entries()));
    let config = test_config(&tmp);
    let svc = setup(config.clone(), registry, portal, Arc::new(FakeLlm::new())).await;

    run_analysis(
        &svc,
        "acme",
        "How did revenue develop?",
        &SessionOptions::default(),
        &StatusSender::disabled(),
    )
    .await;

    let query = Query {
        company_name: Some("Acme Corp".to_string()),
        question: "revenue growth".to_string(),
        k: 8,
    };
    let first = retrieve(&svc.store, &config, &query).await.unwrap();
    let second = retrieve(&svc.store, &config, &query).await.unwrap();
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[tokio::test]
async fn retrieval_filters_to_requested_company() {
    let tmp = TempDir::new().unwrap();
    let registry = Arc::new(FakeRegistry::new(acme(), annual_report_page()));
    let portal = Arc::new(FakePortal::new(Vec::new()));
    let config = test_config(&tmp);
    let svc = setup(config.clone(), registry, portal, Arc::new(FakeLlm::new())).await;

    for (id, company) in [("f-acme", "Acme Corp"), ("f-globex", "Globex")] {
        let doc = filinglens::models::Document {
            document_id: id.to_string(),
            source_type: filinglens::models::SourceType::Filing,
            company_name: company.to_string(),
            title: format!("{} annual report", company),
            published_date: "2024-03-15".to_string(),
            raw_text: format!(
                "{} reported revenue growth and improved operating margins this year.",
                company
            ),
            industry_tags: Vec::new(),
            chunk_count: 0,
        };
        svc.store.ingest(&config, &doc).await.unwrap();
    }

    let hits = retrieve(
        &svc.store,
        &config,
        &Query {
            company_name: Some("acme corp".to_string()),
            question: "revenue growth".to_string(),
            k: 8,
        },
    )
    .await
    .unwrap();

    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.entry.company_name == "Acme Corp"));
}
