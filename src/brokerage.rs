//! Brokerage research portal client.
//!
//! Reports are discovered by scraping the portal's listing pages: each
//! row carries a title anchor, a PDF link, and a publish date. Scraped
//! documents have no registry id, so they get a stable synthetic id
//! derived from the PDF URL.

use async_trait::async_trait;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::catalog::date_sort_key;
use crate::config::BrokerageConfig;

/// One report row scraped from a portal listing page.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalEntry {
    pub title: String,
    pub published_date: String,
    pub pdf_url: String,
}

/// Brokerage portal operations: keyword search over report listings
/// and raw PDF download.
#[async_trait]
pub trait BrokeragePortal: Send + Sync {
    async fn search(&self, keyword: &str) -> anyhow::Result<Vec<PortalEntry>>;
    async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>>;
}

/// Stable document id for a scraped report: prefix plus a 16-hex-char
/// digest of the PDF URL. The same URL always maps to the same id, so
/// re-scrapes dedupe against the catalog.
pub fn scraped_id(prefix: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}{}", prefix, &hex[..16])
}

pub struct HttpPortal {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPortal {
    pub fn from_config(config: &BrokerageConfig) -> anyhow::Result<HttpPortal> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(HttpPortal {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl BrokeragePortal for HttpPortal {
    async fn search(&self, keyword: &str) -> anyhow::Result<Vec<PortalEntry>> {
        let url = format!("{}/research/report_search.naver", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("keyword", keyword), ("x", "search")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("portal search failed: {}", status);
        }

        let html = response.text().await?;
        let mut entries = parse_listing(&html, &self.base_url);
        entries.sort_by(|a, b| {
            date_sort_key(&b.published_date).cmp(&date_sort_key(&a.published_date))
        });
        Ok(entries)
    }

    async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("report download failed: {}", status);
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Extracts report rows from a listing page. A row qualifies when it
/// has a non-empty title anchor and a `.pdf` link; the date is taken
/// from the first cell that parses as a date. Rows sharing a PDF URL
/// are deduplicated.
pub fn parse_listing(html: &str, base_url: &str) -> Vec<PortalEntry> {
    let document = Html::parse_document(html);
    let row_sel = match Selector::parse("tr") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    let cell_sel = match Selector::parse("td") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    let link_sel = match Selector::parse("a") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut entries: Vec<PortalEntry> = Vec::new();

    for row in document.select(&row_sel) {
        let mut title = String::new();
        let mut pdf_url = String::new();
        let mut published_date = String::new();

        for link in row.select(&link_sel) {
            let href = link.value().attr("href").unwrap_or("");
            let text: String = link.text().collect::<String>().trim().to_string();
            if href.to_lowercase().ends_with(".pdf") {
                pdf_url = absolutize(base_url, href);
                if title.is_empty() && !text.is_empty() {
                    title = text;
                }
            } else if title.is_empty() && !text.is_empty() {
                title = text;
            }
        }

        for cell in row.select(&cell_sel) {
            let text: String = cell.text().collect::<String>().trim().to_string();
            if date_sort_key(&text).is_some() {
                published_date = text;
                break;
            }
        }

        if title.is_empty() || pdf_url.is_empty() {
            continue;
        }
        if entries.iter().any(|e| e.pdf_url == pdf_url) {
            continue;
        }

        entries.push(PortalEntry {
            title,
            published_date,
            pdf_url,
        });
    }

    entries
}

fn absolutize(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if href.starts_with('/') {
        format!("{}{}", base_url, href)
    } else {
        format!("{}/{}", base_url, href)
    }
}
