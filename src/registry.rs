//! Corporate filings registry client.
//!
//! The registry exposes company search, paginated filing listings, raw
//! document download, and an optional company profile blurb. The wire
//! format is a JSON envelope with a `status` field: "000" is success,
//! "013" means an empty result set, anything else is an API error.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;

use crate::config::RegistryConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct CompanyEntry {
    #[serde(alias = "corp_code")]
    pub company_id: String,
    #[serde(alias = "corp_name")]
    pub name: String,
    #[serde(alias = "stock_code", default)]
    pub ticker: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilingListing {
    #[serde(alias = "rcept_no")]
    pub document_id: String,
    #[serde(alias = "report_nm")]
    pub title: String,
    #[serde(alias = "rcept_dt")]
    pub published_date: String,
}

/// One page of filing listings plus the total page count reported by
/// the registry, so callers can bound their pagination loop.
#[derive(Debug, Clone)]
pub struct ListingsPage {
    pub listings: Vec<FilingListing>,
    pub total_pages: u32,
}

#[derive(Debug)]
pub enum RegistryError {
    Http(String),
    Api(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::Http(m) => write!(f, "registry request failed: {}", m),
            RegistryError::Api(m) => write!(f, "registry API error: {}", m),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Filings registry operations the pipeline depends on.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    async fn search_companies(&self, name: &str) -> Result<Vec<CompanyEntry>, RegistryError>;

    async fn list_documents(
        &self,
        company_id: &str,
        date_from: NaiveDate,
        date_to: NaiveDate,
        page: u32,
    ) -> Result<ListingsPage, RegistryError>;

    async fn fetch_document(&self, document_id: &str) -> Result<Vec<u8>, RegistryError>;

    /// Free-text company/industry description, if the registry has one.
    async fn get_company_profile(&self, company_id: &str) -> Result<Option<String>, RegistryError>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    message: Option<String>,
    list: Option<Vec<T>>,
    #[serde(default)]
    total_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProfileEnvelope {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    industry: Option<String>,
}

pub struct HttpRegistry {
    base_url: String,
    api_key: String,
    page_size: u32,
    client: reqwest::Client,
}

impl HttpRegistry {
    pub fn from_config(config: &RegistryConfig) -> anyhow::Result<HttpRegistry> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!(
                "registry API key not found: set the {} environment variable",
                config.api_key_env
            )
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(HttpRegistry {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            page_size: config.page_size as u32,
            client,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, RegistryError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut query: Vec<(&str, &str)> = vec![("crtfc_key", self.api_key.as_str())];
        query.extend_from_slice(params);

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| RegistryError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Http(format!("{}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| RegistryError::Http(format!("invalid JSON: {}", e)))
    }
}

#[async_trait]
impl RegistryApi for HttpRegistry {
    async fn search_companies(&self, name: &str) -> Result<Vec<CompanyEntry>, RegistryError> {
        let envelope: Envelope<CompanyEntry> = self
            .get_json("company.json", &[("corp_name", name)])
            .await?;
        match envelope.status.as_str() {
            "000" => Ok(envelope.list.unwrap_or_default()),
            "013" => Ok(Vec::new()),
            other => Err(RegistryError::Api(format!(
                "status {}: {}",
                other,
                envelope.message.unwrap_or_default()
            ))),
        }
    }

    async fn list_documents(
        &self,
        company_id: &str,
        date_from: NaiveDate,
        date_to: NaiveDate,
        page: u32,
    ) -> Result<ListingsPage, RegistryError> {
        let from = date_from.format("%Y%m%d").to_string();
        let to = date_to.format("%Y%m%d").to_string();
        let page_no = page.to_string();
        let page_count = self.page_size.to_string();

        let envelope: Envelope<FilingListing> = self
            .get_json(
                "list.json",
                &[
                    ("corp_code", company_id),
                    ("bgn_de", &from),
                    ("end_de", &to),
                    ("page_no", &page_no),
                    ("page_count", &page_count),
                ],
            )
            .await?;

        match envelope.status.as_str() {
            "000" => Ok(ListingsPage {
                listings: envelope.list.unwrap_or_default(),
                total_pages: envelope.total_page.unwrap_or(1),
            }),
            "013" => Ok(ListingsPage {
                listings: Vec::new(),
                total_pages: 0,
            }),
            other => Err(RegistryError::Api(format!(
                "status {}: {}",
                other,
                envelope.message.unwrap_or_default()
            ))),
        }
    }

    async fn fetch_document(&self, document_id: &str) -> Result<Vec<u8>, RegistryError> {
        let url = format!("{}/document.xml", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("crtfc_key", self.api_key.as_str()),
                ("rcept_no", document_id),
            ])
            .send()
            .await
            .map_err(|e| RegistryError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Http(format!(
                "document download failed: {}",
                status
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RegistryError::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn get_company_profile(
        &self,
        company_id: &str,
    ) -> Result<Option<String>, RegistryError> {
        let envelope: ProfileEnvelope = self
            .get_json("company-profile.json", &[("corp_code", company_id)])
            .await?;
        match envelope.status.as_str() {
            "000" => Ok(envelope.industry.filter(|s| !s.trim().is_empty())),
            "013" => Ok(None),
            other => Err(RegistryError::Api(format!(
                "status {}: {}",
                other,
                envelope.message.unwrap_or_default()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_company_entry_aliases() {
        let json = r#"{"corp_code": "00126380", "corp_name": "Samsung Electronics", "stock_code": "005930"}"#;
        let entry: CompanyEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.company_id, "00126380");
        assert_eq!(entry.name, "Samsung Electronics");
        assert_eq!(entry.ticker.as_deref(), Some("005930"));
    }

    #[test]
    fn test_filing_listing_aliases() {
        let json = r#"{"rcept_no": "20240312000123", "report_nm": "Annual Report (2023)", "rcept_dt": "20240312"}"#;
        let listing: FilingListing = serde_json::from_str(json).unwrap();
        assert_eq!(listing.document_id, "20240312000123");
        assert_eq!(listing.published_date, "20240312");
    }

    #[test]
    fn test_envelope_company_list() {
        let json = r#"{"status": "000", "message": "ok", "list": [
            {"corp_code": "001", "corp_name": "Acme", "stock_code": "123456"}
        ], "total_page": 2}"#;
        let envelope: Envelope<CompanyEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.status, "000");
        assert_eq!(envelope.list.as_ref().map(Vec::len), Some(1));
        assert_eq!(envelope.total_page, Some(2));
    }

    #[test]
    fn test_envelope_empty_status() {
        let json = r#"{"status": "013", "message": "no data"}"#;
        let envelope: Envelope<FilingListing> = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.status, "013");
        assert!(envelope.list.is_none());
    }
}
