//! Language-model boundary.
//!
//! [`LanguageModel`] is the single seam the pipeline talks through;
//! [`ChatRouter`] is the production implementation: a set of OpenAI-style
//! chat providers tagged with capabilities, a routing table from task to
//! provider, and a default/any fallback chain. Quota exhaustion (HTTP 429)
//! is surfaced as a distinct error so callers can degrade instead of fail.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::{LlmConfig, LlmProviderConfig};

/// Task categories routed to providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    /// Final answer synthesis over retrieved evidence.
    Answer,
    /// Short structured-output calls (name variants, question scope,
    /// industry keywords).
    Classify,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Answer => "answer",
            Task::Classify => "classify",
        }
    }
}

#[derive(Debug)]
pub enum LlmError {
    /// Rate limit / quota exhausted. Recoverable at the UX level.
    Quota(String),
    Provider(String),
    NoProvider(String),
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::Quota(m) => write!(f, "language model quota exceeded: {}", m),
            LlmError::Provider(m) => write!(f, "language model call failed: {}", m),
            LlmError::NoProvider(task) => {
                write!(f, "no language model provider configured for task '{}'", task)
            }
        }
    }
}

impl std::error::Error for LlmError {}

/// `generate(prompt, task) -> text`. Implementations must map quota and
/// rate-limit failures to [`LlmError::Quota`].
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str, task: Task) -> Result<String, LlmError>;
}

/// Routes each task to a configured chat provider.
pub struct ChatRouter {
    providers: Vec<LlmProviderConfig>,
    routing: HashMap<String, String>,
    default_provider: Option<String>,
    client: reqwest::Client,
    max_retries: u32,
}

impl ChatRouter {
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<ChatRouter> {
        if config.providers.is_empty() {
            anyhow::bail!("llm.providers must not be empty");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(ChatRouter {
            providers: config.providers.clone(),
            routing: config.routing.clone(),
            default_provider: config.default_provider.clone(),
            client,
            max_retries: config.max_retries,
        })
    }

    async fn call_provider(
        &self,
        provider: &LlmProviderConfig,
        prompt: &str,
    ) -> Result<String, LlmError> {
        let api_key = match &provider.api_key_env {
            Some(env) => Some(std::env::var(env).map_err(|_| {
                LlmError::Provider(format!("environment variable {} not set", env))
            })?),
            None => None,
        };

        let body = serde_json::json!({
            "model": provider.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.2,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(&provider.endpoint)
                .header("Content-Type", "application/json")
                .json(&body);
            if let Some(key) = &api_key {
                request = request.header("Authorization", format!("Bearer {}", key));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| LlmError::Provider(e.to_string()))?;
                        return parse_chat_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();

                    // Quota is terminal for this call; callers degrade.
                    if status.as_u16() == 429 || body_text.contains("insufficient_quota") {
                        return Err(LlmError::Quota(format!("{}: {}", status, body_text)));
                    }

                    if status.is_server_error() {
                        last_err = Some(LlmError::Provider(format!(
                            "{} error {}: {}",
                            provider.name, status, body_text
                        )));
                        continue;
                    }

                    return Err(LlmError::Provider(format!(
                        "{} error {}: {}",
                        provider.name, status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(LlmError::Provider(format!(
                        "{} connection error: {}",
                        provider.name, e
                    )));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| LlmError::Provider("chat call failed after retries".to_string())))
    }
}

#[async_trait]
impl LanguageModel for ChatRouter {
    async fn generate(&self, prompt: &str, task: Task) -> Result<String, LlmError> {
        let provider = select_provider(
            &self.providers,
            &self.routing,
            self.default_provider.as_deref(),
            task,
        )
        .ok_or_else(|| LlmError::NoProvider(task.as_str().to_string()))?;

        self.call_provider(provider, prompt).await
    }
}

/// Provider selection order: explicit routing entry, then the configured
/// default, then the first provider whose capabilities include the task,
/// then any provider at all.
fn select_provider<'a>(
    providers: &'a [LlmProviderConfig],
    routing: &HashMap<String, String>,
    default_provider: Option<&str>,
    task: Task,
) -> Option<&'a LlmProviderConfig> {
    if let Some(name) = routing.get(task.as_str()) {
        if let Some(p) = providers.iter().find(|p| &p.name == name) {
            return Some(p);
        }
    }
    if let Some(name) = default_provider {
        if let Some(p) = providers.iter().find(|p| p.name == name) {
            return Some(p);
        }
    }
    providers
        .iter()
        .find(|p| p.capabilities.iter().any(|c| c == task.as_str()))
        .or_else(|| providers.first())
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String, LlmError> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| LlmError::Provider("invalid chat response: missing content".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str, capabilities: &[&str]) -> LlmProviderConfig {
        LlmProviderConfig {
            name: name.to_string(),
            endpoint: "http://localhost:9/v1/chat/completions".to_string(),
            model: "test".to_string(),
            api_key_env: None,
            capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_routing_entry_wins() {
        let providers = vec![provider("a", &["answer"]), provider("b", &["classify"])];
        let mut routing = HashMap::new();
        routing.insert("classify".to_string(), "a".to_string());

        let picked = select_provider(&providers, &routing, Some("b"), Task::Classify);
        assert_eq!(picked.map(|p| p.name.as_str()), Some("a"));
    }

    #[test]
    fn test_default_used_when_no_route() {
        let providers = vec![provider("a", &["answer"]), provider("b", &[])];
        let picked = select_provider(&providers, &HashMap::new(), Some("b"), Task::Answer);
        assert_eq!(picked.map(|p| p.name.as_str()), Some("b"));
    }

    #[test]
    fn test_capability_fallback() {
        let providers = vec![provider("a", &["classify"]), provider("b", &["answer"])];
        let picked = select_provider(&providers, &HashMap::new(), None, Task::Answer);
        assert_eq!(picked.map(|p| p.name.as_str()), Some("b"));
    }

    #[test]
    fn test_any_provider_as_last_resort() {
        let providers = vec![provider("only", &[])];
        let picked = select_provider(&providers, &HashMap::new(), None, Task::Classify);
        assert_eq!(picked.map(|p| p.name.as_str()), Some("only"));
    }

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "choices": [{"message": {"content": "  the answer  "}}]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "the answer");

        let bad = serde_json::json!({"choices": []});
        assert!(parse_chat_response(&bad).is_err());
    }
}
