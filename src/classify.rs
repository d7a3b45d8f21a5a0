//! Structured classification calls backed by the language model.
//!
//! Every helper here degrades silently: when the model is unreachable,
//! over quota, or returns malformed JSON, the caller gets a sensible
//! default instead of an error. The analysis pipeline must never fail
//! because a classification nicety was unavailable.

use serde::Deserialize;

use crate::llm::{LanguageModel, Task};

pub const DEFAULT_LOOKBACK_YEARS: i64 = 3;

pub const DEFAULT_TARGET_CATEGORIES: &[&str] =
    &["Annual Report", "Half-Year Report", "Quarterly Report"];

/// Search window and filing categories inferred from the question.
#[derive(Debug, Clone)]
pub struct QuestionScope {
    pub lookback_years: i64,
    pub categories: Vec<String>,
}

impl Default for QuestionScope {
    fn default() -> Self {
        QuestionScope {
            lookback_years: DEFAULT_LOOKBACK_YEARS,
            categories: DEFAULT_TARGET_CATEGORIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScopeResponse {
    lookback_years: i64,
    #[serde(default)]
    categories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct VariantsResponse {
    variants: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct KeywordsResponse {
    keywords: Vec<String>,
}

/// Plausible registry spellings for a user-supplied company name.
///
/// The raw input is always first so an exact hit wins before any
/// model-suggested variant is tried.
pub async fn name_variants(llm: &dyn LanguageModel, raw: &str) -> Vec<String> {
    let raw = raw.trim();
    let prompt = format!(
        "A user wants to look up the company \"{}\" in a corporate filings registry. \
         List up to 4 plausible official registered names for it, including the \
         input itself. Respond with JSON only: {{\"variants\": [\"...\"]}}",
        raw
    );

    let mut variants = vec![raw.to_string()];

    match llm.generate(&prompt, Task::Classify).await {
        Ok(text) => {
            if let Some(json) = extract_json(&text) {
                if let Ok(parsed) = serde_json::from_str::<VariantsResponse>(&json) {
                    for v in parsed.variants {
                        let v = v.trim().to_string();
                        if !v.is_empty() && !variants.iter().any(|x| x.eq_ignore_ascii_case(&v)) {
                            variants.push(v);
                        }
                    }
                }
            }
        }
        Err(e) => eprintln!("debug: name variant classification unavailable: {}", e),
    }

    variants
}

/// Infers how far back to search and which filing categories matter.
pub async fn question_scope(llm: &dyn LanguageModel, question: &str) -> QuestionScope {
    let prompt = format!(
        "Given this question about a company, decide how many years of filings \
         to search (1-10) and which filing categories are relevant. Categories \
         to choose from: {:?}. Question: \"{}\"\n\
         Respond with JSON only: {{\"lookback_years\": N, \"categories\": [\"...\"]}}",
        DEFAULT_TARGET_CATEGORIES, question
    );

    match llm.generate(&prompt, Task::Classify).await {
        Ok(text) => {
            if let Some(json) = extract_json(&text) {
                if let Ok(parsed) = serde_json::from_str::<ScopeResponse>(&json) {
                    let categories = if parsed.categories.is_empty() {
                        QuestionScope::default().categories
                    } else {
                        parsed.categories
                    };
                    return QuestionScope {
                        lookback_years: clamp_lookback(parsed.lookback_years),
                        categories,
                    };
                }
            }
            eprintln!("debug: scope classification returned malformed output, using defaults");
        }
        Err(e) => eprintln!("debug: scope classification unavailable: {}", e),
    }

    QuestionScope::default()
}

/// Industry search keywords for a question, optionally seeded with a
/// company profile hint. Falls back to the hint itself, then to the
/// longer words of the question.
pub async fn industry_keywords(
    llm: &dyn LanguageModel,
    question: &str,
    hint: Option<&str>,
) -> Vec<String> {
    let hint_line = match hint {
        Some(h) => format!("Company profile: {}\n", h),
        None => String::new(),
    };
    let prompt = format!(
        "{}Question: \"{}\"\n\
         List up to 5 short industry or sector keywords useful for finding \
         related industry research reports. \
         Respond with JSON only: {{\"keywords\": [\"...\"]}}",
        hint_line, question
    );

    match llm.generate(&prompt, Task::Classify).await {
        Ok(text) => {
            if let Some(json) = extract_json(&text) {
                if let Ok(parsed) = serde_json::from_str::<KeywordsResponse>(&json) {
                    let keywords: Vec<String> = parsed
                        .keywords
                        .into_iter()
                        .map(|k| k.trim().to_string())
                        .filter(|k| !k.is_empty())
                        .take(5)
                        .collect();
                    if !keywords.is_empty() {
                        return keywords;
                    }
                }
            }
        }
        Err(e) => eprintln!("debug: keyword classification unavailable: {}", e),
    }

    fallback_keywords(question, hint)
}

fn fallback_keywords(question: &str, hint: Option<&str>) -> Vec<String> {
    if let Some(h) = hint {
        let h = h.trim();
        if !h.is_empty() {
            return vec![h.to_string()];
        }
    }
    question
        .split_whitespace()
        .filter(|w| w.chars().count() >= 4)
        .take(3)
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

fn clamp_lookback(years: i64) -> i64 {
    years.clamp(1, 10)
}

/// Pulls a JSON object out of a model reply that may wrap it in prose
/// or markdown code fences.
fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let inner = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim_end_matches("```").trim()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim_end_matches("```").trim()
    } else {
        trimmed
    };

    let start = inner.find('{')?;
    let end = inner.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(inner[start..=end].to_string())
}
