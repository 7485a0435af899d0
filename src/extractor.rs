use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::ScrapeError;

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 2048,
            system_prompt: None,
        }
    }
}

/// Text-to-JSON extraction capability consumed by the agents. The prompt
/// describes the schema; the implementation returns the parsed JSON value.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract_json(&self, prompt: &str, opts: &ExtractOptions) -> Result<serde_json::Value>;
}

/// Parse a model response that may wrap its JSON in a fenced code block or
/// surround it with prose.
pub fn parse_json_payload(raw: &str) -> Result<serde_json::Value> {
    let trimmed = raw.trim();

    let body = if let Some(rest) = trimmed.strip_prefix("```") {
        // Drop the fence line (which may carry a language tag) and the
        // closing fence.
        let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
        rest.rsplit_once("```").map(|(body, _)| body).unwrap_or(rest)
    } else {
        trimmed
    };

    if let Ok(value) = serde_json::from_str(body.trim()) {
        return Ok(value);
    }

    // Last resort: take the outermost braces.
    if let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&body[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(ScrapeError::TransientSource(format!(
        "Extractor returned non-JSON output ({} chars)",
        raw.len()
    ))
    .into())
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Extractor backed by an OpenAI-compatible chat-completions endpoint.
pub struct HttpExtractor {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl HttpExtractor {
    pub fn new(api_url: String, api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
            model,
        }
    }

    /// Build from `EXTRACTOR_API_URL`, `EXTRACTOR_API_KEY` and
    /// `EXTRACTOR_MODEL`.
    pub fn from_env() -> Result<Self> {
        let api_url = std::env::var("EXTRACTOR_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
        let api_key = std::env::var("EXTRACTOR_API_KEY")
            .context("EXTRACTOR_API_KEY must be set to use the HTTP extractor")?;
        let model =
            std::env::var("EXTRACTOR_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Ok(Self::new(api_url, api_key, model))
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract_json(&self, prompt: &str, opts: &ExtractOptions) -> Result<serde_json::Value> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &opts.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": opts.temperature,
            "max_tokens": opts.max_tokens,
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ScrapeError::TransientSource(format!("Extractor request: {}", e)))?;

        if !response.status().is_success() {
            return Err(ScrapeError::TransientSource(format!(
                "Extractor returned HTTP {}",
                response.status()
            ))
            .into());
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ScrapeError::TransientSource(format!("Extractor response: {}", e)))?;

        let content = completion
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ScrapeError::TransientSource("Extractor returned no choices".into()))?;

        metrics::counter!("scraper.extractions").increment(1);
        parse_json_payload(content)
    }
}
