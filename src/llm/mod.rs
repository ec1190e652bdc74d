//! LLM provider boundary.
//!
//! The rest of the crate consumes one capability: given prompts and a JSON
//! schema, return JSON or fail. Failure is always survivable; callers treat
//! it as "no extraction this cycle".

pub mod extraction;
pub mod prompts;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::LlmConfig;

/// One structured-completion request.
#[derive(Debug, Clone)]
pub struct JsonRequest {
    pub schema_name: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub json_schema: Value,
    pub temperature: f64,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct JsonOutput {
    pub json: Value,
    pub raw_text: String,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete_json(&self, request: JsonRequest) -> Result<JsonOutput>;
}

/// Provider used when extraction is disabled. Always fails, so every LLM
/// code path degrades the same way whether unconfigured or unreachable.
pub struct NullProvider;

#[async_trait]
impl LlmProvider for NullProvider {
    async fn complete_json(&self, _request: JsonRequest) -> Result<JsonOutput> {
        bail!("no llm provider configured")
    }
}

/// HTTP provider posting structured-completion requests to a cloud endpoint.
pub struct CloudProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl CloudProvider {
    pub fn new(base_url: String, model: String, api_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build http client")?;
        Ok(Self {
            client,
            base_url,
            model,
            api_key,
        })
    }
}

#[async_trait]
impl LlmProvider for CloudProvider {
    async fn complete_json(&self, request: JsonRequest) -> Result<JsonOutput> {
        let body = serde_json::json!({
            "model": self.model,
            "schema_name": request.schema_name,
            "system": request.system_prompt,
            "user": request.user_prompt,
            "json_schema": request.json_schema,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("llm request failed")?;
        let status = response.status();
        let text = response.text().await.context("llm response unreadable")?;
        if !status.is_success() {
            bail!("llm endpoint returned {status}: {text}");
        }

        let envelope: Value =
            serde_json::from_str(&text).context("llm response was not JSON")?;
        // Accept either a pre-parsed `json` field or a `content` string
        // holding the JSON document.
        let json = if let Some(json) = envelope.get("json") {
            json.clone()
        } else if let Some(content) = envelope.get("content").and_then(|c| c.as_str()) {
            serde_json::from_str(content).context("llm content was not valid JSON")?
        } else {
            bail!("llm response carried neither json nor content");
        };
        Ok(JsonOutput {
            json,
            raw_text: text,
        })
    }
}

/// Build the provider described by config. The API key is read from the
/// environment variable the config names; it never appears in the file.
pub fn provider_from_config(cfg: &LlmConfig) -> Result<Box<dyn LlmProvider>> {
    if !cfg.is_enabled() {
        return Ok(Box::new(NullProvider));
    }
    let base_url = cfg
        .base_url
        .clone()
        .context("llm.base_url required for cloud provider")?;
    let api_key = std::env::var(&cfg.api_key_env)
        .with_context(|| format!("environment variable {} is not set", cfg.api_key_env))?;
    Ok(Box::new(CloudProvider::new(
        base_url,
        cfg.model.clone(),
        api_key,
        Duration::from_secs(cfg.timeout_secs),
    )?))
}
