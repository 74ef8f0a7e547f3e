//! HTTP batch endpoint client
//!
//! Speaks a small JSON protocol:
//! - `POST {base}/batches` with `{model, max_tokens, requests}` returns `{id}`
//! - `GET {base}/batches/{id}` returns `{status}`
//! - `GET {base}/batches/{id}/results` returns `{results: [...]}` or a bare array

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::{Value, json};

use super::SubmissionService;
use crate::config::ServiceConfig;
use crate::domain::{BatchHandle, BatchStatus, GenerationRequest, GenerationResult};
use crate::error::{BatchrError, Result};

/// Client for a remote batch generation endpoint
pub struct HttpSubmissionService {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl HttpSubmissionService {
    /// Build a client; the API key is read from `config.api_key_env`.
    pub fn from_config(config: &ServiceConfig, timeout: Duration) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| BatchrError::Config(format!("{} not set", config.api_key_env)))?;
        Self::with_api_key(config, api_key, timeout)
    }

    pub fn with_api_key(config: &ServiceConfig, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BatchrError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    fn build_submit_body(&self, requests: &[GenerationRequest]) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "requests": requests,
        })
    }

    async fn check(response: Response, what: &str) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(failure(what, status, &body));
        }
        Ok(response.json().await?)
    }
}

/// Classify a non-success response
fn failure(what: &str, status: reqwest::StatusCode, body: &str) -> BatchrError {
    let message = format!("{} failed with HTTP {}: {}", what, status, body);
    match status.as_u16() {
        401 | 403 => BatchrError::Permission(message),
        _ if what == "submit" && status.is_client_error() => BatchrError::Submission(message),
        _ => BatchrError::Transient(message),
    }
}

/// Map a service status string to a BatchStatus
fn parse_status(raw: &str) -> Result<BatchStatus> {
    match raw.to_ascii_lowercase().as_str() {
        "validating" | "queued" | "in_progress" | "processing" | "finalizing" | "canceling" => {
            Ok(BatchStatus::Processing)
        }
        "completed" | "ended" | "succeeded" => Ok(BatchStatus::Completed),
        "failed" | "errored" => Ok(BatchStatus::Failed),
        "cancelled" | "canceled" => Ok(BatchStatus::Cancelled),
        "expired" => Ok(BatchStatus::Expired),
        other => Err(BatchrError::Transient(format!("Unknown batch status: {}", other))),
    }
}

fn parse_results(body: Value) -> Result<Vec<GenerationResult>> {
    let list = match body {
        Value::Object(mut map) => map.remove("results").unwrap_or(Value::Array(Vec::new())),
        other => other,
    };
    Ok(serde_json::from_value(list)?)
}

#[async_trait]
impl SubmissionService for HttpSubmissionService {
    async fn submit(&self, requests: &[GenerationRequest]) -> Result<BatchHandle> {
        let response = self
            .client
            .post(format!("{}/batches", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.build_submit_body(requests))
            .send()
            .await?;
        let body = Self::check(response, "submit").await?;
        body["id"]
            .as_str()
            .map(BatchHandle::new)
            .ok_or_else(|| BatchrError::Submission("Response carried no batch id".to_string()))
    }

    async fn status(&self, handle: &BatchHandle) -> Result<BatchStatus> {
        let response = self
            .client
            .get(format!("{}/batches/{}", self.base_url, handle))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let body = Self::check(response, "status").await?;
        let raw = body["status"]
            .as_str()
            .or_else(|| body["processing_status"].as_str())
            .ok_or_else(|| BatchrError::Transient("Response carried no status".to_string()))?;
        parse_status(raw)
    }

    async fn fetch_results(&self, handle: &BatchHandle) -> Result<Vec<GenerationResult>> {
        let response = self
            .client
            .get(format!("{}/batches/{}/results", self.base_url, handle))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let body = Self::check(response, "results").await?;
        parse_results(body)
    }
}

impl std::fmt::Debug for HttpSubmissionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSubmissionService")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}
