//! Ollama control API runtime
//!
//! Residency is driven through two endpoints: `/api/ps` lists loaded models
//! and `/api/generate` with a `keep_alive` hint loads (positive) or evicts
//! (zero) a model.

use async_trait::async_trait;
use nexus_core::{NexusError, NexusResult, ResidentModel, RuntimeConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::traits::InferenceRuntime;

/// Prompt sent with a load so the server actually brings the model up
const WARMUP_PROMPT: &str = "Awaken";

/// Body of `/api/generate`
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    /// Seconds; 0 evicts immediately
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<u64>,
}

impl<'a> GenerateRequest<'a> {
    fn load(model: &'a str, retention: Duration) -> Self {
        Self {
            model,
            prompt: WARMUP_PROMPT,
            stream: false,
            keep_alive: Some(retention.as_secs()),
        }
    }

    fn unload(model: &'a str) -> Self {
        Self {
            model,
            prompt: "",
            stream: false,
            keep_alive: Some(0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct PsResponse {
    #[serde(default)]
    models: Vec<PsModel>,
}

#[derive(Debug, Deserialize)]
struct PsModel {
    name: String,
    #[serde(default)]
    size_vram: Option<u64>,
}

/// Runtime backed by an Ollama server
pub struct OllamaRuntime {
    client: reqwest::Client,
    base_url: String,
    list_timeout: Duration,
    load_timeout: Duration,
    unload_timeout: Duration,
}

impl OllamaRuntime {
    /// Create a new Ollama runtime client
    pub fn new(config: &RuntimeConfig) -> NexusResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| NexusError::Runtime(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            list_timeout: Duration::from_secs(config.list_timeout_secs),
            load_timeout: Duration::from_secs(config.load_timeout_secs),
            unload_timeout: Duration::from_secs(config.unload_timeout_secs),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check that the server answers at all
    pub async fn health(&self) -> bool {
        match self
            .client
            .get(self.url("/"))
            .timeout(self.list_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(base_url = %self.base_url, error = %e, "Runtime health check error");
                false
            }
        }
    }

    /// Run a prompt on a model and return the full response text.
    ///
    /// No timeout: generation length is bounded by the model, not by us.
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        keep_alive: Option<Duration>,
    ) -> NexusResult<String> {
        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
            keep_alive: keep_alive.map(|d| d.as_secs()),
        };
        let response = self.post_generate(&body, None).await?;
        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| NexusError::Runtime(format!("Invalid generate response: {}", e)))?;
        Ok(parsed.response)
    }

    async fn post_generate(
        &self,
        body: &GenerateRequest<'_>,
        timeout: Option<Duration>,
    ) -> NexusResult<reqwest::Response> {
        let mut request = self.client.post(self.url("/api/generate")).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NexusError::Runtime(format!("{} unreachable: {}", self.base_url, e)))?;

        if !response.status().is_success() {
            return Err(NexusError::Runtime(format!(
                "generate for '{}' returned {}",
                body.model,
                response.status()
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl InferenceRuntime for OllamaRuntime {
    async fn list_resident(&self) -> NexusResult<Vec<ResidentModel>> {
        let response = self
            .client
            .get(self.url("/api/ps"))
            .timeout(self.list_timeout)
            .send()
            .await
            .map_err(|e| NexusError::Runtime(format!("{} unreachable: {}", self.base_url, e)))?;

        if !response.status().is_success() {
            return Err(NexusError::Runtime(format!(
                "/api/ps returned {}",
                response.status()
            )));
        }

        let ps: PsResponse = response
            .json()
            .await
            .map_err(|e| NexusError::Runtime(format!("Invalid /api/ps response: {}", e)))?;

        let resident: Vec<ResidentModel> = ps
            .models
            .into_iter()
            .map(|m| ResidentModel {
                name: m.name,
                size_vram: m.size_vram,
            })
            .collect();

        debug!(count = resident.len(), "Fetched resident models");
        Ok(resident)
    }

    async fn load(&self, model: &str, retention: Duration) -> NexusResult<()> {
        info!(
            model = model,
            retention_secs = retention.as_secs(),
            "Loading model"
        );

        let body = GenerateRequest::load(model, retention);
        self.post_generate(&body, Some(self.load_timeout)).await?;
        Ok(())
    }

    async fn unload(&self, model: &str) -> NexusResult<()> {
        info!(model = model, "Unloading model");

        let body = GenerateRequest::unload(model);
        self.post_generate(&body, Some(self.unload_timeout)).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
