//! OpenAI-compatible chat completions adapter for Gemini, Groq, OpenRouter, OpenAI, etc.
//!
//! Every configured provider becomes an endpoint (base URL, model, key). The
//! wire format is the same for all of them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ProviderConfig, RelayConfig};
use crate::types::ProviderId;

use super::types::ProviderAdapter;

/// Base URL used when a provider doesn't set `base_url`
pub fn default_base_url(vendor: &str) -> Option<&'static str> {
    match vendor {
        "gemini" | "google" => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "openai" => Some("https://api.openai.com/v1"),
        _ => None,
    }
}

#[derive(Clone)]
struct Endpoint {
    url: String,
    model: String,
    api_key: String,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish()
    }
}

impl Endpoint {
    fn from_config(id: &str, provider: &ProviderConfig) -> Result<Self> {
        let base = match &provider.base_url {
            Some(url) => url.as_str(),
            None => default_base_url(&provider.vendor).ok_or_else(|| {
                anyhow!(
                    "provider '{}' uses vendor '{}' which has no default base_url",
                    id,
                    provider.vendor
                )
            })?,
        };
        Ok(Self {
            url: format!("{}/chat/completions", base.trim_end_matches('/')),
            model: provider.model.clone(),
            api_key: provider.api_key.clone(),
        })
    }
}

type EndpointMap = HashMap<ProviderId, Endpoint>;

fn build_endpoints(config: &RelayConfig) -> Result<EndpointMap> {
    config
        .providers
        .iter()
        .map(|(id, p)| -> Result<(ProviderId, Endpoint)> {
            Ok((ProviderId::new(id.clone()), Endpoint::from_config(id, p)?))
        })
        .collect()
}

pub struct OpenAiCompatAdapter {
    client: Client,
    endpoints: RwLock<Arc<EndpointMap>>,
}

impl std::fmt::Debug for OpenAiCompatAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatAdapter")
            .field("endpoints", &self.endpoints())
            .finish()
    }
}

impl OpenAiCompatAdapter {
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        // the router enforces its own timeout; this one only bounds a stuck socket
        let client = Client::builder()
            .timeout(Duration::from_secs(config.router.timeout_secs.saturating_mul(2)))
            .build()
            .context("Failed to build HTTP client")?;

        let endpoints = build_endpoints(config)?;

        Ok(Self {
            client,
            endpoints: RwLock::new(Arc::new(endpoints)),
        })
    }

    fn endpoints(&self) -> Arc<EndpointMap> {
        let guard = self.endpoints.read().unwrap_or_else(|poisoned| {
            warn!("Endpoint lock was poisoned, recovering");
            poisoned.into_inner()
        });
        Arc::clone(&guard)
    }

    /// Full chat/completions URL for a provider
    pub fn endpoint_url(&self, provider: &ProviderId) -> Option<String> {
        self.endpoints().get(provider).map(|e| e.url.clone())
    }

    fn request_body(model: &str, prompt: &str, max_tokens: u32, temperature: f32) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens,
            temperature,
        }
    }

    fn extract_text(resp: ChatResponse) -> Result<String> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("response had no choices"))?;
        choice
            .message
            .content
            .ok_or_else(|| anyhow!("response choice had no content"))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    async fn generate(
        &self,
        provider: &ProviderId,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let endpoints = self.endpoints();
        let endpoint = endpoints
            .get(provider)
            .ok_or_else(|| anyhow!("no endpoint configured for provider '{}'", provider))?;

        let body = Self::request_body(&endpoint.model, prompt, max_tokens, temperature);
        debug!(
            "Chat request: provider={}, model={}, prompt_len={}",
            provider,
            endpoint.model,
            prompt.len()
        );

        let mut request = self
            .client
            .post(&endpoint.url)
            .header("Content-Type", "application/json")
            .json(&body);
        if !endpoint.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", endpoint.api_key));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", provider))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "{} request failed with status {}: {}",
                provider,
                status,
                error_text
            ));
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", provider))?;

        debug!(
            "Chat response: provider={}, choices={}",
            provider,
            api_response.choices.len()
        );

        Self::extract_text(api_response)
    }

    fn reload(&self, config: &RelayConfig) -> Result<()> {
        let endpoints = build_endpoints(config)?;
        let count = endpoints.len();
        let mut guard = self.endpoints.write().unwrap_or_else(|poisoned| {
            warn!("Endpoint lock was poisoned, recovering");
            poisoned.into_inner()
        });
        *guard = Arc::new(endpoints);
        info!("Reloaded {} provider endpoints", count);
        Ok(())
    }
}

// ── wire types ──

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}
