//! Adapter contract for remote generation calls

use anyhow::Result;
use async_trait::async_trait;

use crate::config::RelayConfig;
use crate::types::ProviderId;

/// Text-in/text-out call to one configured provider
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Generate a completion for `prompt` on `provider`.
    ///
    /// Any error (transport, non-success status, malformed body) makes the
    /// router move on to the next candidate.
    async fn generate(
        &self,
        provider: &ProviderId,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String>;

    /// Pick up provider definitions from a validated config before it goes
    /// live. An error rejects the whole reload.
    fn reload(&self, _config: &RelayConfig) -> Result<()> {
        Ok(())
    }
}
