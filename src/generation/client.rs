use std::time::Duration;

use async_trait::async_trait;

use crate::error::GenerationError;
use crate::generation::prompt::Prompt;

/// Boundary to the external text-generation service.
///
/// Any text may come back, including empty or malformed output; the pipeline
/// validates it. `deadline` is how long the call may take; the pipeline also drops
/// the call future when it elapses.
#[async_trait]
pub trait GenerationClient: Send + Sync + 'static {
    async fn send(&self, prompt: &Prompt, deadline: Duration) -> Result<String, GenerationError>;
}

/// Client for running without a service: every call fails, so every request
/// ends in the fallback text.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineClient;

#[async_trait]
impl GenerationClient for OfflineClient {
    async fn send(&self, _prompt: &Prompt, _deadline: Duration) -> Result<String, GenerationError> {
        Err(GenerationError::Service {
            reason: "generation service not configured".to_string(),
        })
    }
}
