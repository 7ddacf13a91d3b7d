use async_trait::async_trait;
use std::sync::Arc;

use crate::{ChatEngine, ChatTurn, Completion, HealthStatus, VoiceError};

/// Tries a primary engine, then a secondary one when the primary fails.
///
/// Used to put the hosted API behind a local model server. Input errors are
/// not retried since the secondary would reject the same prompt.
pub struct FallbackChatEngine {
    primary: Arc<dyn ChatEngine>,
    secondary: Arc<dyn ChatEngine>,
    name: String,
}

impl FallbackChatEngine {
    pub fn new(primary: Arc<dyn ChatEngine>, secondary: Arc<dyn ChatEngine>) -> Self {
        let name = format!("{}+{}", primary.name(), secondary.name());
        Self {
            primary,
            secondary,
            name,
        }
    }
}

#[async_trait]
impl ChatEngine for FallbackChatEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, turns: &[ChatTurn]) -> Result<Completion, VoiceError> {
        match self.primary.complete(turns).await {
            Ok(completion) => Ok(completion),
            Err(e @ VoiceError::InvalidInput(_)) => Err(e),
            Err(e) => {
                tracing::warn!(
                    primary = self.primary.name(),
                    secondary = self.secondary.name(),
                    error = %e,
                    "primary chat engine failed, falling back"
                );
                self.secondary.complete(turns).await
            }
        }
    }

    async fn health(&self) -> HealthStatus {
        let primary = self.primary.health().await;
        if primary == HealthStatus::Healthy {
            return primary;
        }
        self.secondary.health().await
    }
}
