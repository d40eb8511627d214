use async_trait::async_trait;

use crate::Result;

use super::types::CompletionRequest;

/// Text-completion backend used for replies and summaries.
///
/// Network errors, rate limits and malformed responses must all be reported
/// as [`crate::Error::Completion`].
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn generate(&self, req: CompletionRequest) -> Result<String>;
}
