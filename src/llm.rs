//! Streaming model client abstraction
//!
//! Provides a common interface for streaming chat completions from an
//! OpenAI-compatible inference server.

mod error;
mod llama;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use llama::LlamaClient;
pub use types::*;

use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

/// Ordered delta events from one streaming completion call
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelEvent, LlmError>> + Send>>;

/// Common interface for streaming model backends
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Start a streaming completion over the given message path.
    ///
    /// The returned stream yields content/reasoning/timings deltas as they
    /// arrive and ends after at most one `Complete` event. A stream that
    /// ends without `Complete` means the upstream never produced a
    /// terminal message.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelStream, LlmError>;
}
