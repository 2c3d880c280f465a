//! # cadence-llm
//!
//! Abstraction layer over language-model and embedding providers. The
//! orchestrator only ever sees the traits; the OpenAI-compatible adapters and
//! the mocks are interchangeable behind them.

pub mod embedding;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod router;
pub mod usage;

pub use embedding::{EmbeddingProvider, OpenAiEmbedding};
pub use mock::{MockEmbedding, MockProvider, MockResponse};
pub use openai::OpenAiProvider;
pub use provider::{
    LlmProvider, LlmRequest, LlmResponse, StopReason, StructuredRequest, StructuredResponse, Usage,
};
pub use router::ModelRouter;
pub use usage::{UsageMeter, UsageSnapshot};
