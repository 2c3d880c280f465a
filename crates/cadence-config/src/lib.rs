//! # cadence-config
//!
//! Configuration for the Cadence orchestrator. Reads from `cadence.toml`,
//! environment variables and CLI overrides, later sources winning.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::CadenceConfig;
pub use schema::{
    AgentConfig, ConfigWarning, EmbeddingConfig, LoggingConfig, MemoryConfig, OrchestratorConfig,
    ServicesConfig, SizeLimits, StoreRetryConfig, WarningSeverity,
};
