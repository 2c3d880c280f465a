//! Wires configuration into concrete providers, stores and the orchestrator.

use std::sync::Arc;

use cadence_config::CadenceConfig;
use cadence_core::{CadenceError, Result};
use cadence_llm::{LlmProvider, ModelRouter, OpenAiEmbedding, OpenAiProvider, UsageMeter};
use cadence_memory::{MemoryAccess, MemoryAccessConfig, SqliteStore};
use cadence_orchestrator::{CognitiveExecutor, Orchestrator, StoreConsolidator};

pub(crate) struct Stack {
    pub orchestrator: Orchestrator,
    pub usage: UsageMeter,
}

fn api_key(config: &CadenceConfig) -> Result<String> {
    config
        .services
        .openai_api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| {
            CadenceError::Config(
                "no API key configured: set services.openai_api_key or OPENAI_API_KEY".into(),
            )
        })
}

pub(crate) fn open_store(config: &CadenceConfig) -> Result<SqliteStore> {
    if let Some(parent) = config.memory.db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    SqliteStore::open(&config.memory.db_path)
}

pub(crate) fn memory_access(config: &CadenceConfig, store: &SqliteStore) -> Result<MemoryAccess> {
    let mut embedder = OpenAiEmbedding::new(api_key(config)?)
        .with_model(config.embedding.model.clone(), config.embedding.dimensions);
    if let Some(url) = config
        .embedding
        .base_url
        .as_ref()
        .or(config.services.openai_base_url.as_ref())
    {
        embedder = embedder.with_base_url(url.clone());
    }

    MemoryAccess::new(
        Arc::new(store.clone()),
        Arc::new(embedder),
        MemoryAccessConfig::from_config(&config.memory),
    )
}

pub(crate) fn build(config: &CadenceConfig) -> Result<Stack> {
    let mut provider = OpenAiProvider::new(api_key(config)?);
    if let Some(ref url) = config.services.openai_base_url {
        provider = provider.with_base_url(url.clone());
    }
    let llm: Arc<dyn LlmProvider> = Arc::new(ModelRouter::new().with_provider(Arc::new(provider)));

    let store = open_store(config)?;
    let memory = memory_access(config, &store)?;
    let usage = UsageMeter::new();

    let executor = Arc::new(CognitiveExecutor::new(
        Arc::clone(&llm),
        config.agent.clone(),
        usage.clone(),
    ));
    let consolidator = Arc::new(StoreConsolidator::new(memory, config.memory.retrieve_limit));
    let orchestrator = Orchestrator::new(llm, executor, consolidator, Arc::new(store), config)
        .with_usage_meter(usage.clone());

    Ok(Stack {
        orchestrator,
        usage,
    })
}
