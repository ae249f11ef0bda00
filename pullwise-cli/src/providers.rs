//! Production wiring of the pipeline providers

use std::sync::Arc;

use anyhow::Context;
use pullwise_core::{Config, Orchestrator, OrchestratorSettings, Providers, Secrets};
use pullwise_github::GitHubClient;
use pullwise_openai::{OpenAiChat, OpenAiClient, OpenAiEmbeddings};
use pullwise_store::Database;
use tracing::info;

/// Hosted OpenAI endpoint; anything else may be a keyless compatible server
const OPENAI_API_HOST: &str = "https://api.openai.com";

/// Build an orchestrator backed by GitHub, an OpenAI-compatible API and SQLite
pub async fn build_orchestrator(config: &Config) -> anyhow::Result<Orchestrator> {
    let secrets = Secrets::load()?;

    let vcs = GitHubClient::from_secrets(&secrets)?;
    let api_key = secrets.llm_api_key();
    let embeddings = OpenAiEmbeddings::new(openai_client(
        &config.embedding.api_base_url,
        api_key.clone(),
    )?);
    let llm = OpenAiChat::new(openai_client(&config.llm.api_base_url, api_key)?);

    let store_path = config.store.resolved_path()?;
    let database = Database::new(&store_path)
        .await
        .with_context(|| format!("Failed to open vector store at {}", store_path.display()))?;
    info!(path = %store_path.display(), "Vector store ready");

    let providers = Providers {
        vcs: Arc::new(vcs),
        embeddings: Arc::new(embeddings),
        llm: Arc::new(llm),
        store: Arc::new(database.vector_store()),
    };
    Ok(Orchestrator::new(
        providers,
        OrchestratorSettings::from_config(config),
    ))
}

fn openai_client(base_url: &str, api_key: Option<String>) -> anyhow::Result<OpenAiClient> {
    let client = OpenAiClient::new(base_url, api_key)?;
    if client.base_url().starts_with(OPENAI_API_HOST) {
        return Ok(client.require_api_key()?);
    }
    Ok(client)
}
