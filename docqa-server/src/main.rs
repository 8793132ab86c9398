use std::sync::Arc;

use anyhow::Context;
use docqa_rag::nvidia::NvidiaReranker;
use docqa_rag::openai::{OpenAiChatGenerator, OpenAiEmbeddingProvider};
use docqa_rag::{RagPipeline, Similarity};
use docqa_server::{ServerConfig, run_server, telemetry};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();

    let config = ServerConfig::from_env().context("invalid configuration")?;
    telemetry::init(config.log_format)?;
    info!(
        host = %config.host,
        port = config.port,
        docs_dir = %config.docs_dir.display(),
        chunk_size = config.rag.chunk_size,
        candidates = config.rag.candidate_count,
        context_size = config.rag.context_size,
        "starting docqa"
    );

    let pipeline = Arc::new(build_pipeline(&config)?);
    if config.load_snapshot {
        match pipeline.load_snapshot().await {
            Ok(true) => info!("restored index from snapshot"),
            Ok(false) => info!("no snapshot to restore, waiting for uploads"),
            Err(e) => warn!(error = %e, "snapshot could not be restored, waiting for uploads"),
        }
    }

    run_server(&config, pipeline).await
}

fn build_pipeline(config: &ServerConfig) -> anyhow::Result<RagPipeline> {
    let services = &config.services;
    let timeout = config.retry.request_timeout;

    let embedder = OpenAiEmbeddingProvider::new(services.api_key.clone(), &services.embedding_base_url)?
        .with_model(services.embedding_model.clone())
        .with_dimensions(services.embedding_dimensions)
        .with_batch_size(services.embedding_batch_size)
        .with_input_types("passage", "query")
        .with_timeout(timeout)?;

    let reranker = NvidiaReranker::new(services.api_key.clone(), services.rerank_url.clone())?
        .with_model(services.rerank_model.clone())
        .with_timeout(timeout)?;

    let mut generator = OpenAiChatGenerator::new(services.api_key.clone(), &services.chat_base_url)?
        .with_model(services.chat_model.clone())
        .with_temperature(services.temperature)
        .with_timeout(timeout)?;
    if let Some(max_tokens) = services.max_tokens {
        generator = generator.with_max_tokens(max_tokens);
    }

    let mut builder = RagPipeline::builder()
        .config(config.rag.clone())
        .embedding_provider(Arc::new(embedder))
        .reranker(Arc::new(reranker))
        .generator(Arc::new(generator))
        .system_instruction(config.system_instruction.clone())
        .metric(Similarity::Cosine)
        .retry_policy(config.retry);
    if let Some(path) = &config.snapshot_path {
        builder = builder.snapshot_path(path.clone());
    }
    Ok(builder.build()?)
}
