use std::{error::Error, sync::Arc};

use camino::Utf8Path;
use env_logger::Env;
use glimpse_core::{
    config::StoreConfig,
    embed::{ClipRetriever, Embedder},
    store::{qdrant::QdrantStore, CollectionMode},
    summarize::Summarizer,
};

/// Initializes env_logger, defaulting to debug level output when `verbose`
/// is set and info otherwise. `RUST_LOG` still overrides either.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();
}

/// Builds the full summarization stack from a config file and a model
/// directory: pooled encoder sessions, a vector store connection, and the
/// orchestrator over both.
///
/// Fails when the configured `vector_size` does not match the model's
/// output dimensionality, since a mismatched collection rejects every write.
pub async fn build_summarizer(
    config_path: &Utf8Path,
    model_dir: &Utf8Path,
    pool_size: u32,
    mode: CollectionMode,
) -> Result<Summarizer<ClipRetriever, QdrantStore>, Box<dyn Error>> {
    let config = StoreConfig::from_file(config_path)?;

    let retriever = ClipRetriever::load_pooled(model_dir, pool_size)?;
    if retriever.vector_len() as u64 != config.vector_size {
        return Err(format!(
            "Configured vector_size {} does not match the model output dimensionality {}",
            config.vector_size,
            retriever.vector_len()
        )
        .into());
    }

    let store = QdrantStore::connect(config, mode).await?;
    Ok(Summarizer::with(Arc::new(retriever), Arc::new(store)))
}
