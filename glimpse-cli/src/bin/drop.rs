use std::error::Error;

use camino::Utf8PathBuf;
use clap::Parser;
use glimpse_cli::utility::init_logging;
use glimpse_core::{config::StoreConfig, store::qdrant::QdrantStore};

#[derive(Parser, Debug)]
#[command(name = "glimpse-drop")]
#[command(version = "0.1")]
#[command(about = "drops the configured collection from the vector store (development use)", long_about = None)]
struct Args {
    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,
    /// Path to the store configuration file
    #[arg(short, long, default_value = "glimpse.json")]
    config: Utf8PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = StoreConfig::from_file(&args.config)?;
    let collection = config.collection_name.clone();
    let url = config.url.clone();
    QdrantStore::drop_collection(config).await?;

    println!("Completed dropping collection {collection} at {url}");

    Ok(())
}
