use std::{error::Error, time::Duration};

use camino::Utf8PathBuf;
use clap::Parser;
use glimpse_cli::utility::{build_summarizer, init_logging};
use glimpse_core::{init_ort, store::CollectionMode, video::SamplingOptions};
use indicatif::ProgressBar;
use tokio::runtime;

#[derive(Parser, Debug)]
#[command(name = "glimpse-ingest")]
#[command(version = "0.1")]
#[command(about = "samples video frames, embeds them, and stores them for retrieval", long_about = None)]
struct Args {
    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,
    /// Number of videos to ingest in parallel
    #[arg(short, long, default_value_t = 4)]
    jobs: usize,
    /// Drop and recreate the collection before ingesting
    #[arg(long)]
    recreate: bool,
    /// Path to the store configuration file
    #[arg(short, long, default_value = "glimpse.json")]
    config: Utf8PathBuf,
    /// Directory containing the exported encoder models and tokenizer
    #[arg(short, long)]
    model_dir: Utf8PathBuf,
    /// Number of sampled frames decoded and embedded per batch
    #[arg(short, long, default_value_t = 5)]
    batch_size: usize,
    /// Keep one frame out of every this many decoded frames
    #[arg(short, long, default_value_t = 10)]
    interval: usize,
    /// Video files to ingest
    videos: Vec<Utf8PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.verbose);
    init_ort(None)?;

    if args.videos.is_empty() {
        println!("Nothing to do! Goodbye.");
        return Ok(());
    }

    let rt = runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create runtime");

    rt.block_on(async move {
        let mode = if args.recreate {
            CollectionMode::Recreate
        } else {
            CollectionMode::CreateIfMissing
        };
        let summarizer =
            build_summarizer(&args.config, &args.model_dir, args.jobs.max(1) as u32, mode).await?;
        let sampling = SamplingOptions { batch_size: args.batch_size, interval: args.interval };

        println!(
            "Ingesting {} video(s) with {} parallel jobs (one frame kept per {} decoded, batches of {})",
            args.videos.len(),
            args.jobs,
            args.interval,
            args.batch_size
        );
        let bar = ProgressBar::new_spinner();
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message("Ingesting...");
        let outcomes = summarizer.ingest_videos(args.videos, sampling, args.jobs).await;
        bar.finish_and_clear();

        let mut success = 0;
        let mut fail = 0;
        for outcome in outcomes {
            match outcome {
                Ok(report) => {
                    println!(
                        "Video {} ingested: {} frames stored in {} batches",
                        report.path, report.frames_stored, report.batches
                    );
                    success += 1;
                }
                Err(e) => {
                    println!("{e}, caused by: {:?}", e.source());
                    fail += 1;
                }
            }
        }

        println!("{success} video(s) successfully ingested, {fail} video(s) failed.");
        if fail > 0 {
            return Err(
                anyhow::anyhow!("{fail} of {} video(s) failed to ingest", success + fail).into()
            );
        }

        Ok(())
    })
}
