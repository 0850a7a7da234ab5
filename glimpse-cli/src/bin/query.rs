use std::error::Error;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use glimpse_cli::utility::{build_summarizer, init_logging};
use glimpse_core::{
    init_ort, render,
    store::CollectionMode,
    summarize::query::{Query, Summary},
    video::{FrameSource, SamplingOptions},
};
use log::warn;

#[derive(Parser, Debug)]
#[command(name = "glimpse-query")]
#[command(version = "0.1")]
#[command(about = "retrieves the stored video moments closest to a text or image query", long_about = None)]
struct Args {
    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,
    /// Text to query stored frames with
    query: Option<String>,
    /// Query with an example image instead of text
    #[arg(long)]
    image: Option<Utf8PathBuf>,
    /// Video whose frames should be retrieved
    #[arg(long)]
    video: Utf8PathBuf,
    /// The number of query results to return
    #[arg(short, long, default_value_t = 5)]
    num_results: usize,
    /// Path to the store configuration file
    #[arg(short, long, default_value = "glimpse.json")]
    config: Utf8PathBuf,
    /// Directory containing the exported encoder models and tokenizer
    #[arg(short, long)]
    model_dir: Utf8PathBuf,
    /// Directory to write the summary csv and renderings into. Nothing is
    /// written when omitted
    #[arg(short, long)]
    out_dir: Option<Utf8PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.verbose);
    init_ort(None)?;

    let query = match (&args.query, &args.image) {
        (Some(text), None) => Query::Text(text.clone()),
        (None, Some(path)) => Query::Image(image::open(path.as_std_path())?.to_rgb8()),
        _ => return Err("Provide either a text query or --image, but not both".into()),
    };

    let summarizer =
        build_summarizer(&args.config, &args.model_dir, 1, CollectionMode::CreateIfMissing).await?;

    println!("Querying stored frames of {} for the top {} results", args.video, args.num_results);
    let summary = summarizer.summarize(query, &args.video, args.num_results).await?;

    if summary.is_empty() {
        println!("No results!");
        return Ok(());
    }

    println!("Results ({}):", summary.len());
    for (i, frame) in summary.iter().enumerate() {
        let marker = if frame.image.is_some() { "" } else { " (frame unavailable)" };
        println!("{}: {:.2}s, similarity {:.4}{marker}", i + 1, frame.timestamp, frame.similarity);
    }

    if let Some(out_dir) = &args.out_dir {
        write_outputs(&summary, &args.video, out_dir)?;
    }

    Ok(())
}

fn write_outputs(summary: &Summary, video: &Utf8Path, out_dir: &Utf8Path) -> Result<(), Box<dyn Error>> {
    std::fs::create_dir_all(out_dir.as_std_path())?;

    let csv_path = out_dir.join("summary.csv");
    render::write_csv(summary, &csv_path)?;
    println!("Wrote {csv_path}");

    let sheet_path = out_dir.join("contact_sheet.png");
    render::render_contact_sheet(summary, &sheet_path)?;
    println!("Wrote {sheet_path}");

    let timeline_path = out_dir.join("timeline.png");
    render::render_timeline(summary, video_duration(video, summary), &timeline_path)?;
    println!("Wrote {timeline_path}");

    Ok(())
}

/// Duration for the timeline axis: read from the video, or padded out from
/// the last result when the video cannot be opened.
fn video_duration(video: &Utf8Path, summary: &Summary) -> f64 {
    match FrameSource::open(video, SamplingOptions::default()) {
        Ok(source) => source.duration(),
        Err(e) => {
            warn!("Could not read the duration of {video}: {e}. Scaling the timeline to the results instead");
            summary.iter().map(|f| f.timestamp).fold(0.0, f64::max) * 1.05
        }
    }
}
