use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info};
use tokio::{sync::Semaphore, task};

use crate::{
    embed::{Embedder, EmbeddingError},
    store::{frame_point_id, FramePoint, FrameRecord, QueryVectors, StoreError, StoreVectors},
    video::{FrameSample, OpenVideos, ReadFrames, SamplingOptions, VideoError},
};

use super::Summarizer;

/// Outcome of successfully ingesting a single video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    /// The video that was ingested.
    pub path: Utf8PathBuf,
    /// Total number of sampled frames embedded and stored.
    pub frames_stored: usize,
    /// Number of batches the frames arrived in.
    pub batches: usize,
}

/// Errors that can occur while ingesting a video into the index.
#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("Error opening video for ingestion: {path}")]
    Open { path: Utf8PathBuf, #[source] source: VideoError },
    #[error("Error decoding frames from {path}")]
    Decode { path: Utf8PathBuf, #[source] source: VideoError },
    #[error("Error embedding frames from {path}")]
    Embedding { path: Utf8PathBuf, #[source] source: EmbeddingError },
    #[error("Error storing embeddings for {path}")]
    Store { path: Utf8PathBuf, #[source] source: StoreError },
    #[error("Ingestion task for {path} ended before finishing")]
    Join { path: Utf8PathBuf, #[source] source: anyhow::Error },
}

impl<R, S, D> Summarizer<R, S, D>
where
    R: Embedder + Send + Sync + 'static,
    S: StoreVectors + QueryVectors + Send + Sync + 'static,
    D: OpenVideos + Send + Sync + 'static,
{
    /// Ingests one video end to end: decode sampled frame batches, embed each
    /// batch, and store the embeddings, batch by batch until the stream is
    /// exhausted.
    ///
    /// Decoding and embedding are compute bound and run on the blocking pool;
    /// only the store writes happen on the async runtime.
    pub async fn ingest_video(
        &self,
        path: &Utf8Path,
        sampling: SamplingOptions,
    ) -> Result<IngestReport, IngestError> {
        debug!("Ingesting video {path}");
        let opener = self.videos.clone();
        let open_path = path.to_owned();
        let mut source = task::spawn_blocking(move || opener.open(&open_path, sampling))
            .await
            .map_err(|e| IngestError::Join { path: path.to_owned(), source: e.into() })?
            .map_err(|e| IngestError::Open { path: path.to_owned(), source: e })?;

        let mut frames_stored = 0;
        let mut batches = 0;
        loop {
            // Decode and embed the next batch on the blocking pool, then take
            // the source back for the following round
            let retriever = self.retriever.clone();
            let video = path.to_owned();
            let (returned, outcome) = task::spawn_blocking(move || {
                let outcome = next_point_batch(&mut source, retriever.as_ref(), &video);
                (source, outcome)
            })
            .await
            .map_err(|e| IngestError::Join { path: path.to_owned(), source: e.into() })?;
            source = returned;

            match outcome? {
                Some(points) => {
                    frames_stored += self
                        .store
                        .store_batch(points)
                        .await
                        .map_err(|e| IngestError::Store { path: path.to_owned(), source: e })?;
                    batches += 1;
                }
                None => break,
            }
        }

        info!("Ingested {frames_stored} frames from {path} in {batches} batches");
        Ok(IngestReport { path: path.to_owned(), frames_stored, batches })
    }

    /// Ingests many videos with a bounded number of parallel jobs.
    ///
    /// Blocks until every video has finished one way or the other, then
    /// returns one outcome per input video in submission order. A failure in
    /// one video never disturbs the others.
    pub async fn ingest_videos(
        &self,
        paths: Vec<Utf8PathBuf>,
        sampling: SamplingOptions,
        jobs: usize,
    ) -> Vec<Result<IngestReport, IngestError>> {
        let semaphore = Arc::new(Semaphore::new(jobs.max(1)));
        let mut handles = vec![];

        for path in paths {
            let permit = semaphore.clone().acquire_owned().await.unwrap_or_else(|e|
                panic!("Failed to acquire semaphore permit (was the semaphore closed?): {e:?}"));
            let summarizer = self.clone();
            let task_path = path.clone();
            let handle = task::spawn(async move {
                let result = summarizer.ingest_video(&task_path, sampling).await;
                drop(permit); // Release the permit when done
                result
            });
            handles.push((path, handle));
        }

        let mut results = vec![];
        for (path, handle) in handles {
            results.push(handle.await.unwrap_or_else(|e| {
                Err(IngestError::Join { path, source: e.into() })
            }));
        }

        results
    }
}

// Private variables and functions

/// Decodes the next sampled batch from `source` and embeds it into storable
/// points. Pure CPU work, meant for the blocking pool.
fn next_point_batch<F: ReadFrames, R: Embedder>(
    source: &mut F,
    retriever: &R,
    video: &Utf8Path,
) -> Result<Option<Vec<FramePoint>>, IngestError> {
    let batch = source
        .next_batch()
        .map_err(|e| IngestError::Decode { path: video.to_owned(), source: e })?;
    match batch {
        Some(batch) => Ok(Some(batch_to_points(retriever, video, batch)?)),
        None => Ok(None),
    }
}

/// Embeds one batch of samples and pairs every embedding with its stable id
/// and metadata record.
fn batch_to_points<R: Embedder>(
    retriever: &R,
    video: &Utf8Path,
    batch: Vec<FrameSample>,
) -> Result<Vec<FramePoint>, IngestError> {
    let (images, timestamps): (Vec<_>, Vec<_>) =
        batch.into_iter().map(|sample| (sample.image, sample.timestamp)).unzip();

    let vectors = retriever
        .embed_images(&images)
        .map_err(|e| IngestError::Embedding { path: video.to_owned(), source: e })?;

    Ok(vectors
        .into_iter()
        .zip(timestamps)
        .map(|(vector, timestamp)| FramePoint {
            id: frame_point_id(video, timestamp),
            vector,
            record: FrameRecord { video: video.to_owned(), timestamp },
        })
        .collect())
}
