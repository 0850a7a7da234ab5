use std::ops::{Deref, DerefMut};

use camino::{Utf8Path, Utf8PathBuf};
use image::RgbImage;
use log::warn;
use tokio::task;

use crate::{
    embed::{Embedder, EmbeddingError},
    store::{QueryVectors, SearchHit, StoreError, StoreVectors},
    video::{OpenVideos, ReadFrames, SamplingOptions, VideoError},
};

use super::Summarizer;

/// What to look for in a video.
#[derive(Debug, Clone)]
pub enum Query {
    /// Free text describing the moment to retrieve.
    Text(String),
    /// An example image to match frames against.
    Image(RgbImage),
}

/// One retrieved moment of a [`Summary`].
#[derive(Debug, Clone)]
pub struct SummaryFrame {
    /// Seconds from the start of the video.
    pub timestamp: f64,
    /// Similarity between the query and the stored frame embedding.
    pub similarity: f32,
    /// The decoded frame, when the video still yields one at this timestamp.
    pub image: Option<RgbImage>,
}

/// Frames of one video answering one query, ordered by descending similarity.
pub struct Summary {
    /// The video the frames were retrieved from.
    pub video: Utf8PathBuf,
    results: Vec<SummaryFrame>,
}
impl Summary {
    pub fn with(video: Utf8PathBuf, results: Vec<SummaryFrame>) -> Summary {
        Summary { video, results }
    }
}
impl Deref for Summary {
    type Target = Vec<SummaryFrame>;

    fn deref(&self) -> &Self::Target {
        &self.results
    }
}
impl DerefMut for Summary {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.results
    }
}
impl IntoIterator for Summary {
    type Item = SummaryFrame;
    type IntoIter = std::vec::IntoIter<SummaryFrame>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

/// Errors that can occur while answering a query.
#[derive(thiserror::Error, Debug)]
pub enum SummaryError {
    #[error("Error embedding the query")]
    EmbedQuery { #[source] source: EmbeddingError },
    #[error("Error searching the vector store")]
    Search { #[source] source: StoreError },
    #[error("Error reading result frames back from {path}")]
    Video { path: Utf8PathBuf, #[source] source: VideoError },
    #[error("Summarization task ended before finishing")]
    Join { #[source] source: anyhow::Error },
}

impl<R, S, D> Summarizer<R, S, D>
where
    R: Embedder + Send + Sync + 'static,
    S: StoreVectors + QueryVectors + Send + Sync + 'static,
    D: OpenVideos + Send + Sync + 'static,
{
    /// Answers `query` with the most similar stored frames of `video`, at
    /// most `top_k` of them.
    ///
    /// The search is scoped to `video`'s points, so a summary only comes
    /// back shorter than `top_k` when the video has fewer stored frames.
    /// Every hit is resolved back to pixels with a fresh frame lookup; a
    /// timestamp the video no longer yields keeps its row with
    /// [`SummaryFrame::image`] set to `None`.
    pub async fn summarize(
        &self,
        query: Query,
        video: &Utf8Path,
        top_k: usize,
    ) -> Result<Summary, SummaryError> {
        let retriever = self.retriever.clone();
        let vector = task::spawn_blocking(move || embed_query(retriever.as_ref(), &query))
            .await
            .map_err(|e| SummaryError::Join { source: e.into() })??;

        let hits = self
            .store
            .query(vector, Some(video.to_owned()), top_k)
            .await
            .map_err(|e| SummaryError::Search { source: e })?;

        let videos = self.videos.clone();
        let video = video.to_owned();
        task::spawn_blocking(move || attach_frames(videos.as_ref(), video, hits))
            .await
            .map_err(|e| SummaryError::Join { source: e.into() })?
    }

    /// Answers several queries against the same video, yielding one summary
    /// per query in order. Stops at the first query that cannot be answered.
    pub async fn summarize_all(
        &self,
        queries: Vec<Query>,
        video: &Utf8Path,
        top_k: usize,
    ) -> Result<Vec<Summary>, SummaryError> {
        let mut summaries = Vec::with_capacity(queries.len());
        for query in queries {
            summaries.push(self.summarize(query, video, top_k).await?);
        }
        Ok(summaries)
    }
}

// Private variables and functions

/// Embeds either query variant into a single search vector. Compute bound,
/// meant for the blocking pool.
fn embed_query<R: Embedder>(retriever: &R, query: &Query) -> Result<Vec<f32>, SummaryError> {
    match query {
        Query::Text(text) => retriever
            .embed_text(text)
            .map_err(|e| SummaryError::EmbedQuery { source: e }),
        Query::Image(image) => retriever
            .embed_images(std::slice::from_ref(image))
            .map_err(|e| SummaryError::EmbedQuery { source: e })?
            .pop()
            .ok_or_else(|| SummaryError::EmbedQuery {
                source: EmbeddingError::Unknown {
                    msg: "embedding a single query image produced no vector",
                    source: anyhow::anyhow!("empty embedding batch"),
                },
            }),
    }
}

/// Resolves hits back to pixels by reopening the video and seeking to each
/// hit's timestamp. Compute bound, meant for the blocking pool.
fn attach_frames<D: OpenVideos>(
    videos: &D,
    video: Utf8PathBuf,
    hits: Vec<SearchHit>,
) -> Result<Summary, SummaryError> {
    if hits.is_empty() {
        return Ok(Summary::with(video, vec![]));
    }

    let mut source = videos
        .open(&video, SamplingOptions::default())
        .map_err(|e| SummaryError::Video { path: video.clone(), source: e })?;

    let mut lookup = |timestamp: f64| match source.frame_at(timestamp) {
        Ok(Some(sample)) => Some(sample.image),
        Ok(None) => {
            warn!("No frame at {timestamp}s in {video}, keeping the result without pixels");
            None
        }
        Err(e) => {
            warn!("Error reading the frame at {timestamp}s from {video}: {e}");
            None
        }
    };
    let results = assemble_summary(hits, &mut lookup);
    Ok(Summary::with(video, results))
}

/// Builds summary rows from hits, keeping the store's descending-similarity
/// order.
fn assemble_summary(
    hits: Vec<SearchHit>,
    lookup: &mut impl FnMut(f64) -> Option<RgbImage>,
) -> Vec<SummaryFrame> {
    hits.into_iter()
        .map(|hit| SummaryFrame {
            timestamp: hit.record.timestamp,
            similarity: hit.score,
            image: lookup(hit.record.timestamp),
        })
        .collect()
}
