use std::sync::Arc;

use crate::{
    embed::Embedder,
    store::{QueryVectors, StoreVectors},
    video::{OpenVideos, VideoFiles},
};

/// Orchestrates the whole pipeline: decoding videos into sampled frame
/// batches, embedding them, storing the embeddings, and answering text or
/// image queries with re-decoded frames.
///
/// The summarizer owns nothing heavier than a few [`Arc`]s; cloning one is
/// cheap and every clone talks to the same embedder, store, and opener.
pub struct Summarizer<R, S, D = VideoFiles> {
    retriever: Arc<R>,
    store: Arc<S>,
    videos: Arc<D>,
}

impl<R, S> Summarizer<R, S>
where
    R: Embedder + Send + Sync + 'static,
    S: StoreVectors + QueryVectors + Send + Sync + 'static,
{
    /// Builds a summarizer from an embedder and a vector store handle,
    /// reading frames from video files on disk.
    pub fn with(retriever: Arc<R>, store: Arc<S>) -> Summarizer<R, S> {
        Summarizer::with_videos(retriever, store, Arc::new(VideoFiles))
    }
}

impl<R, S, D> Summarizer<R, S, D>
where
    R: Embedder + Send + Sync + 'static,
    S: StoreVectors + QueryVectors + Send + Sync + 'static,
    D: OpenVideos + Send + Sync + 'static,
{
    /// Builds a summarizer that reads frames through `videos` instead of
    /// the file decoder.
    pub fn with_videos(retriever: Arc<R>, store: Arc<S>, videos: Arc<D>) -> Summarizer<R, S, D> {
        Summarizer { retriever, store, videos }
    }
}

impl<R, S, D> Clone for Summarizer<R, S, D> {
    fn clone(&self) -> Self {
        Summarizer {
            retriever: self.retriever.clone(),
            store: self.store.clone(),
            videos: self.videos.clone(),
        }
    }
}

pub mod ingest;
pub mod query;

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use camino::{Utf8Path, Utf8PathBuf};
    use image::RgbImage;

    use crate::embed::{Embedder, EmbeddingError};
    use crate::store::{FramePoint, QueryVectors, SearchHit, StoreError, StoreVectors};
    use crate::video::{FrameSample, OpenVideos, ReadFrames, SamplingOptions, VideoError};

    /// Embedder stub that projects every image onto its top left pixel color,
    /// so tests can reason about similarity without model files.
    pub(crate) struct PixelEmbedder;

    impl Embedder for PixelEmbedder {
        fn embed_images(&self, images: &[RgbImage]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(images
                .iter()
                .map(|image| {
                    let pixel = image.get_pixel(0, 0);
                    vec![
                        pixel.0[0] as f32 / 255.0,
                        pixel.0[1] as f32 / 255.0,
                        pixel.0[2] as f32 / 255.0,
                        1.0,
                    ]
                })
                .collect())
        }

        fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let vector = if text.contains("red") {
                vec![1.0, 0.0, 0.0, 1.0]
            } else if text.contains("green") {
                vec![0.0, 1.0, 0.0, 1.0]
            } else if text.contains("blue") {
                vec![0.0, 0.0, 1.0, 1.0]
            } else {
                vec![0.5, 0.5, 0.5, 1.0]
            };
            Ok(vector)
        }

        fn vector_len(&self) -> usize {
            4
        }
    }

    /// In-memory stand-in for the vector store, scoring by cosine similarity
    /// and upserting on id like the real one.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub(crate) points: Mutex<Vec<FramePoint>>,
        pub(crate) fail_stores: bool,
    }

    impl StoreVectors for MemoryStore {
        async fn store_batch(&self, points: Vec<FramePoint>) -> Result<usize, StoreError> {
            if self.fail_stores {
                return Err(StoreError::Store {
                    count: points.len(),
                    source: anyhow::anyhow!("synthetic store failure"),
                });
            }

            let mut guard = self.points.lock().unwrap();
            let count = points.len();
            for point in points {
                if let Some(existing) = guard.iter_mut().find(|p| p.id == point.id) {
                    *existing = point;
                } else {
                    guard.push(point);
                }
            }
            Ok(count)
        }
    }

    impl QueryVectors for MemoryStore {
        async fn query(
            &self,
            vector: Vec<f32>,
            video: Option<Utf8PathBuf>,
            top_k: usize,
        ) -> Result<Vec<SearchHit>, StoreError> {
            let guard = self.points.lock().unwrap();
            let mut hits: Vec<SearchHit> = guard
                .iter()
                .filter(|point| video.as_ref().map_or(true, |v| &point.record.video == v))
                .map(|point| SearchHit {
                    id: point.id,
                    score: cosine(&vector, &point.vector),
                    record: point.record.clone(),
                })
                .collect();
            hits.sort_by(|a, b| b.score.total_cmp(&a.score));
            hits.truncate(top_k);
            Ok(hits)
        }
    }

    /// Frame opener stub mapping each path to a scripted clip of
    /// pre-sampled frames, so orchestrator tests run without video files.
    /// Opening an unscripted path fails the way a missing file would.
    #[derive(Default)]
    pub(crate) struct StubVideos {
        clips: HashMap<Utf8PathBuf, Vec<FrameSample>>,
    }

    impl StubVideos {
        pub(crate) fn clip(mut self, path: &str, frames: Vec<FrameSample>) -> StubVideos {
            self.clips.insert(Utf8PathBuf::from(path), frames);
            self
        }
    }

    impl OpenVideos for StubVideos {
        type Source = StubSource;

        fn open(
            &self,
            path: &Utf8Path,
            options: SamplingOptions,
        ) -> Result<StubSource, VideoError> {
            let frames = self.clips.get(path).cloned().ok_or_else(|| VideoError::Open {
                path: path.to_owned(),
                source: anyhow::anyhow!("no scripted clip at this path"),
            })?;
            Ok(StubSource { frames, batch_size: options.batch_size.max(1) })
        }
    }

    /// Hands a scripted clip out in batches, with exact-timestamp lookup.
    pub(crate) struct StubSource {
        frames: Vec<FrameSample>,
        batch_size: usize,
    }

    impl ReadFrames for StubSource {
        fn next_batch(&mut self) -> Result<Option<Vec<FrameSample>>, VideoError> {
            if self.frames.is_empty() {
                return Ok(None);
            }
            let take = self.batch_size.min(self.frames.len());
            Ok(Some(self.frames.drain(..take).collect()))
        }

        fn frame_at(&mut self, timestamp: f64) -> Result<Option<FrameSample>, VideoError> {
            Ok(self.frames.iter().find(|f| f.timestamp == timestamp).cloned())
        }
    }

    pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }
}
