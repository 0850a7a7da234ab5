use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};

use camino::{Utf8Path, Utf8PathBuf};

/// Errors that can occur during vector store operations.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The provided vector has an invalid length for this vector store.
    ///
    /// This error occurs when trying to store or query with a vector that doesn't
    /// match the dimensionality the collection was created with.
    #[error("Invalid input vector length {inputted_vector_len:?}, store requires {required_vector_len:?}")]
    InvalidVectorLength { inputted_vector_len: u64, required_vector_len: u64 },

    /// The vector store service could not be reached or refused the client.
    #[error("Error connecting to vector store at {url}")]
    Connection { url: String, #[source] source: anyhow::Error },

    /// An error occurred while managing the collection itself.
    #[error("Error performing {operation} on collection {collection:?}")]
    CollectionOperation { collection: String, operation: &'static str, #[source] source: anyhow::Error },

    /// An error occurred while writing a batch of points.
    #[error("Error storing batch of {count} points")]
    Store { count: usize, #[source] source: anyhow::Error },

    /// An error occurred during vector query execution.
    #[error("Error performing vector query")]
    Query { #[source] source: anyhow::Error },
}

/// Metadata stored alongside every frame embedding. Enough to re-decode the
/// exact frame later from its source file.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    /// Path of the video the frame was sampled from.
    pub video: Utf8PathBuf,
    /// Presentation timestamp of the frame in seconds.
    pub timestamp: f64,
}

/// A frame embedding with its identity and metadata, ready for storage.
#[derive(Debug, Clone)]
pub struct FramePoint {
    pub id: u64,
    pub vector: Vec<f32>,
    pub record: FrameRecord,
}

/// A single result of a similarity query, most similar results first.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: u64,
    /// Cosine similarity between the query vector and the stored vector.
    pub score: f32,
    pub record: FrameRecord,
}

/// Governs what happens to the target collection when a store handle opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionMode {
    /// Create the collection when it does not exist yet; existing data stays
    /// in place.
    #[default]
    CreateIfMissing,
    /// Drop any existing collection of the same name and start empty. This
    /// destroys previously indexed frames and has to be asked for explicitly.
    Recreate,
}

/// Describes an object that understands how to persist frame embeddings.
pub trait StoreVectors {
    /// Store a batch of points, upserting on id.
    ///
    /// # Returns
    ///
    /// The number of points written, or a `StoreError` if the write failed.
    fn store_batch(&self, points: Vec<FramePoint>) -> impl Future<Output = Result<usize, StoreError>> + Send;
}

/// Describes an object that understands how to perform similarity queries
/// against stored frame embeddings.
pub trait QueryVectors {
    /// Query for the `top_k` stored points most similar to `vector`,
    /// ordered most similar first. A `video` scopes the search to that
    /// video's points; `None` searches the whole collection.
    fn query(
        &self,
        vector: Vec<f32>,
        video: Option<Utf8PathBuf>,
        top_k: usize,
    ) -> impl Future<Output = Result<Vec<SearchHit>, StoreError>> + Send;
}

/// Derives the stable point id for one frame of one video.
///
/// Ids are a content hash of the video path plus the frame timestamp, so
/// frames from different videos ingested concurrently can never collide, and
/// re-ingesting a video upserts the same logical points instead of
/// duplicating them.
pub fn frame_point_id(video: &Utf8Path, timestamp: f64) -> u64 {
    let mut hasher = DefaultHasher::new();
    video.hash(&mut hasher);
    timestamp.to_bits().hash(&mut hasher);
    hasher.finish()
}

pub mod qdrant;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_are_stable_for_the_same_frame() {
        let a = frame_point_id(Utf8Path::new("/videos/cam1.mp4"), 12.5);
        let b = frame_point_id(Utf8Path::new("/videos/cam1.mp4"), 12.5);
        assert_eq!(a, b);
    }

    #[test]
    fn point_ids_differ_across_videos_at_the_same_timestamp() {
        let a = frame_point_id(Utf8Path::new("/videos/cam1.mp4"), 12.5);
        let b = frame_point_id(Utf8Path::new("/videos/cam2.mp4"), 12.5);
        assert_ne!(a, b);
    }

    #[test]
    fn point_ids_differ_across_timestamps_of_one_video() {
        let a = frame_point_id(Utf8Path::new("/videos/cam1.mp4"), 12.5);
        let b = frame_point_id(Utf8Path::new("/videos/cam1.mp4"), 12.6);
        assert_ne!(a, b);
    }

    #[test]
    fn zero_and_negative_zero_timestamps_get_distinct_ids() {
        // to_bits distinguishes the two, which keeps the mapping injective
        let a = frame_point_id(Utf8Path::new("/videos/cam1.mp4"), 0.0);
        let b = frame_point_id(Utf8Path::new("/videos/cam1.mp4"), -0.0);
        assert_ne!(a, b);
    }

    #[test]
    fn default_collection_mode_is_not_destructive() {
        assert_eq!(CollectionMode::default(), CollectionMode::CreateIfMissing);
    }
}
