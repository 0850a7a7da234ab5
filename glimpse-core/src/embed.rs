use image::RgbImage;

#[derive(thiserror::Error, Debug)]
pub enum EmbeddingError {
    #[error("Error during initialization of model and tokenizer for embedding")]
    Initialization(#[source] anyhow::Error),
    #[error("Error while preprocessing data in preparation for embedding: {element} at step: {step}")]
    Preprocessing { element: String, step: &'static str, #[source] source: anyhow::Error },
    #[error("Error while performing neural network calculations with {element} at step: {step}")]
    Calculation { element: String, step: &'static str, #[source] source: anyhow::Error },
    #[error("Error: {msg}")]
    Unknown { msg: &'static str, #[source] source: anyhow::Error },
}

/// Describes an object that can project images and natural language into one
/// shared vector space, so that a text query can be compared against stored
/// frame embeddings by cosine similarity.
///
/// Methods are synchronous and compute bound; callers that live on an async
/// runtime are expected to wrap them in blocking tasks.
pub trait Embedder {
    /// Embed a batch of rgb frames, returning one vector per frame in input
    /// order. An empty batch yields an empty result.
    ///
    /// The whole batch is held in memory as one model input; callers bound
    /// memory use through their batch size.
    fn embed_images(&self, images: &[RgbImage]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a natural language description into the same space as
    /// [`Embedder::embed_images`].
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Dimensionality of vectors produced by this embedder.
    fn vector_len(&self) -> usize;
}

pub mod sessions;

// model modules
pub mod clip;

pub use clip::ClipRetriever;
