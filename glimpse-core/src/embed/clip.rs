use camino::Utf8Path;
use image::{RgbImage, imageops::FilterType};
use log::debug;
use ndarray::{Array, Array4, Axis};
use ort::{inputs, value::TensorRef};
use tokenizers::Tokenizer;

use super::{Embedder, EmbeddingError, sessions::{SessionPool, SessionPoolExt, create_session_pool, create_tokenizer}};

/// CLIP ViT-B/32 embedder backed by a pair of exported ONNX encoders plus the
/// matching tokenizer, all loaded from one model directory:
///
/// - `image_encoder.onnx`
/// - `text_encoder.onnx`
/// - `tokenizer.json`
///
/// Both encoders project into the same 512 dimensional space, which is what
/// makes text-to-frame retrieval by cosine similarity work. The retriever is
/// an ordinary owned value; share it with an [`std::sync::Arc`] and it is gone
/// when the last clone drops.
pub struct ClipRetriever {
    image_sessions: SessionPool,
    text_sessions: SessionPool,
    tokenizer: Tokenizer,
}

impl ClipRetriever {
    pub const VECTOR_LENGTH: u32 = 512;

    /// Loads both encoders and the tokenizer from `model_dir` with a single
    /// session each.
    pub fn load(model_dir: &Utf8Path) -> Result<ClipRetriever, EmbeddingError> {
        Self::load_pooled(model_dir, 1)
    }

    /// Loads both encoders with `pool_size` sessions each, allowing that many
    /// embedding calls to run concurrently. A `pool_size` of zero loads one
    /// session.
    pub fn load_pooled(model_dir: &Utf8Path, pool_size: u32) -> Result<ClipRetriever, EmbeddingError> {
        debug!("Initializing CLIP encoder sessions from {model_dir}");
        let image_sessions = create_session_pool(pool_size, &model_dir.join(IMAGE_MODEL_FILE))?;
        let text_sessions = create_session_pool(pool_size, &model_dir.join(TEXT_MODEL_FILE))?;
        let tokenizer = create_tokenizer(&model_dir.join(TOKENIZER_FILE))?;

        Ok(ClipRetriever { image_sessions, text_sessions, tokenizer })
    }
}

impl Embedder for ClipRetriever {
    fn embed_images(&self, images: &[RgbImage]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if images.is_empty() {
            return Ok(vec![]);
        }

        let element = format!("batch of {} frames", images.len());
        let input = images_to_tensor(images);

        let mut model = self.image_sessions.get_session();
        let outputs = model.run(inputs![
                "input" => TensorRef::from_array_view(&input)
                    .map_err(|e| EmbeddingError::Preprocessing {
                        element: element.clone(),
                        step: "Converting to tensor",
                        source: e.into(),
                    })?
            ])
            .map_err(|e| EmbeddingError::Calculation { element: element.clone(),
                step: "Performing image embedding", source: e.into() })?;

        let embeddings = outputs
            .get("output")
            .expect("model should place output in 'output' key")
            .try_extract_array::<f32>()
            .map_err(|e| EmbeddingError::Unknown {
                msg: "Error while extracting array from output as f32",
                source: e.into(),
            })?
            .into_owned()
            .into_shape_with_order((images.len(), Self::VECTOR_LENGTH as usize))
            .map_err(|e| EmbeddingError::Calculation { element,
                step: "Reshaping model output", source: e.into() })?;

        Ok(embeddings.outer_iter().map(|row| row.to_vec()).collect())
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let element = format!("Query: {text}");

        let encoding = self.tokenizer.encode(text.to_lowercase(), true)
            .map_err(|e| EmbeddingError::Preprocessing {
                element: element.clone(),
                step: "tokenizing",
                source: anyhow::anyhow!(e) })?;
        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|n| *n as i64).collect();

        let input = Array::from_vec(input_ids)
            .insert_axis(Axis(0));

        let mut model = self.text_sessions.get_session();
        let result = model.run(inputs![
                "input" => TensorRef::from_array_view(&input)
                    .map_err(|e| EmbeddingError::Preprocessing {
                        element: element.clone(),
                        step: "Converting to tensor",
                        source: e.into(),
                    })?
            ])
            .map_err(|e| EmbeddingError::Calculation {
                element: element.clone(),
                step: "Performing text embedding", source: e.into()
            })?
            .get("output")
            .expect("model should place output in 'output' key")
            .try_extract_array::<f32>()
            .map_err(|e| EmbeddingError::Unknown {
                msg: "Error while extracting array from output as f32",
                source: e.into(),
            })?
            .into_owned()
            .into_shape_with_order((Self::VECTOR_LENGTH as usize,))
            .map_err(|e| EmbeddingError::Calculation { element,
                step: "Reshaping model output", source: e.into() })?
            .to_vec();

        Ok(result)
    }

    fn vector_len(&self) -> usize {
        Self::VECTOR_LENGTH as usize
    }
}

// Private variables and functions

const IMAGE_MODEL_FILE: &str = "image_encoder.onnx";
const TEXT_MODEL_FILE: &str = "text_encoder.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";

const IMAGE_SIDE: usize = 224;
// Channel statistics the CLIP encoders were trained with
const CLIP_MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
const CLIP_STD: [f32; 3] = [0.26862954, 0.26130258, 0.27577711];

/// Resizes each frame to the model's square input size and lays the pixels
/// out as a normalized NCHW tensor.
fn images_to_tensor(images: &[RgbImage]) -> Array4<f32> {
    let mut input = Array::zeros((images.len(), 3, IMAGE_SIDE, IMAGE_SIDE));
    for (i, image) in images.iter().enumerate() {
        let resized = image::imageops::resize(
            image,
            IMAGE_SIDE as u32,
            IMAGE_SIDE as u32,
            FilterType::Triangle,
        );
        for (x, y, pixel) in resized.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            let (x, y) = (x as usize, y as usize);
            input[[i, 0, y, x]] = ((r as f32 / 255.) - CLIP_MEAN[0]) / CLIP_STD[0];
            input[[i, 1, y, x]] = ((g as f32 / 255.) - CLIP_MEAN[1]) / CLIP_STD[1];
            input[[i, 2, y, x]] = ((b as f32 / 255.) - CLIP_MEAN[2]) / CLIP_STD[2];
        }
    }

    input
}
