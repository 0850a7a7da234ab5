use std::sync::{Arc, Mutex, MutexGuard};

use camino::Utf8Path;
use ort::session::{builder::GraphOptimizationLevel, Session};
use tokenizers::Tokenizer;

use super::EmbeddingError;

pub type SessionPool = Arc<Vec<Mutex<Session>>>;

pub trait SessionPoolExt {
    fn get_session(&'_ self) -> MutexGuard<'_, Session>;
}

impl SessionPoolExt for SessionPool {
    fn get_session(&'_ self) -> MutexGuard<'_, Session> {
        for session_mutex in self.iter() {
            if let Ok(session) = session_mutex.try_lock() {
                return session;
            }
        }
        // Fallback to waiting for any available session
        self[0].lock().unwrap()
    }
}

/// Builds a pool of `pool_size` sessions for the ONNX model at `model_path`.
///
/// Pools with more than one session allow that many embedding calls to run
/// concurrently; each session carries its own copy of the model state. A
/// request for zero sessions builds one, so a pool can always hand a
/// session out.
pub fn create_session_pool(
    pool_size: u32,
    model_path: &Utf8Path,
) -> Result<SessionPool, EmbeddingError> {
    let pool_size = pool_size.max(1);
    let mut sessions = Vec::with_capacity(pool_size as usize);
    for _ in 0..pool_size {
        let session = Session::builder()
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|builder| builder.with_intra_threads(4))
            .and_then(|builder| builder.commit_from_file(model_path))
            .map_err(|e| EmbeddingError::Initialization(e.into()))?;
        sessions.push(Mutex::new(session));
    }

    Ok(Arc::new(sessions))
}

pub fn create_tokenizer(tokenizer_path: &Utf8Path) -> Result<Tokenizer, EmbeddingError> {
    Tokenizer::from_file(tokenizer_path).map_err(|e| EmbeddingError::Initialization(anyhow::anyhow!(e)))
}
