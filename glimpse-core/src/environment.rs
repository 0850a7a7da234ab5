use std::error::Error;

use camino::Utf8Path;
use log::{error, info};
use ort::execution_providers::*;

/// Initializes the ONNX Runtime environment the encoder sessions run in.
///
/// Call once at startup, before loading a [`crate::embed::ClipRetriever`].
/// When `onnx_lib_dir` is given, the runtime dynamic library is loaded from
/// that directory (by its platform-specific name) instead of the standard
/// search paths, which bundled installs rely on.
pub fn init_ort(onnx_lib_dir: Option<&Utf8Path>) -> Result<(), Box<dyn Error>> {
    let mut providers = vec![];
    #[cfg(feature = "cuda")]
    providers.push(CUDAExecutionProvider::default().build().error_on_failure());
    providers.push(CPUExecutionProvider::default().build());

    let result = match onnx_lib_dir {
        Some(dir) => ort::init_from(dir.join(RUNTIME_LIBRARY))
            .with_execution_providers(providers)
            .commit(),
        None => ort::init().with_execution_providers(providers).commit(),
    };

    match result {
        Ok(_) => {
            info!("ONNX Runtime initialized");
            Ok(())
        }
        Err(e) => {
            error!("Failed to initialize ONNX Runtime: {e}");
            Err(e.into())
        }
    }
}

// Private variables and functions

#[cfg(windows)]
const RUNTIME_LIBRARY: &str = "onnxruntime.dll";
#[cfg(target_os = "macos")]
const RUNTIME_LIBRARY: &str = "libonnxruntime.dylib";
#[cfg(all(not(windows), not(target_os = "macos")))]
const RUNTIME_LIBRARY: &str = "libonnxruntime.so";
