pub mod config;
pub mod video;
pub mod embed;
pub mod store;
pub mod summarize;
pub mod render;
pub mod environment;

// Re-export key initialization functions
pub use environment::init_ort;
