use camino::Utf8Path;
use config::{Config, ConfigError, File};
use serde::Deserialize;

/// Connection and collection settings for the vector store, typically loaded
/// from a JSON file next to the application.
///
/// ```json
/// {
///     "collection_name": "video_frames",
///     "url": "http://localhost:6334",
///     "api_key": null,
///     "vector_size": 512
/// }
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Name of the collection that frame embeddings are written to and
    /// queried from.
    pub collection_name: String,
    /// Base url of the vector store service.
    pub url: String,
    /// Optional api key sent with every request. Leave unset for local
    /// unauthenticated instances.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Dimensionality of the vectors in the collection. Must match the
    /// output dimensionality of the embedding model in use.
    pub vector_size: u64,
}

impl StoreConfig {
    /// Loads a [`StoreConfig`] from the configuration file at `path`.
    ///
    /// The format is inferred from the file extension; json is what ships in
    /// the repository but anything the config crate understands works.
    pub fn from_file(path: &Utf8Path) -> Result<StoreConfig, ConfigError> {
        Config::builder()
            .add_source(File::with_name(path.as_str()))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn deserializes_full_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(
            &path,
            r#"{
                "collection_name": "video_frames",
                "url": "http://localhost:6334",
                "api_key": "secret",
                "vector_size": 512
            }"#,
        )
        .unwrap();

        let config = StoreConfig::from_file(Utf8Path::new(path.to_str().unwrap())).unwrap();

        assert_eq!(config.collection_name, "video_frames");
        assert_eq!(config.url, "http://localhost:6334");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.vector_size, 512);
    }

    #[test]
    fn api_key_defaults_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(
            &path,
            r#"{
                "collection_name": "video_frames",
                "url": "http://localhost:6334",
                "vector_size": 512
            }"#,
        )
        .unwrap();

        let config = StoreConfig::from_file(Utf8Path::new(path.to_str().unwrap())).unwrap();

        assert_eq!(config.api_key, None);
    }

    #[test]
    fn missing_field_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, r#"{ "url": "http://localhost:6334" }"#).unwrap();

        assert!(StoreConfig::from_file(Utf8Path::new(path.to_str().unwrap())).is_err());
    }
}
