use std::collections::HashMap;

use camino::Utf8PathBuf;
use log::{debug, warn};
use qdrant_client::qdrant::{
    point_id::PointIdOptions, value::Kind, Condition, CreateCollectionBuilder, Distance, Filter,
    PointId, PointStruct, SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};

use crate::config::StoreConfig;

use super::{
    CollectionMode, FramePoint, FrameRecord, QueryVectors, SearchHit, StoreError, StoreVectors,
};

/// Vector store handle backed by one Qdrant collection.
///
/// The handle has an explicit lifecycle: [`QdrantStore::connect`] builds the
/// client and ensures the collection exists, [`QdrantStore::close`] consumes
/// the handle so that further operations are a compile error rather than a
/// runtime one.
pub struct QdrantStore {
    client: Qdrant,
    collection_name: String,
    vector_size: u64,
}

impl QdrantStore {
    /// Connects to the Qdrant service described by `config` and prepares the
    /// target collection according to `mode`.
    ///
    /// Collections are created with cosine distance, so query scores are
    /// cosine similarities.
    pub async fn connect(config: StoreConfig, mode: CollectionMode) -> Result<QdrantStore, StoreError> {
        let client = Qdrant::from_url(&config.url)
            .api_key(config.api_key.clone())
            .build()
            .map_err(|e| StoreError::Connection { url: config.url.clone(), source: e.into() })?;

        let exists = client
            .collection_exists(config.collection_name.as_str())
            .await
            .map_err(|e| StoreError::CollectionOperation {
                collection: config.collection_name.clone(),
                operation: "existence check",
                source: e.into(),
            })?;

        let store = QdrantStore {
            client,
            collection_name: config.collection_name,
            vector_size: config.vector_size,
        };

        match mode {
            CollectionMode::CreateIfMissing => {
                if !exists {
                    store.create_collection().await?;
                }
            }
            CollectionMode::Recreate => {
                if exists {
                    warn!("Dropping existing collection {:?} before recreating it", store.collection_name);
                    store.delete_collection().await?;
                }
                store.create_collection().await?;
            }
        }

        Ok(store)
    }

    /// Closes the handle, dropping the underlying client connection.
    pub fn close(self) {
        debug!("Closing vector store handle for collection {:?}", self.collection_name);
    }

    /// Deletes the collection named in `config` outright, without keeping a
    /// handle around. Maintenance tooling only; anything indexed is gone.
    pub async fn drop_collection(config: StoreConfig) -> Result<(), StoreError> {
        let client = Qdrant::from_url(&config.url)
            .api_key(config.api_key.clone())
            .build()
            .map_err(|e| StoreError::Connection { url: config.url.clone(), source: e.into() })?;

        client
            .delete_collection(config.collection_name.as_str())
            .await
            .map_err(|e| StoreError::CollectionOperation {
                collection: config.collection_name.clone(),
                operation: "delete",
                source: e.into(),
            })?;

        Ok(())
    }

    async fn create_collection(&self) -> Result<(), StoreError> {
        debug!(
            "Creating collection {:?} with vector size {}",
            self.collection_name, self.vector_size
        );
        self.client
            .create_collection(
                CreateCollectionBuilder::new(self.collection_name.as_str())
                    .vectors_config(VectorParamsBuilder::new(self.vector_size, Distance::Cosine)),
            )
            .await
            .map_err(|e| StoreError::CollectionOperation {
                collection: self.collection_name.clone(),
                operation: "create",
                source: e.into(),
            })?;

        Ok(())
    }

    async fn delete_collection(&self) -> Result<(), StoreError> {
        self.client
            .delete_collection(self.collection_name.as_str())
            .await
            .map_err(|e| StoreError::CollectionOperation {
                collection: self.collection_name.clone(),
                operation: "delete",
                source: e.into(),
            })?;

        Ok(())
    }

    fn check_vector_len(&self, len: usize) -> Result<(), StoreError> {
        if len as u64 != self.vector_size {
            return Err(StoreError::InvalidVectorLength {
                inputted_vector_len: len as u64,
                required_vector_len: self.vector_size,
            });
        }
        Ok(())
    }
}

impl StoreVectors for QdrantStore {
    async fn store_batch(&self, points: Vec<FramePoint>) -> Result<usize, StoreError> {
        if points.is_empty() {
            return Ok(0);
        }
        for point in &points {
            self.check_vector_len(point.vector.len())?;
        }

        let count = points.len();
        let points: Vec<PointStruct> = points
            .into_iter()
            .map(|point| PointStruct::new(point.id, point.vector, payload_for(&point.record)))
            .collect();

        // wait(true) makes the write visible to queries that follow it
        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection_name.as_str(), points).wait(true))
            .await
            .map_err(|e| StoreError::Store { count, source: e.into() })?;

        Ok(count)
    }
}

impl QueryVectors for QdrantStore {
    async fn query(
        &self,
        vector: Vec<f32>,
        video: Option<Utf8PathBuf>,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        self.check_vector_len(vector.len())?;

        // Scoping happens server side so top_k keeps its meaning per video
        let mut search =
            SearchPointsBuilder::new(self.collection_name.as_str(), vector, top_k as u64)
                .with_payload(true);
        if let Some(video) = video {
            search = search.filter(Filter::must([Condition::matches(
                VIDEO_KEY,
                video.into_string(),
            )]));
        }

        let response = self.client
            .search_points(search)
            .await
            .map_err(|e| StoreError::Query { source: e.into() })?;

        let mut hits = Vec::with_capacity(response.result.len());
        for point in response.result {
            let Some(id) = numeric_id(point.id.as_ref()) else {
                warn!("Skipping search result with missing or non numeric id");
                continue;
            };
            let Some(record) = record_from_payload(&point.payload) else {
                warn!("Skipping search result {id} with incomplete payload");
                continue;
            };
            hits.push(SearchHit { id, score: point.score, record });
        }

        Ok(hits)
    }
}

// Private variables and functions

const VIDEO_KEY: &str = "video";
const TIMESTAMP_KEY: &str = "timestamp";

fn payload_for(record: &FrameRecord) -> Payload {
    let mut payload = Payload::new();
    payload.insert(VIDEO_KEY, record.video.as_str());
    payload.insert(TIMESTAMP_KEY, record.timestamp);
    payload
}

fn numeric_id(id: Option<&PointId>) -> Option<u64> {
    match id?.point_id_options.as_ref()? {
        PointIdOptions::Num(n) => Some(*n),
        PointIdOptions::Uuid(_) => None,
    }
}

fn record_from_payload(payload: &HashMap<String, Value>) -> Option<FrameRecord> {
    let video = match payload.get(VIDEO_KEY)?.kind.as_ref()? {
        Kind::StringValue(s) => Utf8PathBuf::from(s),
        _ => return None,
    };
    let timestamp = match payload.get(TIMESTAMP_KEY)?.kind.as_ref()? {
        Kind::DoubleValue(d) => *d,
        Kind::IntegerValue(i) => *i as f64,
        _ => return None,
    };

    Some(FrameRecord { video, timestamp })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_of(kind: Kind) -> Value {
        Value { kind: Some(kind) }
    }

    #[test]
    fn payload_round_trips_to_a_record() {
        let mut payload = HashMap::new();
        payload.insert(VIDEO_KEY.to_string(), value_of(Kind::StringValue("/videos/cam1.mp4".to_string())));
        payload.insert(TIMESTAMP_KEY.to_string(), value_of(Kind::DoubleValue(42.5)));

        let record = record_from_payload(&payload).expect("payload should parse");
        assert_eq!(record.video, Utf8PathBuf::from("/videos/cam1.mp4"));
        assert_eq!(record.timestamp, 42.5);
    }

    #[test]
    fn integer_timestamps_are_widened() {
        let mut payload = HashMap::new();
        payload.insert(VIDEO_KEY.to_string(), value_of(Kind::StringValue("cam.mp4".to_string())));
        payload.insert(TIMESTAMP_KEY.to_string(), value_of(Kind::IntegerValue(7)));

        let record = record_from_payload(&payload).expect("payload should parse");
        assert_eq!(record.timestamp, 7.0);
    }

    #[test]
    fn incomplete_payloads_parse_to_none() {
        let mut missing_timestamp = HashMap::new();
        missing_timestamp.insert(
            VIDEO_KEY.to_string(),
            value_of(Kind::StringValue("cam.mp4".to_string())),
        );
        assert!(record_from_payload(&missing_timestamp).is_none());

        let mut wrong_type = HashMap::new();
        wrong_type.insert(VIDEO_KEY.to_string(), value_of(Kind::IntegerValue(1)));
        wrong_type.insert(TIMESTAMP_KEY.to_string(), value_of(Kind::DoubleValue(1.0)));
        assert!(record_from_payload(&wrong_type).is_none());

        assert!(record_from_payload(&HashMap::new()).is_none());
    }

    #[test]
    fn only_numeric_point_ids_are_accepted() {
        let numeric = PointId { point_id_options: Some(PointIdOptions::Num(99)) };
        assert_eq!(numeric_id(Some(&numeric)), Some(99));

        let uuid = PointId { point_id_options: Some(PointIdOptions::Uuid("abc".to_string())) };
        assert_eq!(numeric_id(Some(&uuid)), None);

        assert_eq!(numeric_id(None), None);
    }
}
