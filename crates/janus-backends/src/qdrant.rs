//! Qdrant vector engine adapter over its HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use janus_core::{defaults, DistanceMetric, Error, Result, ScoredPoint, VectorIndex};

/// Default Qdrant endpoint.
pub const DEFAULT_QDRANT_URL: &str = defaults::QDRANT_URL;

/// Default collection name.
pub const DEFAULT_COLLECTION: &str = defaults::VECTOR_COLLECTION;

/// Qdrant HTTP client implementing the `VectorIndex` capability.
pub struct QdrantIndex {
    client: Client,
    base_url: String,
    collection: String,
    dimension: usize,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Serialize)]
struct CreateCollectionRequest {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct PointStruct<'a> {
    id: String,
    vector: &'a [f32],
    payload: JsonValue,
}

#[derive(Serialize)]
struct UpsertPointsRequest<'a> {
    points: Vec<PointStruct<'a>>,
}

#[derive(Serialize)]
struct DeletePointsRequest {
    points: Vec<String>,
}

#[derive(Serialize)]
struct SearchPointsRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    score_threshold: f32,
    with_payload: bool,
}

#[derive(Deserialize)]
struct SearchPointsResponse {
    #[serde(default)]
    result: Vec<RawHit>,
}

#[derive(Deserialize)]
struct RawHit {
    id: JsonValue,
    score: f32,
    #[serde(default)]
    payload: JsonValue,
}

#[derive(Serialize)]
struct RetrievePointsRequest {
    ids: Vec<String>,
    with_vector: bool,
}

#[derive(Deserialize)]
struct RetrievePointsResponse {
    #[serde(default)]
    result: Vec<RawPoint>,
}

#[derive(Deserialize)]
struct RawPoint {
    #[serde(default)]
    vector: Option<Vec<f32>>,
}

impl QdrantIndex {
    /// Create a new client with explicit configuration.
    pub fn with_config(base_url: String, collection: String, dimension: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(defaults::VECTOR_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        info!(
            subsystem = "backends",
            component = "qdrant",
            base_url = %base_url,
            collection = %collection,
            dimension,
            "Initializing Qdrant vector index"
        );

        Self {
            client,
            base_url,
            collection,
            dimension,
        }
    }

    /// Create from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `QDRANT_URL` | `http://127.0.0.1:6333` |
    /// | `QDRANT_COLLECTION` | `janus_concepts` |
    /// | `JANUS_EMBED_DIM` | `384` |
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("QDRANT_URL").unwrap_or_else(|_| DEFAULT_QDRANT_URL.to_string());
        let collection =
            std::env::var("QDRANT_COLLECTION").unwrap_or_else(|_| DEFAULT_COLLECTION.to_string());
        let dimension = std::env::var("JANUS_EMBED_DIM")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults::EMBED_DIMENSION);

        Self::with_config(base_url, collection, dimension)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(
        &self,
        name: &str,
        dim: usize,
        metric: DistanceMetric,
    ) -> Result<()> {
        let url = format!("{}/collections/{}", self.base_url, name);

        let existing = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::VectorBackend(e.to_string()))?;
        if existing.status().is_success() {
            return Ok(());
        }

        let distance = match metric {
            DistanceMetric::Cosine => "Cosine",
            DistanceMetric::Euclid => "Euclid",
            DistanceMetric::Dot => "Dot",
        };
        let request = CreateCollectionRequest {
            vectors: VectorParams {
                size: dim,
                distance: distance.to_string(),
            },
        };

        let response = self
            .client
            .put(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::VectorBackend(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::VectorBackend(format!(
                "Collection create failed: {}",
                response.status()
            )));
        }

        info!(
            subsystem = "backends",
            component = "qdrant",
            collection = name,
            dimension = dim,
            "Created vector collection"
        );
        Ok(())
    }

    #[instrument(skip(self, vector, payload), fields(subsystem = "backends", component = "qdrant", op = "upsert"))]
    async fn upsert(&self, id: Uuid, vector: &[f32], payload: JsonValue) -> Result<()> {
        self.check_dimension(vector)?;

        let request = UpsertPointsRequest {
            points: vec![PointStruct {
                id: id.to_string(),
                vector,
                payload,
            }],
        };

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::VectorBackend(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::VectorBackend(format!(
                "Upsert failed: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let request = DeletePointsRequest {
            points: vec![id.to_string()],
        };

        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url()))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::VectorBackend(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::VectorBackend(format!(
                "Delete failed: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Vec<f32>>> {
        let request = RetrievePointsRequest {
            ids: vec![id.to_string()],
            with_vector: true,
        };

        let response = self
            .client
            .post(format!("{}/points", self.collection_url()))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::VectorBackend(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::VectorBackend(format!(
                "Retrieve failed: {}",
                response.status()
            )));
        }

        let parsed: RetrievePointsResponse = response
            .json()
            .await
            .map_err(|e| Error::VectorBackend(e.to_string()))?;
        Ok(parsed.result.into_iter().next().and_then(|p| p.vector))
    }

    #[instrument(skip(self, vector), fields(subsystem = "backends", component = "qdrant", op = "search", k = k))]
    async fn search(&self, vector: &[f32], k: usize, threshold: f32) -> Result<Vec<ScoredPoint>> {
        self.check_dimension(vector)?;

        let request = SearchPointsRequest {
            vector,
            limit: k,
            score_threshold: threshold,
            with_payload: true,
        };

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::VectorBackend(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::VectorBackend(format!(
                "Search failed: {}",
                response.status()
            )));
        }

        let parsed: SearchPointsResponse = response
            .json()
            .await
            .map_err(|e| Error::VectorBackend(e.to_string()))?;

        let mut hits = Vec::with_capacity(parsed.result.len());
        for raw in parsed.result {
            let id = match &raw.id {
                JsonValue::String(s) => s.parse::<Uuid>().ok(),
                _ => None,
            };
            if let Some(id) = id {
                hits.push(ScoredPoint {
                    id,
                    score: raw.score,
                    payload: raw.payload,
                });
            }
        }

        debug!(result_count = hits.len(), "Vector search complete");
        Ok(hits)
    }
}
