//! HTTP client wrapper for interacting with Qdrant.

use crate::config::Config;
use crate::processing::store::{Partition, StoreError, VectorStore};
use crate::processing::types::{EmbeddedChunk, EmbeddedRecord};
use crate::qdrant::{
    filters::{DOCUMENT_ID_FIELD, document_filter},
    payload::{chunk_payload, current_timestamp_rfc3339, generate_point_id, record_payload},
    types::{CountResponse, ListCollectionsResponse, QdrantError},
};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};

/// Lightweight HTTP client for Qdrant operations.
pub struct QdrantService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) chunk_collection: String,
    pub(crate) record_collection: String,
    pub(crate) vector_size: usize,
}

impl QdrantService {
    /// Construct a client from configuration. Fails when `QDRANT_URL` is unset or malformed.
    pub fn new(config: &Config) -> Result<Self, QdrantError> {
        let url = config
            .qdrant_url
            .as_deref()
            .ok_or_else(|| QdrantError::InvalidUrl("QDRANT_URL is not set".into()))?;
        let client = Client::builder().user_agent("ragingest/0.1").build()?;
        let base_url = normalize_base_url(url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = %config
                .qdrant_api_key
                .as_deref()
                .map(|value| !value.is_empty())
                .unwrap_or(false),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key: config.qdrant_api_key.clone(),
            chunk_collection: config.chunk_collection.clone(),
            record_collection: config.record_collection.clone(),
            vector_size: config.embedding_dimension,
        })
    }

    /// Collection backing a partition.
    pub fn collection_for(&self, partition: Partition) -> &str {
        match partition {
            Partition::Chunks => &self.chunk_collection,
            Partition::Records => &self.record_collection,
        }
    }

    /// Create both collections and their `document_id` index when missing.
    pub async fn ensure_collections(&self) -> Result<(), QdrantError> {
        for partition in Partition::ALL {
            let collection = self.collection_for(partition);
            self.create_collection_if_not_exists(collection, self.vector_size as u64)
                .await?;
            self.ensure_payload_index(collection, DOCUMENT_ID_FIELD, "keyword")
                .await?;
        }
        Ok(())
    }

    /// Create a collection only when it is missing from Qdrant.
    pub async fn create_collection_if_not_exists(
        &self,
        collection_name: &str,
        vector_size: u64,
    ) -> Result<(), QdrantError> {
        if self.collection_exists(collection_name).await? {
            return Ok(());
        }

        tracing::info!(
            collection = collection_name,
            vector_size,
            "Creating collection"
        );
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{collection_name}"))
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, "Collection created");
        })
        .await
    }

    /// Retrieve the names of all collections present in Qdrant.
    pub async fn list_collections(&self) -> Result<Vec<String>, QdrantError> {
        let response = self.request(Method::GET, "collections").send().await?;

        if response.status().is_success() {
            let payload: ListCollectionsResponse = response.json().await?;
            Ok(payload
                .result
                .collections
                .into_iter()
                .map(|collection| collection.name)
                .collect())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Failed to list collections");
            Err(error)
        }
    }

    /// Exact count of points matching `filter`.
    pub async fn count_points(&self, collection_name: &str, filter: Value) -> Result<u64, QdrantError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection_name}/points/count"),
            )
            .json(&json!({ "filter": filter, "exact": true }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = collection_name, error = %error, "Qdrant count failed");
            return Err(error);
        }

        let CountResponse { result } = response.json().await?;
        Ok(result.count)
    }

    /// Delete every point matching `filter`, waiting for the operation to apply.
    pub async fn delete_points(&self, collection_name: &str, filter: Value) -> Result<(), QdrantError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection_name}/points/delete"),
            )
            .query(&[("wait", true)])
            .json(&json!({ "filter": filter }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, "Points deleted");
        })
        .await
    }

    /// Upload points built from `(vector, payload)` pairs under fresh identifiers.
    pub async fn upsert_points(
        &self,
        collection_name: &str,
        points: Vec<(Vec<f32>, Value)>,
    ) -> Result<usize, QdrantError> {
        if points.is_empty() {
            return Ok(0);
        }

        let serialized: Vec<Value> = points
            .into_iter()
            .map(|(vector, payload)| {
                json!({
                    "id": generate_point_id(),
                    "vector": vector,
                    "payload": payload,
                })
            })
            .collect();
        let point_count = serialized.len();

        let response = self
            .request(
                Method::PUT,
                &format!("collections/{collection_name}/points"),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": serialized }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(
                collection = collection_name,
                points = point_count,
                "Points indexed"
            );
        })
        .await?;
        Ok(point_count)
    }

    /// Ensure a payload index exists; an existing index is not an error.
    async fn ensure_payload_index(
        &self,
        collection_name: &str,
        field: &str,
        schema: &str,
    ) -> Result<(), QdrantError> {
        let response = self
            .request(Method::PUT, &format!("collections/{collection_name}/index"))
            .json(&json!({ "field_name": field, "field_schema": schema }))
            .send()
            .await?;

        if response.status().is_success() || response.status() == StatusCode::CONFLICT {
            tracing::debug!(
                collection = collection_name,
                field,
                schema,
                "Payload index ensured"
            );
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = collection_name, field, error = %error, "Failed to ensure payload index");
            Err(error)
        }
    }

    async fn collection_exists(&self, collection_name: &str) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection_name}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection = collection_name, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), StoreError> {
        if vector.len() != self.vector_size {
            return Err(StoreError::DimensionMismatch {
                expected: self.vector_size,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantService {
    async fn ensure_ready(&self) -> Result<(), StoreError> {
        Ok(self.ensure_collections().await?)
    }

    async fn exists(&self, partition: Partition, document_id: &str) -> Result<bool, StoreError> {
        let count = self
            .count_points(self.collection_for(partition), document_filter(document_id))
            .await?;
        Ok(count > 0)
    }

    async fn delete_document(
        &self,
        partition: Partition,
        document_id: &str,
    ) -> Result<(), StoreError> {
        Ok(self
            .delete_points(self.collection_for(partition), document_filter(document_id))
            .await?)
    }

    async fn insert(&self, chunk: EmbeddedChunk) -> Result<(), StoreError> {
        self.check_dimension(&chunk.vector)?;
        let payload = chunk_payload(&chunk.chunk, &current_timestamp_rfc3339());
        self.upsert_points(&self.chunk_collection, vec![(chunk.vector, payload)])
            .await?;
        Ok(())
    }

    async fn insert_many(&self, records: Vec<EmbeddedRecord>) -> Result<(), StoreError> {
        for embedded in &records {
            self.check_dimension(&embedded.vector)?;
        }
        let now = current_timestamp_rfc3339();
        let points = records
            .into_iter()
            .map(|embedded| {
                let payload = record_payload(&embedded.record, &now);
                (embedded.vector, payload)
            })
            .collect();
        self.upsert_points(&self.record_collection, points).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.list_collections().await?;
        Ok(())
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::types::Chunk;
    use httpmock::{
        Method::{GET, POST, PUT},
        MockServer,
    };

    fn service(server: &MockServer) -> QdrantService {
        QdrantService {
            client: Client::builder()
                .user_agent("ragingest-test")
                .build()
                .expect("client"),
            base_url: server.base_url(),
            api_key: Some("secret".into()),
            chunk_collection: "DocumentChunk".into(),
            record_collection: "StructuredRecord".into(),
            vector_size: 2,
        }
    }

    fn embedded_chunk(vector: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk {
                document_id: "ada@example.com/a.txt".into(),
                chunk_index: 0,
                text: "Hello".into(),
                tokenized_text: "Hello".into(),
                page_number: None,
            },
            vector,
        }
    }

    #[test]
    fn new_requires_url() {
        let config = Config::local("db".into(), "uploads".into());
        assert!(matches!(
            QdrantService::new(&config),
            Err(QdrantError::InvalidUrl(_))
        ));
    }

    #[test]
    fn endpoint_formatting_trims_slashes() {
        assert_eq!(
            format_endpoint("http://localhost:6333/", "/collections"),
            "http://localhost:6333/collections"
        );
        assert_eq!(
            normalize_base_url("http://localhost:6333/").unwrap(),
            "http://localhost:6333/"
        );
    }

    #[tokio::test]
    async fn purge_counts_then_deletes_by_document_filter() {
        let server = MockServer::start_async().await;
        let count = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/DocumentChunk/points/count")
                    .header("api-key", "secret")
                    .json_body(json!({
                        "filter": document_filter("ada@example.com/a.txt"),
                        "exact": true
                    }));
                then.status(200)
                    .json_body(json!({ "status": "ok", "result": { "count": 4 } }));
            })
            .await;
        let delete = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/DocumentChunk/points/delete")
                    .query_param("wait", "true")
                    .json_body(json!({ "filter": document_filter("ada@example.com/a.txt") }));
                then.status(200).json_body(json!({ "status": "ok" }));
            })
            .await;

        let purged = service(&server)
            .purge(Partition::Chunks, "ada@example.com/a.txt")
            .await
            .expect("purge");

        assert!(purged);
        count.assert_async().await;
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn purge_skips_delete_when_nothing_is_stored() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/StructuredRecord/points/count");
                then.status(200).json_body(json!({ "result": { "count": 0 } }));
            })
            .await;
        let delete = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/StructuredRecord/points/delete");
                then.status(200);
            })
            .await;

        let purged = service(&server)
            .purge(Partition::Records, "missing.json")
            .await
            .expect("purge");

        assert!(!purged);
        delete.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn insert_upserts_a_single_point_with_payload() {
        let server = MockServer::start_async().await;
        let upsert = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/DocumentChunk/points")
                    .query_param("wait", "true")
                    .body_contains("\"document_id\":\"ada@example.com/a.txt\"")
                    .body_contains("\"chunk_index\":0");
                then.status(200).json_body(json!({ "status": "ok" }));
            })
            .await;

        service(&server)
            .insert(embedded_chunk(vec![0.1, 0.2]))
            .await
            .expect("insert");

        upsert.assert_async().await;
    }

    #[tokio::test]
    async fn insert_rejects_wrong_dimension_without_a_request() {
        let server = MockServer::start_async().await;
        let upsert = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/DocumentChunk/points");
                then.status(200);
            })
            .await;

        let error = service(&server)
            .insert(embedded_chunk(vec![0.1, 0.2, 0.3]))
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            StoreError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
        upsert.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn ensure_collections_creates_missing_collections_and_indexes() {
        let server = MockServer::start_async().await;
        let existing = server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/DocumentChunk");
                then.status(200).json_body(json!({ "result": {} }));
            })
            .await;
        let missing = server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/StructuredRecord");
                then.status(404);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/StructuredRecord")
                    .json_body(json!({ "vectors": { "size": 2, "distance": "Cosine" } }));
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;
        let chunk_index = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/DocumentChunk/index");
                then.status(409);
            })
            .await;
        let record_index = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/StructuredRecord/index")
                    .json_body(json!({ "field_name": "document_id", "field_schema": "keyword" }));
                then.status(200).json_body(json!({ "result": {} }));
            })
            .await;

        service(&server).ensure_collections().await.expect("ensure");

        existing.assert_async().await;
        missing.assert_async().await;
        create.assert_async().await;
        chunk_index.assert_async().await;
        record_index.assert_async().await;
    }

    #[tokio::test]
    async fn unexpected_status_surfaces_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections");
                then.status(503).body("overloaded");
            })
            .await;

        let error = service(&server).list_collections().await.unwrap_err();
        match error {
            QdrantError::UnexpectedStatus { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
