use crate::models::{CollectionSchema, IndexRecord, Metric};
use crate::store::StoreHit;
use crate::traits::CollectionStore;
use crate::IndexError;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Networked collection store backed by Qdrant's REST API.
///
/// The configured collection name is a Qdrant alias. A build fills a fresh staging collection
/// and `seal` points the alias at it in one alias update, so readers only ever see a sealed
/// collection and a failed or interrupted build leaves the previous one serving. Qdrant has no
/// maximal-marginal-relevance query, so `supports_mmr` is false and MMR requests degrade to
/// similarity search.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    api_key: Option<String>,
    vector_size: usize,
    staging: Mutex<Option<String>>,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>, vector_size: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            api_key: None,
            vector_size,
            staging: Mutex::new(None),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.client.request(method, format!("{}{}", self.endpoint, path));
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    fn collection_request(&self, method: Method, collection: &str, suffix: &str) -> RequestBuilder {
        self.request(method, &format!("/collections/{collection}{suffix}"))
    }

    /// Build collections of this alias share this prefix.
    fn staging_prefix(&self) -> String {
        format!("{}__build_", self.collection)
    }

    fn ensure_vector_size(&self, vector_size: usize) -> Result<(), IndexError> {
        if self.vector_size != vector_size {
            return Err(IndexError::DimensionMismatch {
                expected: self.vector_size,
                actual: vector_size,
            });
        }
        Ok(())
    }

    async fn get_json(&self, path: &str) -> Result<Value, IndexError> {
        let response = self.request(Method::GET, path).send().await?;
        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }
        Ok(response.json().await?)
    }

    /// Collection the alias currently points at.
    async fn alias_target(&self) -> Result<Option<String>, IndexError> {
        let parsed = self.get_json("/aliases").await?;
        Ok(alias_target_from(&parsed, &self.collection))
    }

    async fn collection_names(&self) -> Result<Vec<String>, IndexError> {
        let parsed = self.get_json("/collections").await?;
        Ok(collection_names_from(&parsed))
    }

    async fn create_collection(&self, name: &str, schema: &CollectionSchema) -> Result<(), IndexError> {
        let response = self
            .collection_request(Method::PUT, name, "")
            .json(&json!({
                "vectors": {
                    "size": schema.dimension,
                    "distance": distance_name(schema.metric),
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<(), IndexError> {
        let response = self.collection_request(Method::DELETE, name, "").send().await?;
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(backend_error(response).await)
    }

    async fn staging_name(&self) -> Result<String, IndexError> {
        self.staging.lock().await.clone().ok_or_else(|| {
            IndexError::NotInitialized(format!(
                "collection '{}' was not recreated before insert",
                self.collection
            ))
        })
    }
}

fn alias_target_from(parsed: &Value, alias: &str) -> Option<String> {
    parsed
        .pointer("/result/aliases")
        .and_then(Value::as_array)?
        .iter()
        .find(|entry| entry.pointer("/alias_name").and_then(Value::as_str) == Some(alias))
        .and_then(|entry| entry.pointer("/collection_name").and_then(Value::as_str))
        .map(str::to_string)
}

fn collection_names_from(parsed: &Value) -> Vec<String> {
    parsed
        .pointer("/result/collections")
        .and_then(Value::as_array)
        .map(|collections| {
            collections
                .iter()
                .filter_map(|entry| entry.pointer("/name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

async fn backend_error(response: Response) -> IndexError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    IndexError::BackendResponse {
        backend: "qdrant".to_string(),
        details: format!("{status}: {body}"),
    }
}

fn distance_name(metric: Metric) -> &'static str {
    match metric {
        Metric::InnerProduct => "Dot",
    }
}

fn point_id(hit: &Value) -> String {
    match hit.pointer("/id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => String::new(),
    }
}

/// Converts a `points/search` response body into hits, preserving the service's order.
pub(crate) fn hits_from_response(parsed: &Value) -> Vec<StoreHit> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    hits.iter()
        .map(|hit| {
            let text = hit
                .pointer("/payload/text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let metadata = hit
                .pointer("/payload/metadata")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            let embedding = hit.pointer("/vector").and_then(Value::as_array).map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_f64)
                    .map(|value| value as f32)
                    .collect()
            });

            StoreHit {
                id: point_id(hit),
                text,
                metadata,
                score,
                embedding,
            }
        })
        .collect()
}

#[async_trait]
impl CollectionStore for QdrantStore {
    fn backend_name(&self) -> &'static str {
        "qdrant"
    }

    fn collection_name(&self) -> &str {
        &self.collection
    }

    fn supports_mmr(&self) -> bool {
        false
    }

    async fn exists(&self) -> Result<bool, IndexError> {
        Ok(self.alias_target().await?.is_some())
    }

    /// Declares a fresh staging collection. Build collections left behind by interrupted runs
    /// are dropped first; the collection behind the alias is not touched.
    async fn recreate(&self, schema: &CollectionSchema) -> Result<(), IndexError> {
        self.ensure_vector_size(schema.dimension)?;

        let live = self.alias_target().await?;
        let prefix = self.staging_prefix();
        for name in self.collection_names().await? {
            if name.starts_with(&prefix) && live.as_deref() != Some(name.as_str()) {
                debug!(collection = %name, "dropping abandoned qdrant build collection");
                self.drop_collection(&name).await?;
            }
        }

        let staging = format!("{prefix}{}", Uuid::new_v4().simple());
        self.create_collection(&staging, schema).await?;
        debug!(collection = %staging, alias = %self.collection, dimension = schema.dimension, "qdrant staging collection created");
        *self.staging.lock().await = Some(staging);
        Ok(())
    }

    async fn insert(&self, records: &[IndexRecord]) -> Result<(), IndexError> {
        let staging = self.staging_name().await?;
        let points = records
            .iter()
            .map(|record| {
                self.ensure_vector_size(record.embedding.len())?;
                Ok(json!({
                    "id": record.id,
                    "vector": record.embedding,
                    "payload": {
                        "text": record.text,
                        "metadata": record.metadata,
                    },
                }))
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .collection_request(Method::PUT, &staging, "/points?wait=true")
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }

        Ok(())
    }

    /// Points the alias at the staging collection, then drops the collection it replaced.
    async fn seal(&self) -> Result<(), IndexError> {
        let staging = self.staging_name().await?;
        let previous = self.alias_target().await?;

        let mut actions = Vec::new();
        match &previous {
            Some(_) => actions.push(json!({ "delete_alias": { "alias_name": self.collection } })),
            // a plain collection under the alias name would block the alias
            None => self.drop_collection(&self.collection).await?,
        }
        actions.push(json!({
            "create_alias": { "collection_name": staging, "alias_name": self.collection }
        }));

        let response = self
            .request(Method::POST, "/collections/aliases")
            .json(&json!({ "actions": actions }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }
        *self.staging.lock().await = None;
        info!(alias = %self.collection, collection = %staging, "qdrant alias switched");

        if let Some(previous) = previous.filter(|previous| *previous != staging) {
            if let Err(error) = self.drop_collection(&previous).await {
                warn!(collection = %previous, error = %error, "failed to drop replaced qdrant collection");
            }
        }
        Ok(())
    }

    async fn discard(&self) -> Result<(), IndexError> {
        let Some(staging) = self.staging.lock().await.take() else {
            return Ok(());
        };
        warn!(collection = %staging, alias = %self.collection, "dropping partially built qdrant collection");
        self.drop_collection(&staging).await
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        with_vectors: bool,
    ) -> Result<Vec<StoreHit>, IndexError> {
        self.ensure_vector_size(vector.len())?;

        let response = self
            .collection_request(Method::POST, &self.collection, "/points/search")
            .json(&json!({
                "vector": vector,
                "limit": limit,
                "with_payload": true,
                "with_vector": with_vectors,
                "params": { "exact": true },
            }))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let parsed: Value = response.json().await?;
                Ok(hits_from_response(&parsed))
            }
            StatusCode::NOT_FOUND => Err(IndexError::NotFound(self.collection.clone())),
            _ => Err(backend_error(response).await),
        }
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let response = self
            .collection_request(Method::POST, &self.collection, "/points/count")
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let parsed: Value = response.json().await?;
                parsed
                    .pointer("/result/count")
                    .and_then(Value::as_u64)
                    .map(|count| count as usize)
                    .ok_or_else(|| IndexError::BackendResponse {
                        backend: "qdrant".to_string(),
                        details: "count response without result.count".to_string(),
                    })
            }
            StatusCode::NOT_FOUND => Err(IndexError::NotFound(self.collection.clone())),
            _ => Err(backend_error(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::index::VectorIndex;
    use crate::models::{Chunk, Document};
    use axum::extract::State;
    use axum::http::Uri;
    use axum::response::IntoResponse;
    use axum::{Json, Router};
    use std::sync::Arc;

    const DIMENSIONS: usize = 8;

    /// Minimal Qdrant stand-in that records `METHOD /path` for every request.
    #[derive(Default)]
    struct MockQdrant {
        aliases: Vec<(&'static str, &'static str)>,
        collections: Vec<&'static str>,
        fail_inserts: bool,
        requests: std::sync::Mutex<Vec<String>>,
    }

    impl MockQdrant {
        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    async fn handle(
        State(mock): State<Arc<MockQdrant>>,
        method: Method,
        uri: Uri,
    ) -> axum::response::Response {
        let path = uri.path().to_string();
        mock.requests.lock().unwrap().push(format!("{method} {path}"));

        match (method.as_str(), path.as_str()) {
            ("GET", "/aliases") => {
                let aliases: Vec<Value> = mock
                    .aliases
                    .iter()
                    .map(|(alias, collection)| json!({ "alias_name": alias, "collection_name": collection }))
                    .collect();
                Json(json!({ "result": { "aliases": aliases }, "status": "ok" })).into_response()
            }
            ("GET", "/collections") => {
                let collections: Vec<Value> =
                    mock.collections.iter().map(|name| json!({ "name": name })).collect();
                Json(json!({ "result": { "collections": collections }, "status": "ok" }))
                    .into_response()
            }
            ("PUT", points) if points.ends_with("/points") && mock.fail_inserts => {
                (StatusCode::INTERNAL_SERVER_ERROR, "no space left on device").into_response()
            }
            _ => Json(json!({ "result": true, "status": "ok" })).into_response(),
        }
    }

    async fn serve(mock: MockQdrant) -> (String, Arc<MockQdrant>) {
        let mock = Arc::new(mock);
        let app = Router::new().fallback(handle).with_state(Arc::clone(&mock));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{address}"), mock)
    }

    fn index_on(endpoint: &str) -> VectorIndex<CharacterNgramEmbedder, QdrantStore> {
        VectorIndex::new(
            CharacterNgramEmbedder {
                dimensions: DIMENSIONS,
            },
            QdrantStore::new(endpoint, "exam", DIMENSIONS),
            &IndexConfig::default(),
        )
    }

    fn chunks() -> Vec<Chunk> {
        ["操作系统管理硬件资源", "CPU执行指令"]
            .into_iter()
            .map(|text| {
                let document = Document::new(text, "os.md");
                Chunk {
                    content: document.content,
                    metadata: document.metadata,
                }
            })
            .collect()
    }

    fn staging_of(request: &str) -> Option<&str> {
        request
            .strip_prefix("PUT /collections/")
            .filter(|name| name.starts_with("exam__build_") && !name.contains('/'))
    }

    #[tokio::test]
    async fn build_fills_a_staging_collection_and_switches_the_alias() {
        let (endpoint, mock) = serve(MockQdrant {
            aliases: vec![("exam", "exam__build_old")],
            collections: vec!["exam__build_old", "exam__build_dead", "other"],
            ..MockQdrant::default()
        })
        .await;

        let mut index = index_on(&endpoint);
        index.create_from_documents(&chunks()).await.unwrap();

        let requests = mock.requests();
        let staging = requests.iter().find_map(|request| staging_of(request)).unwrap();
        assert_eq!(
            requests,
            vec![
                "GET /aliases".to_string(),
                "GET /collections".to_string(),
                "DELETE /collections/exam__build_dead".to_string(),
                format!("PUT /collections/{staging}"),
                format!("PUT /collections/{staging}/points"),
                "GET /aliases".to_string(),
                "POST /collections/aliases".to_string(),
                "DELETE /collections/exam__build_old".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn failed_insert_drops_staging_and_keeps_the_alias() {
        let (endpoint, mock) = serve(MockQdrant {
            aliases: vec![("exam", "exam__build_old")],
            collections: vec!["exam__build_old"],
            fail_inserts: true,
            ..MockQdrant::default()
        })
        .await;

        let mut index = index_on(&endpoint);
        assert!(matches!(
            index.create_from_documents(&chunks()).await,
            Err(IndexError::BackendResponse { .. })
        ));

        let requests = mock.requests();
        let staging = requests.iter().find_map(|request| staging_of(request)).unwrap();
        assert_eq!(
            requests.last().map(String::as_str),
            Some(format!("DELETE /collections/{staging}").as_str())
        );
        assert!(!requests.iter().any(|request| request == "POST /collections/aliases"));
        assert!(!requests.iter().any(|request| request == "DELETE /collections/exam__build_old"));
    }

    #[tokio::test]
    async fn unsealed_build_collections_do_not_count_as_existing() {
        let (endpoint, _mock) = serve(MockQdrant {
            collections: vec!["exam__build_interrupted"],
            ..MockQdrant::default()
        })
        .await;

        let store = QdrantStore::new(endpoint, "exam", DIMENSIONS);
        assert!(!store.exists().await.unwrap());
    }

    #[tokio::test]
    async fn first_build_clears_a_plain_collection_under_the_alias_name() {
        let (endpoint, mock) = serve(MockQdrant::default()).await;

        let mut index = index_on(&endpoint);
        index.create_from_documents(&chunks()).await.unwrap();

        let requests = mock.requests();
        let sealing = requests[requests.len() - 3..].to_vec();
        assert_eq!(
            sealing,
            vec![
                "GET /aliases".to_string(),
                "DELETE /collections/exam".to_string(),
                "POST /collections/aliases".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn insert_before_recreate_is_rejected() {
        let store = QdrantStore::new("http://127.0.0.1:9", "exam", DIMENSIONS);
        let record = IndexRecord {
            id: "1".to_string(),
            text: "x".to_string(),
            embedding: vec![0.0; DIMENSIONS],
            metadata: "{}".to_string(),
        };
        assert!(matches!(
            store.insert(&[record]).await,
            Err(IndexError::NotInitialized(_))
        ));
    }

    #[test]
    fn alias_listing_resolves_only_the_configured_alias() {
        let body = json!({
            "result": { "aliases": [
                { "alias_name": "other", "collection_name": "other_v1" },
                { "alias_name": "exam", "collection_name": "exam__build_abc" }
            ] }
        });
        assert_eq!(alias_target_from(&body, "exam").as_deref(), Some("exam__build_abc"));
        assert_eq!(alias_target_from(&body, "missing"), None);
        assert_eq!(
            collection_names_from(&json!({ "result": { "collections": [{ "name": "a" }, { "name": "b" }] } })),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn search_response_maps_payload_fields() {
        let body = json!({
            "result": [
                {
                    "id": "5f0c1c1e-0000-4000-8000-000000000001",
                    "score": 0.91,
                    "payload": { "text": "操作系统管理硬件资源", "metadata": "{\"section\":1}" }
                },
                {
                    "id": 7,
                    "score": 0.12,
                    "payload": { "text": "CPU执行指令", "metadata": "{}" },
                    "vector": [0.5, 0.25]
                }
            ],
            "status": "ok"
        });

        let hits = hits_from_response(&body);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "5f0c1c1e-0000-4000-8000-000000000001");
        assert_eq!(hits[0].text, "操作系统管理硬件资源");
        assert!(hits[0].embedding.is_none());
        assert_eq!(hits[1].id, "7");
        assert_eq!(hits[1].embedding, Some(vec![0.5, 0.25]));
    }

    #[test]
    fn empty_response_has_no_hits() {
        assert!(hits_from_response(&json!({ "status": "ok" })).is_empty());
    }

    #[test]
    fn qdrant_backend_degrades_mmr_to_similarity() {
        let store = QdrantStore::new("http://localhost:6333/", "exam", 4);
        assert!(!store.supports_mmr());
        assert_eq!(store.endpoint, "http://localhost:6333");
        assert!(matches!(
            store.ensure_vector_size(3),
            Err(IndexError::DimensionMismatch { expected: 4, actual: 3 })
        ));
    }
}
