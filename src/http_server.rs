//! HTTP surface over [`SemanticEngine`].
//!
//! Thin mapping only: query parameters in, JSON out. Engine calls block
//! (the embedding provider is synchronous), so every handler runs them on
//! tokio's blocking pool.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::clustering::Cluster;
use crate::engine::SemanticEngine;
use crate::error::{EngineError, EngineResult};
use crate::io::JsonResponse;
use crate::search::SearchResult;
use crate::types::{Collection, OwnerId};

/// Error wrapper that renders as the CLI's JSON error envelope.
#[derive(Debug)]
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        Self(error)
    }
}

/// HTTP status for an engine error.
pub fn status_for(error: &EngineError) -> StatusCode {
    match error {
        EngineError::InvalidArgument { .. } | EngineError::DimensionMismatch { .. } => {
            StatusCode::BAD_REQUEST
        }
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::EmbeddingUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::warn!("Request failed: {}", self.0);
        }
        (status, Json(JsonResponse::from_error(&self.0))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn run_blocking<T, F>(engine: &Arc<SemanticEngine>, f: F) -> EngineResult<T>
where
    T: Send + 'static,
    F: FnOnce(&SemanticEngine) -> EngineResult<T> + Send + 'static,
{
    let engine = engine.clone();
    tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| EngineError::Internal {
            reason: format!("worker task failed: {e}"),
        })?
}

fn parse_collection(raw: Option<&str>, default: Collection) -> EngineResult<Collection> {
    raw.map_or(Ok(default), str::parse)
}

/// Parse an optional query value, reporting bad input as `InvalidArgument`
/// so it renders through the JSON error envelope.
fn parse_param<T>(name: &'static str, raw: Option<&str>) -> EngineResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|value| {
        value
            .trim()
            .parse()
            .map_err(|e| EngineError::invalid(name, format!("'{value}': {e}")))
    })
    .transpose()
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: Option<String>,
    #[serde(rename = "type")]
    pub collection: Option<String>,
    pub limit: Option<String>,
    pub threshold: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    #[serde(rename = "type")]
    pub collection: Collection,
    pub count: usize,
    pub results: Vec<SearchResult>,
}

async fn search(
    State(engine): State<Arc<SemanticEngine>>,
    Query(params): Query<SearchParams>,
) -> ApiResult<SearchResponse> {
    let query = params
        .query
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| EngineError::invalid("query", "query parameter is required"))?;
    let collection = parse_collection(params.collection.as_deref(), Collection::Solution)?;
    let limit = parse_param::<usize>("limit", params.limit.as_deref())?;
    let threshold = parse_param::<f32>("threshold", params.threshold.as_deref())?;

    let text = query.clone();
    let results = run_blocking(&engine, move |engine| {
        engine.search(collection, &text, limit, threshold)
    })
    .await?;

    Ok(Json(SearchResponse {
        query,
        collection,
        count: results.len(),
        results,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SimilarParams {
    pub limit: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SimilarResponse {
    #[serde(rename = "type")]
    pub collection: Collection,
    pub id: OwnerId,
    pub count: usize,
    pub similar: Vec<SearchResult>,
}

async fn similar(
    State(engine): State<Arc<SemanticEngine>>,
    Path((collection, id)): Path<(String, String)>,
    Query(params): Query<SimilarParams>,
) -> ApiResult<SimilarResponse> {
    let collection: Collection = collection.parse()?;
    let id: OwnerId = id.parse()?;
    let limit = parse_param::<usize>("limit", params.limit.as_deref())?;

    let similar = run_blocking(&engine, move |engine| {
        engine.find_similar(collection, id, limit)
    })
    .await?;

    Ok(Json(SimilarResponse {
        collection,
        id,
        count: similar.len(),
        similar,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ClusterParams {
    #[serde(rename = "type")]
    pub collection: Option<String>,
    pub status: Option<String>,
    pub category: Option<String>,
    pub min_similarity: Option<String>,
    pub by_category: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClusterResponse {
    pub min_similarity: f32,
    pub cluster_count: usize,
    pub clusters: Vec<Cluster>,
}

async fn clusters(
    State(engine): State<Arc<SemanticEngine>>,
    Query(params): Query<ClusterParams>,
) -> ApiResult<ClusterResponse> {
    let collection = parse_collection(params.collection.as_deref(), Collection::Issue)?;
    let mut filter = engine.default_cluster_filter();
    if let Some(status) = params.status {
        filter.status = (!status.is_empty()).then_some(status);
    }
    filter.category = params.category;
    let min_similarity = parse_param::<f32>("min_similarity", params.min_similarity.as_deref())?
        .unwrap_or(engine.settings().clustering.min_similarity);
    let by_category =
        parse_param::<bool>("by_category", params.by_category.as_deref())?.unwrap_or(false);

    // Dropped when the client disconnects, which cancels the clustering pass
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let clusters = run_blocking(&engine, move |engine| {
        if by_category {
            engine.cluster_by_category(collection, &filter, Some(min_similarity), &cancel)
        } else {
            engine.cluster(collection, &filter, Some(min_similarity), &cancel)
        }
    })
    .await?;
    let _ = guard.disarm();

    Ok(Json(ClusterResponse {
        min_similarity,
        cluster_count: clusters.len(),
        clusters,
    }))
}

async fn health_check() -> &'static str {
    "OK"
}

/// Routes for search, similar-record lookup and clustering.
pub fn router(engine: Arc<SemanticEngine>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/search", get(search))
        .route("/similar/{type}/{id}", get(similar))
        .route("/clusters", get(clusters))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

/// Serve until ctrl-c.
pub async fn serve_http(engine: Arc<SemanticEngine>, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("civicsim HTTP server listening on http://{bind}");

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for ctrl-c: {e}");
            }
            tracing::info!("Received shutdown signal");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::records::InMemoryRecordStore;
    use crate::types::RecordSummary;
    use crate::vector::{
        EmbeddingProvider, InMemoryVectorStore, MockEmbeddingProvider, VectorDimension,
    };
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    /// Mock vectors, but queries mentioning "outage" find the model offline.
    struct OutageProvider(MockEmbeddingProvider);

    impl EmbeddingProvider for OutageProvider {
        fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
            if text.contains("outage") {
                return Err(EngineError::unavailable("model server unreachable"));
            }
            self.0.embed(text)
        }
        fn dimension(&self) -> VectorDimension {
            self.0.dimension()
        }
        fn model_name(&self) -> String {
            self.0.model_name()
        }
    }

    fn test_engine() -> Arc<SemanticEngine> {
        let records = Arc::new(InMemoryRecordStore::new());
        for (id, title) in [(1, "Pothole on Main"), (2, "Pothole near school"), (3, "Water leak")] {
            records.insert(
                Collection::Issue,
                RecordSummary::new(OwnerId::new(id), title, "").with_status("reported"),
            );
        }
        records.insert(
            Collection::Solution,
            RecordSummary::new(OwnerId::new(10), "Report potholes to 311", ""),
        );

        let mut settings = Settings::default();
        settings.clustering.parallel_threads = 1;
        let engine = SemanticEngine::new(
            settings,
            Arc::new(OutageProvider(MockEmbeddingProvider::new(8))),
            Arc::new(InMemoryVectorStore::new()),
            records,
        )
        .unwrap();
        for collection in Collection::ALL {
            engine.sync_collection(collection).unwrap();
        }
        Arc::new(engine)
    }

    async fn get_json(uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router(test_engine())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_search_defaults_to_solutions() {
        let (status, json) = get_json("/search?query=pothole").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["type"], "solution");
        assert_eq!(json["count"], 1);
        assert_eq!(json["results"][0]["owner_id"], 10);
    }

    #[tokio::test]
    async fn test_search_requires_query() {
        let (status, json) = get_json("/search?type=issues").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_unknown_type_is_bad_request() {
        let (status, _) = get_json("/search?query=x&type=events").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_similar_not_found() {
        let (status, json) = get_json("/similar/issue/99").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_similar_excludes_reference() {
        let (status, json) = get_json("/similar/issues/1?limit=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 1);
        assert_eq!(json["similar"][0]["owner_id"], 2);
    }

    #[tokio::test]
    async fn test_clusters() {
        let (status, json) = get_json("/clusters?min_similarity=0.9").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["cluster_count"], 1);
        assert_eq!(json["clusters"][0]["members"], serde_json::json!([1, 2]));
        assert_eq!(json["clusters"][0]["count"], 2);

        let (status, _) = get_json("/clusters?min_similarity=3").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_provider_failure_is_service_unavailable() {
        let (status, json) = get_json("/search?query=power+outage&type=issues").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["code"], "EMBEDDING_UNAVAILABLE");
        assert_eq!(json["status"], "error");
    }

    #[tokio::test]
    async fn test_malformed_numbers_use_error_envelope() {
        for uri in [
            "/search?query=pothole&limit=abc",
            "/search?query=pothole&threshold=high",
            "/similar/issues/1?limit=-1",
            "/clusters?min_similarity=close",
            "/clusters?by_category=maybe",
        ] {
            let (status, json) = get_json(uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(json["code"], "INVALID_ARGUMENT", "{uri}");
        }
    }

    #[tokio::test]
    async fn test_worker_panic_is_internal_error() {
        let err = run_blocking(&test_engine(), |_| -> EngineResult<()> {
            panic!("clustering worker blew up")
        })
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Internal { .. }));
        assert_eq!(status_for(&err), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
