use crate::coordinator::SyncCoordinator;
use crate::errors::{SignatureError, SyncError, UpstreamError};
use crate::metrics_defs::{REQUEST_DURATION, SIGNATURE_REJECTED};
use crate::record_store::RecordStore;
use crate::signature::{SIGNATURE_HEADER, SignatureVerifier};
use crate::types::{SyncReport, ViewCount};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State, rejection::QueryRejection},
    response::{IntoResponse, Response},
    routing::any,
};
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use shared::{counter, histogram};
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SyncCoordinator>,
    pub verifier: Arc<SignatureVerifier>,
    pub records: Arc<dyn RecordStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sync", any(sync_handler))
        .route("/counts", any(counts_handler))
        .route("/count", any(count_handler))
        .with_state(state)
}

struct Cors {
    methods: &'static str,
    headers: &'static str,
}

const SYNC_CORS: Cors = Cors {
    methods: "POST, OPTIONS",
    headers: "Content-Type, X-Webflow-Signature",
};

const READ_CORS: Cors = Cors {
    methods: "GET, OPTIONS",
    headers: "Content-Type",
};

impl Cors {
    fn apply(&self, mut response: Response) -> Response {
        let headers = response.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(self.methods),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(self.headers),
        );
        response
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error("Sync failed")]
    Sync(Arc<SyncError>),

    #[error("Slug is required")]
    MissingSlug,

    #[error("Blog post not found")]
    NotFound,

    #[error("Failed to fetch view count")]
    CountFetch(#[source] UpstreamError),

    #[error("Failed to fetch view counts")]
    CountsFetch(#[source] UpstreamError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                json!({"error": self.to_string()}),
            ),
            ApiError::Signature(_) => {
                (StatusCode::UNAUTHORIZED, json!({"error": self.to_string()}))
            }
            ApiError::Sync(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"success": false, "error": self.to_string(), "details": err.to_string()}),
            ),
            ApiError::MissingSlug => (StatusCode::BAD_REQUEST, json!({"error": self.to_string()})),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                json!({"error": self.to_string(), "view_count": 0}),
            ),
            ApiError::CountFetch(err) | ApiError::CountsFetch(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": self.to_string(), "details": err.to_string()}),
            ),
        };

        (status, Json(body)).into_response()
    }
}

fn record_duration(endpoint: &'static str, start: Instant) {
    histogram!(REQUEST_DURATION, "endpoint" => endpoint).record(start.elapsed().as_secs_f64());
}

async fn sync_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let response = match method {
        Method::OPTIONS => StatusCode::OK.into_response(),
        Method::POST => {
            let start = Instant::now();
            let response = handle_sync(&state, &headers, &body).await.into_response();
            record_duration("sync", start);
            response
        }
        _ => ApiError::MethodNotAllowed.into_response(),
    };
    SYNC_CORS.apply(response)
}

/// An empty header counts as absent. A header that is not visible ASCII
/// cannot carry a valid signature.
fn signature_header(headers: &HeaderMap) -> Result<Option<&str>, SignatureError> {
    match headers.get(SIGNATURE_HEADER) {
        None => Ok(None),
        Some(value) if value.is_empty() => Ok(None),
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| SignatureError::Invalid),
    }
}

async fn handle_sync(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Json<SyncReport>, ApiError> {
    // Unparsable bodies are treated as an empty payload
    let payload: Value = serde_json::from_slice(body).unwrap_or_else(|_| json!({}));

    let authentication = signature_header(headers)
        .and_then(|header| state.verifier.verify(header, body, &payload))
        .inspect_err(|_| counter!(SIGNATURE_REJECTED).increment(1))?;

    let trigger = payload
        .get("triggerType")
        .and_then(Value::as_str)
        .unwrap_or("manual");
    tracing::info!(trigger, ?authentication, "Sync requested");

    let report = state
        .coordinator
        .trigger(trigger)
        .await
        .map_err(ApiError::Sync)?;

    Ok(Json(SyncReport::clone(&report)))
}

#[derive(Serialize)]
struct CountsResponse {
    posts: Vec<ViewCount>,
    total: usize,
}

async fn counts_handler(State(state): State<AppState>, method: Method) -> Response {
    let response = match method {
        Method::OPTIONS => StatusCode::OK.into_response(),
        Method::GET => {
            let start = Instant::now();
            let response = list_counts(&state).await.into_response();
            record_duration("counts", start);
            response
        }
        _ => ApiError::MethodNotAllowed.into_response(),
    };
    READ_CORS.apply(response)
}

async fn list_counts(state: &AppState) -> Result<Json<CountsResponse>, ApiError> {
    let records = state
        .records
        .list_records()
        .await
        .map_err(ApiError::CountsFetch)?;

    let mut posts: Vec<ViewCount> = records.iter().map(ViewCount::from).collect();
    posts.sort_by(|a, b| b.total_views.cmp(&a.total_views));

    Ok(Json(CountsResponse {
        total: posts.len(),
        posts,
    }))
}

#[derive(Deserialize, Debug)]
struct CountParams {
    slug: Option<String>,
}

#[derive(Serialize)]
struct CountResponse {
    slug: String,
    view_count: u64,
    total_views: u64,
    title: String,
    record_id: String,
}

async fn count_handler(
    State(state): State<AppState>,
    method: Method,
    params: Result<Query<CountParams>, QueryRejection>,
) -> Response {
    let response = match method {
        Method::OPTIONS => StatusCode::OK.into_response(),
        Method::GET => {
            let start = Instant::now();
            // A query that does not parse carries no usable slug
            let slug = match params {
                Ok(Query(params)) => params.slug,
                Err(rejection) => {
                    tracing::debug!(error = %rejection, "Unparsable count query");
                    None
                }
            };
            let response = get_count(&state, slug).await.into_response();
            record_duration("count", start);
            response
        }
        _ => ApiError::MethodNotAllowed.into_response(),
    };
    READ_CORS.apply(response)
}

async fn get_count(
    state: &AppState,
    slug: Option<String>,
) -> Result<Json<CountResponse>, ApiError> {
    let slug = slug.filter(|s| !s.is_empty()).ok_or(ApiError::MissingSlug)?;

    let record = state
        .records
        .find_by_slug(&slug)
        .await
        .map_err(ApiError::CountFetch)?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(CountResponse {
        view_count: record.view_count,
        total_views: record.total_views(),
        title: record.title.clone(),
        record_id: record.record_id,
        slug,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MissingSecretPolicy, WebhookConfig};
    use crate::reconcile::{Reconciler, SyncSettings};
    use crate::signature::{sign_composite, sign_raw_body};
    use crate::testutils::{FakeContentSource, FakeRecordStore, items, record};
    use axum::body::Body;
    use http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    const SECRET: &str = "whsec";

    fn app(content: &Arc<FakeContentSource>, store: &Arc<FakeRecordStore>) -> Router {
        let reconciler = Reconciler::new(content.clone(), store.clone(), SyncSettings::default());
        let verifier = SignatureVerifier::new(&WebhookConfig {
            secrets: vec![SECRET.to_string()],
            raw_body_secret: None,
            missing_secret_policy: MissingSecretPolicy::Allow,
        });

        router(AppState {
            coordinator: Arc::new(SyncCoordinator::new(reconciler, Duration::from_secs(5))),
            verifier: Arc::new(verifier),
            records: store.clone(),
        })
    }

    fn sync_request(body: &str, signature: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/sync")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unsigned_sync_runs() {
        let content = Arc::new(FakeContentSource::new(items(3)));
        let store = Arc::new(FakeRecordStore::default());

        let response = app(&content, &store)
            .oneshot(sync_request(r#"{"triggerType":"manual"}"#, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[ACCESS_CONTROL_ALLOW_METHODS],
            "POST, OPTIONS"
        );
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["synced"], 3);
        assert_eq!(body["stats"]["missing"], 3);
    }

    #[tokio::test]
    async fn test_signed_sync_with_either_scheme() {
        let content = Arc::new(FakeContentSource::new(items(1)));
        let store = Arc::new(FakeRecordStore::default());
        let body = r#"{"triggerType": "collection_item_created", "payload": {"id": "x"}}"#;

        let raw = sign_raw_body(body.as_bytes(), SECRET.as_bytes());
        let response = app(&content, &store)
            .oneshot(sync_request(body, Some(&raw)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let payload: Value = serde_json::from_str(body).unwrap();
        let composite = sign_composite("1700000000", &payload, SECRET.as_bytes());
        let response = app(&content, &store)
            .oneshot(sync_request(body, Some(&composite)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bad_signature_is_rejected_without_sync() {
        let content = Arc::new(FakeContentSource::new(items(3)));
        let store = Arc::new(FakeRecordStore::default());
        let body = r#"{"triggerType":"collection_item_created"}"#;
        let signature = sign_raw_body(body.as_bytes(), b"other-secret");

        let response = app(&content, &store)
            .oneshot(sync_request(body, Some(&signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            json_body(response).await,
            json!({"error": "Invalid webhook signature"})
        );
        assert_eq!(content.calls(), 0);
        assert!(store.create_calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_body_is_treated_as_empty() {
        let content = Arc::new(FakeContentSource::new(items(2)));
        let store = Arc::new(FakeRecordStore::default());

        let response = app(&content, &store)
            .oneshot(sync_request("not json", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_fatal_sync_failure_returns_500() {
        let content = Arc::new(FakeContentSource::failing());
        let store = Arc::new(FakeRecordStore::default());

        let response = app(&content, &store)
            .oneshot(sync_request("{}", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Sync failed");
        assert!(body["details"].as_str().unwrap().contains("content source"));
    }

    #[tokio::test]
    async fn test_method_handling() {
        let content = Arc::new(FakeContentSource::new(Vec::new()));
        let store = Arc::new(FakeRecordStore::default());
        let app = app(&content, &store);

        let options = Request::builder()
            .method("OPTIONS")
            .uri("/sync")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(options).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[ACCESS_CONTROL_ALLOW_HEADERS],
            "Content-Type, X-Webflow-Signature"
        );

        let response = app.clone().oneshot(get("/sync")).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            json_body(response).await,
            json!({"error": "Method not allowed"})
        );

        let delete = Request::builder()
            .method("DELETE")
            .uri("/counts")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(delete).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_METHODS], "GET, OPTIONS");
    }

    #[tokio::test]
    async fn test_counts_sorted_by_total_views() {
        let content = Arc::new(FakeContentSource::new(Vec::new()));
        let mut popular = record("popular", 5);
        popular.total_views = Some(40);
        let store = Arc::new(FakeRecordStore::new(vec![
            record("quiet", 1),
            popular,
            record("middle", 12),
        ]));

        let response = app(&content, &store).oneshot(get("/counts")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["total"], 3);
        let slugs: Vec<_> = body["posts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["slug"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(slugs, vec!["popular", "middle", "quiet"]);
        assert_eq!(body["posts"][1]["total_views"], 12);
    }

    #[tokio::test]
    async fn test_counts_store_failure() {
        let content = Arc::new(FakeContentSource::new(Vec::new()));
        let store = Arc::new(FakeRecordStore::default());
        store.set_list_failing(true);

        let response = app(&content, &store).oneshot(get("/counts")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Failed to fetch view counts");
        assert!(body["details"].is_string());
    }

    #[tokio::test]
    async fn test_count_lookup() {
        let content = Arc::new(FakeContentSource::new(Vec::new()));
        let store = Arc::new(FakeRecordStore::new(vec![record("hello", 9)]));
        let app = app(&content, &store);

        let response = app.clone().oneshot(get("/count?slug=hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({
                "slug": "hello",
                "view_count": 9,
                "total_views": 9,
                "title": "Title hello",
                "record_id": "rec-hello"
            })
        );

        let response = app.clone().oneshot(get("/count?slug=nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(response).await,
            json!({"error": "Blog post not found", "view_count": 0})
        );

        let response = app.clone().oneshot(get("/count")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await, json!({"error": "Slug is required"}));

        let response = app.oneshot(get("/count?slug=")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_count_with_repeated_slug_keeps_cors_and_json() {
        let content = Arc::new(FakeContentSource::new(Vec::new()));
        let store = Arc::new(FakeRecordStore::new(vec![record("a", 1)]));
        let app = app(&content, &store);

        let response = app
            .clone()
            .oneshot(get("/count?slug=a&slug=b"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(json_body(response).await, json!({"error": "Slug is required"}));

        let options = Request::builder()
            .method("OPTIONS")
            .uri("/count?slug=a&slug=b")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(options).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_METHODS], "GET, OPTIONS");
    }
}
