use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use serde_json::Value;

use super::{SearchBackend, SearchError};
use crate::error::{ApiError, ApiErrorKind};
use crate::forms::router::{resolve_locale, LocaleQuery};

pub fn search_router(backend: Arc<dyn SearchBackend>) -> Router {
    Router::new()
        .route("/api/elasticsearch/search", post(search_handler))
        .with_state(backend)
}

pub(crate) async fn search_handler(
    State(backend): State<Arc<dyn SearchBackend>>,
    Query(query): Query<LocaleQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let locale = resolve_locale(query.locale.as_deref(), &headers);

    let search_query = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|mut payload| payload.get_mut("query").map(Value::take))
        .filter(|query| !query.is_null());
    let Some(search_query) = search_query else {
        return ApiError::bad_request("Query is required in request body").into_response();
    };

    match backend.search(search_query, &locale).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(SearchError::NotConfigured) => {
            ApiError::new(ApiErrorKind::Unavailable, "Search is not configured").into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "search failed");
            ApiError::internal(err.to_string()).into_response()
        }
    }
}
