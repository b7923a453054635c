use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use serde_json::json;

use super::domain::{EventInput, EventQuery};
use super::service::EventCatalog;
use crate::error::ApiError;

pub fn event_router(catalog: Arc<EventCatalog>) -> Router {
    Router::new()
        .route("/api/events", get(list_handler).post(create_handler))
        .route(
            "/api/events/:id",
            get(find_one_handler)
                .put(update_handler)
                .patch(update_handler)
                .delete(delete_handler),
        )
        .with_state(catalog)
}

/// Reads the body as [`EventInput`], accepting an optional `{"data": {...}}` wrapper.
fn parse_input(body: &Bytes) -> Result<EventInput, ApiError> {
    let mut value: serde_json::Value = if body.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(body)
            .map_err(|err| ApiError::bad_request(format!("invalid JSON body: {err}")))?
    };
    let wrapped = value
        .get_mut("data")
        .filter(|inner| inner.is_object())
        .map(serde_json::Value::take);
    if let Some(inner) = wrapped {
        value = inner;
    }
    serde_json::from_value(value)
        .map_err(|err| ApiError::bad_request(format!("invalid event body: {err}")))
}

fn request_locale(query: &EventQuery, input: Option<&EventInput>) -> String {
    query
        .locale
        .clone()
        .or_else(|| input.and_then(|input| input.locale.clone()))
        .filter(|locale| !locale.is_empty())
        .unwrap_or_else(|| "en".to_string())
}

pub(crate) async fn list_handler(
    State(catalog): State<Arc<EventCatalog>>,
    Query(query): Query<EventQuery>,
) -> Response {
    match catalog.find(&query) {
        Ok(events) => (StatusCode::OK, Json(json!({ "data": events }))).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

pub(crate) async fn find_one_handler(
    State(catalog): State<Arc<EventCatalog>>,
    Path(id): Path<String>,
    Query(query): Query<EventQuery>,
) -> Response {
    match catalog.find_one(&id, query.locale(), query.include_unpublished()) {
        Ok(event) => (StatusCode::OK, Json(json!({ "data": event }))).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

pub(crate) async fn create_handler(
    State(catalog): State<Arc<EventCatalog>>,
    Query(query): Query<EventQuery>,
    body: Bytes,
) -> Response {
    let input = match parse_input(&body) {
        Ok(input) => input,
        Err(err) => return err.into_response(),
    };
    let locale = request_locale(&query, Some(&input));
    match catalog.create(input, &locale) {
        Ok(event) => (StatusCode::CREATED, Json(json!({ "data": event }))).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

pub(crate) async fn update_handler(
    State(catalog): State<Arc<EventCatalog>>,
    Path(id): Path<String>,
    Query(query): Query<EventQuery>,
    body: Bytes,
) -> Response {
    let input = match parse_input(&body) {
        Ok(input) => input,
        Err(err) => return err.into_response(),
    };
    let locale = request_locale(&query, Some(&input));
    match catalog.update(&id, input, &locale) {
        Ok(event) => (StatusCode::OK, Json(json!({ "data": event }))).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

pub(crate) async fn delete_handler(
    State(catalog): State<Arc<EventCatalog>>,
    Path(id): Path<String>,
    Query(query): Query<EventQuery>,
) -> Response {
    let locale = request_locale(&query, None);
    match catalog.delete(&id, &locale) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::repository::InMemoryEventRepository;
    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    fn router() -> Router {
        event_router(Arc::new(EventCatalog::new(Arc::new(
            InMemoryEventRepository::default(),
        ))))
    }

    async fn read_json_body(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("read body");
        serde_json::from_slice(&body).expect("json payload")
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn create_then_list_and_delete() {
        let router = router();
        let response = router
            .clone()
            .oneshot(post(
                "/api/events?locale=en",
                json!({"data": {
                    "title": "Open Day",
                    "startAt": "2099-05-10T09:00:00Z",
                    "endAt": "2099-05-10T13:00:00Z",
                    "slug": "open-day",
                    "published": true
                }}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = read_json_body(response).await;
        assert_eq!(created["data"]["title"], json!("Open Day"));
        assert_eq!(created["data"]["allDay"], json!(false));

        let response = router
            .clone()
            .oneshot(
                Request::get("/api/events?upcoming=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let listed = read_json_body(response).await;
        assert_eq!(listed["data"].as_array().unwrap().len(), 1);

        let response = router
            .clone()
            .oneshot(
                Request::delete("/api/events/open-day?locale=en")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = router
            .oneshot(Request::get("/api/events/open-day").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_without_dates_is_a_bad_request() {
        let response = router()
            .oneshot(post("/api/events", json!({"title": "No dates"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let payload = read_json_body(response).await;
        assert_eq!(
            payload["error"]["message"],
            json!("Missing required fields: title, startAt, endAt")
        );
    }

    #[tokio::test]
    async fn update_in_missing_locale_is_not_found() {
        let router = router();
        let response = router
            .clone()
            .oneshot(post(
                "/api/events",
                json!({"title": "Open Day", "startAt": "2025-05-10", "endAt": "2025-05-10", "slug": "open-day"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = router
            .oneshot(
                Request::put("/api/events/open-day?locale=ur")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({"title": "x"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let payload = read_json_body(response).await;
        assert_eq!(
            payload["error"]["message"],
            json!("Event not found in locale 'ur'")
        );
    }
}
