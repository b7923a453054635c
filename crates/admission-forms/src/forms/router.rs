use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequest, Multipart, Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;

use super::intake::{FileMap, FileUpload};
use super::service::{ClientInfo, FormSubmissionService, PdfDownload, SubmissionRequest};
use super::submissions::{SubmissionData, SubmissionId, SubmissionPatch};

const MAX_JSON_BODY: usize = 2 * 1024 * 1024;

/// Public form endpoints plus the submission admin surface.
pub fn form_router(service: Arc<FormSubmissionService>) -> Router {
    Router::new()
        .route("/api/forms/:slug", get(schema_handler))
        .route("/api/forms/:slug/submit", post(submit_handler))
        .route(
            "/api/form-submissions/:id",
            get(submission_handler).patch(update_handler),
        )
        .route("/api/form-submissions/:id/pdf", get(pdf_handler))
        .with_state(service)
}

#[derive(Debug, Default, Deserialize)]
pub struct LocaleQuery {
    pub locale: Option<String>,
}

/// `?locale=` wins, then the first `Accept-Language` tag, then `en`.
pub fn resolve_locale(query: Option<&str>, headers: &HeaderMap) -> String {
    if let Some(locale) = query.map(str::trim).filter(|value| !value.is_empty()) {
        return locale.to_string();
    }
    headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|tag| tag.split(';').next())
        .map(str::trim)
        .filter(|tag| !tag.is_empty() && *tag != "*")
        .map(str::to_string)
        .unwrap_or_else(|| "en".to_string())
}

/// First `X-Forwarded-For` hop, else the socket peer.
pub fn client_info(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientInfo {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    ClientInfo {
        ip: forwarded.or_else(|| peer.map(|addr| addr.ip().to_string())),
        user_agent,
    }
}

pub(crate) async fn schema_handler(
    State(service): State<Arc<FormSubmissionService>>,
    Path(slug): Path<String>,
    Query(query): Query<LocaleQuery>,
    headers: HeaderMap,
) -> Response {
    let locale = resolve_locale(query.locale.as_deref(), &headers);
    match service.schema(&slug, &locale) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

pub(crate) async fn submit_handler(
    State(service): State<Arc<FormSubmissionService>>,
    Path(slug): Path<String>,
    Query(query): Query<LocaleQuery>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    request: Request,
) -> Response {
    let locale = resolve_locale(query.locale.as_deref(), &headers);
    let client = client_info(&headers, peer.map(|ConnectInfo(addr)| addr));

    let (data, files) = match read_submission_body(&headers, request).await {
        Ok(parsed) => parsed,
        Err(err) => return err.into_response(),
    };

    let request = SubmissionRequest {
        slug,
        locale,
        data,
        files,
        client,
    };
    match service.submit(request).await {
        Ok(receipt) => (StatusCode::OK, Json(receipt)).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn read_submission_body(
    headers: &HeaderMap,
    request: Request,
) -> Result<(SubmissionData, FileMap), ApiError> {
    let is_multipart = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if is_multipart {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|err| ApiError::bad_request(err.to_string()))?;
        return read_multipart(multipart).await;
    }

    let body = axum::body::to_bytes(request.into_body(), MAX_JSON_BODY)
        .await
        .map_err(|err| ApiError::bad_request(format!("unable to read request body: {err}")))?;
    if body.is_empty() {
        return Ok((SubmissionData::new(), FileMap::default()));
    }
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|err| ApiError::bad_request(format!("invalid JSON body: {err}")))?;
    Ok((unwrap_data(payload)?, FileMap::default()))
}

async fn read_multipart(mut multipart: Multipart) -> Result<(SubmissionData, FileMap), ApiError> {
    let mut data = SubmissionData::new();
    let mut loose = SubmissionData::new();
    let mut files = FileMap::default();
    let malformed = |err: axum::extract::multipart::MultipartError| {
        ApiError::bad_request(format!("malformed multipart body: {err}"))
    };

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        if name.is_empty() {
            continue;
        }

        if let Some(file_name) = field.file_name().map(str::to_string) {
            let content_type = field.content_type().map(str::to_string);
            let bytes: Bytes = field.bytes().await.map_err(malformed)?;
            if file_name.is_empty() && bytes.is_empty() {
                continue;
            }
            let key = name.strip_prefix("files.").unwrap_or(&name).to_string();
            files.insert(FileUpload::new(key, file_name, content_type, bytes));
            continue;
        }

        let text = field.text().await.map_err(malformed)?;
        if name == "data" {
            let payload: Value = serde_json::from_str(&text)
                .map_err(|err| ApiError::bad_request(format!("invalid JSON in data part: {err}")))?;
            data.extend(unwrap_data(payload)?);
        } else {
            loose.insert(name, Value::String(text));
        }
    }

    // explicit `data` entries win over loose text parts
    for (key, value) in loose {
        data.entry(key).or_insert(value);
    }
    Ok((data, files))
}

fn unwrap_data(payload: Value) -> Result<SubmissionData, ApiError> {
    match payload {
        Value::Object(mut object) => match object.remove("data") {
            Some(Value::Object(inner)) => Ok(inner),
            Some(other) => {
                object.insert("data".to_string(), other);
                Ok(object)
            }
            None => Ok(object),
        },
        _ => Err(ApiError::bad_request("submission data must be a JSON object")),
    }
}

pub(crate) async fn submission_handler(
    State(service): State<Arc<FormSubmissionService>>,
    Path(id): Path<String>,
) -> Response {
    match service.submission(&SubmissionId(id)) {
        Ok(submission) => (StatusCode::OK, Json(json!({ "data": submission }))).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

pub(crate) async fn update_handler(
    State(service): State<Arc<FormSubmissionService>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let patch: SubmissionPatch = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(mut object)) => {
            // attributes may arrive wrapped once more in `data`
            let inner = match object.get("data") {
                Some(Value::Object(data)) if data.contains_key("data") => object.remove("data"),
                _ => None,
            };
            match serde_json::from_value(inner.unwrap_or(Value::Object(object))) {
                Ok(patch) => patch,
                Err(err) => {
                    return ApiError::bad_request(format!("invalid update body: {err}")).into_response()
                }
            }
        }
        Ok(_) => return ApiError::bad_request("update body must be a JSON object").into_response(),
        Err(err) => return ApiError::bad_request(format!("invalid JSON body: {err}")).into_response(),
    };

    match service.update_submission(&SubmissionId(id), patch) {
        Ok(submission) => (StatusCode::OK, Json(json!({ "data": submission }))).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

pub(crate) async fn pdf_handler(
    State(service): State<Arc<FormSubmissionService>>,
    Path(id): Path<String>,
) -> Response {
    match service.pdf_download(&SubmissionId(id)).await {
        Ok(PdfDownload::Inline { file_name, bytes }) => {
            let disposition = format!("attachment; filename=\"{}\"", file_name.replace('"', ""));
            let mut response = Response::new(Body::from(bytes));
            let headers = response.headers_mut();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
            if let Ok(value) = HeaderValue::from_str(&disposition) {
                headers.insert(header::CONTENT_DISPOSITION, value);
            }
            response
        }
        Ok(PdfDownload::Redirect(location)) => Redirect::temporary(&location).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}
