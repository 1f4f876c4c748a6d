//! HTTP request handlers.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::api::{AbortResponse, SolveRequest, SolveResponse};
use crate::db::{self, PublicationRepository};
use crate::ical::generate_ics;
use crate::models::state::ScheduleDocument;
use crate::publication::{feed_validators, format_http_date, FeedValidators};

use super::error::AppError;
use super::state::AppState;

type HandlerResult<T> = Result<Json<T>, AppError>;

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// Schedule document
// ---------------------------------------------------------------------------

pub async fn get_state(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> HandlerResult<ScheduleDocument> {
    let (doc, _) = db::load_document(state.repository.as_ref(), &owner).await?;
    Ok(Json(doc))
}

pub async fn put_state(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Json(doc): Json<ScheduleDocument>,
) -> HandlerResult<ScheduleDocument> {
    let (doc, _) = db::save_document(state.repository.as_ref(), &owner, doc).await?;
    Ok(Json(doc))
}

// ---------------------------------------------------------------------------
// Solver
// ---------------------------------------------------------------------------

pub async fn solve_range(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Json(request): Json<SolveRequest>,
) -> HandlerResult<SolveResponse> {
    let response = state.solver_host.solve(&owner, request).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct AbortParams {
    #[serde(default)]
    pub force: bool,
}

pub async fn abort_solver(
    State(state): State<AppState>,
    Query(params): Query<AbortParams>,
) -> HandlerResult<AbortResponse> {
    Ok(Json(state.solver_host.abort(params.force)))
}

/// Stream solver progress via Server-Sent Events.
pub async fn solver_progress(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.solver_host.subscribe();
    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let json = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().data(json));
        }
    };
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    )
}

// ---------------------------------------------------------------------------
// Publication management
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebPublishStatus {
    pub published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

pub async fn get_publication(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> HandlerResult<WebPublishStatus> {
    let publication = state.repository.publication_for_owner(&owner).await?;
    Ok(Json(WebPublishStatus {
        published: publication.is_some(),
        token: publication.map(|p| p.token),
    }))
}

pub async fn publish(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> HandlerResult<WebPublishStatus> {
    let publication = state.repository.publish(&owner).await?;
    Ok(Json(WebPublishStatus {
        published: true,
        token: Some(publication.token),
    }))
}

pub async fn rotate_publication(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> HandlerResult<WebPublishStatus> {
    let publication = state.repository.rotate(&owner).await?;
    Ok(Json(WebPublishStatus {
        published: true,
        token: Some(publication.token),
    }))
}

pub async fn unpublish(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> Result<StatusCode, AppError> {
    state.repository.unpublish(&owner).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// iCal feed
// ---------------------------------------------------------------------------

pub async fn ical_feed(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    serve_feed(state, token, None, headers).await
}

pub async fn ical_clinician_feed(
    State(state): State<AppState>,
    Path((token, clinician_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    // Calendar clients request `{clinicianId}.ics`.
    let clinician_id = clinician_id
        .strip_suffix(".ics")
        .unwrap_or(&clinician_id)
        .to_string();
    serve_feed(state, token, Some(clinician_id), headers).await
}

async fn serve_feed(
    state: AppState,
    token: String,
    clinician_id: Option<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let publication = state
        .repository
        .publication_for_token(&token)
        .await?
        .ok_or_else(|| AppError::NotFound("Link not found".to_string()))?;

    let (doc, state_updated_at) =
        db::load_document(state.repository.as_ref(), &publication.owner).await?;
    let validators = feed_validators(&token, state_updated_at, publication.updated_at);

    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());
    let if_modified_since = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok());
    if validators.not_modified(if_none_match, if_modified_since) {
        return Ok(with_cache_headers(
            StatusCode::NOT_MODIFIED.into_response(),
            &validators,
        ));
    }

    let cal_name = match &clinician_id {
        Some(clinician_id) => {
            let name = doc
                .clinician_by_id(clinician_id)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| clinician_id.clone());
            format!("Shift Schedule - {name}")
        }
        None => "Shift Schedule".to_string(),
    };
    let body = generate_ics(
        &doc,
        &doc.published_week_start_isos,
        &cal_name,
        clinician_id.as_deref(),
        chrono::Utc::now(),
    );

    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/calendar; charset=utf-8")],
        body,
    )
        .into_response();
    response = with_cache_headers(response, &validators);
    Ok(response)
}

fn with_cache_headers(mut response: Response, validators: &FeedValidators) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        axum::http::HeaderValue::from_static("private, max-age=0, must-revalidate"),
    );
    if let Ok(value) = validators.etag.parse() {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = format_http_date(validators.last_modified).parse() {
        headers.insert(header::LAST_MODIFIED, value);
    }
    response
}
