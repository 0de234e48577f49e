use axum::{
    Json, Router,
    body::Body,
    extract::{OriginalUri, Path, Request, State},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get, post},
};
use deckhand_api_types::{BuildResult, DeckStatusResponse, PreviewPortResponse};

use crate::{
    domain::{
        DeckId,
        status::{ArtifactPresence, derive_status},
    },
    infra::presentations::{PresentationError, PresentationFile},
};

use super::{
    HttpState,
    error::ApiError,
    middleware::{log_responses, set_request_context},
};

pub fn build_router(state: HttpState) -> Router {
    let slides = Router::new()
        .route("/preview-id/{deck_id}", get(preview_port))
        .route("/preview/{deck_id}", any(preview_root))
        .route("/preview/{deck_id}/", any(preview_root))
        .route("/preview/{deck_id}/{*rest}", any(preview_nested))
        .route("/presentation/{deck_id}", get(presentation_root))
        .route("/presentation/{deck_id}/", get(presentation_root))
        .route("/presentation/{deck_id}/{*path}", get(presentation_file))
        .route("/{deck_id}/build", post(build_deck))
        .route("/{deck_id}/status", get(deck_status));

    let prefix = state.paths.api_prefix().to_string();
    let routes = if prefix.is_empty() {
        slides
    } else {
        Router::new().nest(&prefix, slides)
    };

    routes
        .route("/_health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

fn parse_deck_id(raw: &str) -> Result<DeckId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request("Invalid deck id", Some(format!("`{raw}` is not a deck id"))))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn preview_port(
    State(state): State<HttpState>,
    Path(deck_id): Path<String>,
) -> Result<Json<PreviewPortResponse>, ApiError> {
    let deck_id = parse_deck_id(&deck_id)?;
    let port = state.proxy.ensure_renderer(deck_id).await?;
    Ok(Json(PreviewPortResponse { port }))
}

async fn preview_root(
    State(state): State<HttpState>,
    Path(deck_id): Path<String>,
    OriginalUri(uri): OriginalUri,
    request: Request,
) -> Result<Response, ApiError> {
    let deck_id = parse_deck_id(&deck_id)?;
    Ok(state.proxy.forward(deck_id, &uri, request).await?)
}

async fn preview_nested(
    State(state): State<HttpState>,
    Path((deck_id, _rest)): Path<(String, String)>,
    OriginalUri(uri): OriginalUri,
    request: Request,
) -> Result<Response, ApiError> {
    let deck_id = parse_deck_id(&deck_id)?;
    Ok(state.proxy.forward(deck_id, &uri, request).await?)
}

async fn presentation_root(
    State(state): State<HttpState>,
    Path(deck_id): Path<String>,
) -> Result<Response, ApiError> {
    serve_presentation(&state, &deck_id, "").await
}

async fn presentation_file(
    State(state): State<HttpState>,
    Path((deck_id, path)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    serve_presentation(&state, &deck_id, &path).await
}

async fn serve_presentation(
    state: &HttpState,
    deck_id: &str,
    path: &str,
) -> Result<Response, ApiError> {
    let deck_id = parse_deck_id(deck_id)?;
    match state.presentations.read(deck_id, path).await {
        Ok(file) => Ok(build_presentation_response(file)),
        Err(PresentationError::InvalidPath | PresentationError::NotFound) => {
            Err(ApiError::not_found("Presentation not found"))
        }
        Err(PresentationError::Io(err)) => Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            super::error::codes::IO,
            "Failed to read presentation",
            Some(err.to_string()),
        )),
    }
}

fn build_presentation_response(file: PresentationFile) -> Response {
    let PresentationFile {
        relative_path,
        bytes,
    } = file;
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(&relative_path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    // rebuilt in place, so entry documents must be revalidated
    let cache = if relative_path.starts_with("assets/") {
        "public, max-age=31536000, immutable"
    } else {
        "no-cache"
    };
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(cache));

    response
}

async fn build_deck(
    State(state): State<HttpState>,
    Path(deck_id): Path<String>,
) -> Result<Json<BuildResult>, ApiError> {
    let deck_id = parse_deck_id(&deck_id)?;
    let report = state.builds.build_and_complete(deck_id).await?;
    Ok(Json(report.to_result()))
}

async fn deck_status(
    State(state): State<HttpState>,
    Path(deck_id): Path<String>,
) -> Result<Response, ApiError> {
    let deck_id = parse_deck_id(&deck_id)?;
    let deck = state
        .catalog
        .find_deck(deck_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Slide not found"))?;

    let entry_file_exists = match deck.entry_file() {
        Some(entry) => tokio::fs::try_exists(entry).await.unwrap_or(false),
        None => false,
    };
    let cover_exists = match deck.cover_filename.as_deref() {
        Some(cover) => tokio::fs::try_exists(state.screenshots_dir.join(cover))
            .await
            .unwrap_or(false),
        None => false,
    };
    let status = derive_status(
        ArtifactPresence {
            has_outlines: deck.has_outlines,
            entry_file_exists,
            cover_exists,
        },
        deck.status,
    );

    let body = DeckStatusResponse {
        deck_id: deck_id.get(),
        status,
        preview_port: state.supervisor.port_of(deck_id).await,
        current_operation: state.locks.current(deck_id).map(|lock| lock.to_view()),
    };
    Ok(Json(body).into_response())
}
