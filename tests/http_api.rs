#![cfg(unix)]

mod common;

use std::fs;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{
        Method, Request, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    response::Response,
};
use common::{HarnessOptions, harness, record};
use deckhand::{
    application::locks::MAKE_MARKDOWN_OPERATION,
    domain::DeckId,
    infra::http::build_router,
};
use deckhand_api_types::{BuildResult, DeckStatusResponse, PreviewPortResponse, ProcessingStatus};
use serde_json::Value;
use tower::ServiceExt;

async fn send(router: &Router, method: Method, uri: &str) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request");
    router.clone().oneshot(request).await.expect("router response")
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body")
        .to_vec()
}

async fn json<T: serde::de::DeserializeOwned>(response: Response) -> T {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

#[tokio::test]
async fn health_check_answers_no_content() {
    let h = harness(Vec::new(), HarnessOptions::new(35_000));
    let router = build_router(h.state.clone());

    let response = send(&router, Method::GET, "/_health").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn preview_id_starts_the_renderer_once() {
    let h = harness(vec![record(1, Some("intro"))], HarnessOptions::new(35_100));
    let router = build_router(h.state.clone());

    let first = send(&router, Method::GET, "/api/slides/preview-id/1").await;
    assert_eq!(first.status(), StatusCode::OK);
    let first: PreviewPortResponse = json(first).await;

    let second: PreviewPortResponse =
        json(send(&router, Method::GET, "/api/slides/preview-id/1").await).await;
    assert_eq!(first.port, second.port);
    assert_eq!(h.workspace.preview_launches(), 1);
    assert_eq!(h.supervisor.port_of(DeckId::new(1)).await, Some(first.port));

    h.supervisor.kill_all().await;
}

#[tokio::test]
async fn preview_id_rejects_bad_and_unknown_decks() {
    let h = harness(vec![record(2, None)], HarnessOptions::new(35_200));
    let router = build_router(h.state.clone());

    let response = send(&router, Method::GET, "/api/slides/preview-id/abc").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = json(response).await;
    assert_eq!(body["error"]["code"], "bad_request");

    let response = send(&router, Method::GET, "/api/slides/preview-id/99").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = json(response).await;
    assert_eq!(body["error"]["code"], "deck_not_found");

    let response = send(&router, Method::GET, "/api/slides/preview-id/2").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = json(response).await;
    assert_eq!(body["error"]["code"], "project_path_not_found");

    assert!(h.workspace.launches().is_empty());
}

#[tokio::test]
async fn preview_of_a_deleted_source_is_not_found() {
    let h = harness(vec![record(3, Some("deleted"))], HarnessOptions::new(35_300));
    fs::remove_file(h.workspace.projects_root.join("deleted/slides.md")).expect("remove entry");
    let router = build_router(h.state.clone());

    let response = send(&router, Method::GET, "/api/slides/preview-id/3").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = json(response).await;
    assert_eq!(body["error"]["code"], "source_not_found");
    assert!(h.supervisor.ports().is_empty());
}

#[tokio::test]
async fn build_endpoint_reports_busy_decks() {
    let h = harness(vec![record(4, Some("busy"))], HarnessOptions::new(35_400));
    let router = build_router(h.state.clone());
    let _guard = h
        .locks
        .try_acquire(DeckId::new(4), MAKE_MARKDOWN_OPERATION)
        .expect("lock free");

    let response = send(&router, Method::POST, "/api/slides/4/build").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = json(response).await;
    assert_eq!(body["error"]["code"], "deck_busy");
    assert_eq!(body["error"]["current"]["operation"], MAKE_MARKDOWN_OPERATION);
    assert!(h.workspace.launches().is_empty());
}

#[tokio::test]
async fn status_reflects_lock_and_preview() {
    let h = harness(vec![record(5, Some("status"))], HarnessOptions::new(35_500));
    let router = build_router(h.state.clone());
    let deck = DeckId::new(5);

    let status: DeckStatusResponse =
        json(send(&router, Method::GET, "/api/slides/5/status").await).await;
    assert_eq!(status.deck_id, 5);
    assert_eq!(status.status, ProcessingStatus::MarkdownSaved);
    assert!(status.preview_port.is_none());
    assert!(status.current_operation.is_none());

    let port = h.state.proxy.ensure_renderer(deck).await.expect("preview");
    let _guard = h
        .locks
        .try_acquire(deck, MAKE_MARKDOWN_OPERATION)
        .expect("lock free");
    let status: DeckStatusResponse =
        json(send(&router, Method::GET, "/api/slides/5/status").await).await;
    assert_eq!(status.preview_port, Some(port));
    assert_eq!(
        status.current_operation.map(|lock| lock.operation),
        Some(MAKE_MARKDOWN_OPERATION.to_string())
    );

    let response = send(&router, Method::GET, "/api/slides/77/status").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    h.supervisor.kill_all().await;
}

#[tokio::test]
async fn build_then_serve_the_static_presentation() {
    let h = harness(vec![record(6, Some("publish"))], HarnessOptions::new(35_600));
    let router = build_router(h.state.clone());

    let response = send(&router, Method::POST, "/api/slides/6/build").await;
    assert_eq!(response.status(), StatusCode::OK);
    let result: BuildResult = json(response).await;
    assert_eq!(result.deck_id, 6);
    assert!(result.cover_filename.is_some());

    let status: DeckStatusResponse =
        json(send(&router, Method::GET, "/api/slides/6/status").await).await;
    assert_eq!(status.status, ProcessingStatus::Completed);

    for uri in [
        "/api/slides/presentation/6",
        "/api/slides/presentation/6/",
        "/api/slides/presentation/6/slides/3",
    ] {
        let response = send(&router, Method::GET, uri).await;
        assert_eq!(response.status(), StatusCode::OK, "uri: {uri}");
        assert_eq!(
            response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("text/html"),
            "uri: {uri}"
        );
        assert_eq!(
            response.headers().get(CACHE_CONTROL).and_then(|v| v.to_str().ok()),
            Some("no-cache")
        );
        let body = String::from_utf8(body_bytes(response).await).expect("utf8");
        assert!(body.starts_with("<html>"), "uri: {uri}");
    }

    let response = send(&router, Method::GET, "/api/slides/presentation/6/assets/app.css").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("text/css")
    );
    assert!(
        response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|value| value.contains("immutable"))
    );

    let response = send(&router, Method::GET, "/api/slides/presentation/6/missing.js").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&router, Method::GET, "/api/slides/presentation/7/").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    h.supervisor.kill_all().await;
}
