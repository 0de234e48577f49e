use std::error::Error as StdError;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use deckhand_api_types::LockStateView;
use serde::Serialize;

use crate::application::{
    build::BuildError, catalog::CatalogError, error::ErrorReport, locks::DeckBusy,
};
use crate::runtime::SupervisorError;

use super::proxy::ProxyError;

const REPORT_SOURCE: &str = "infra::http::api";

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const NOT_FOUND: &str = "not_found";
    pub const DECK_BUSY: &str = "deck_busy";
    pub const DECK_NOT_FOUND: &str = "deck_not_found";
    pub const PROJECT_PATH_NOT_FOUND: &str = "project_path_not_found";
    pub const SOURCE_NOT_FOUND: &str = "source_not_found";
    pub const RENDERER: &str = "renderer_error";
    pub const BUILD: &str = "build_error";
    pub const CATALOG: &str = "catalog_error";
    pub const PROXY_UPSTREAM: &str = "proxy_upstream_error";
    pub const IO: &str = "io_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<LockStateView>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    current: Option<LockStateView>,
    report: Option<ErrorReport>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            current: None,
            report: None,
        }
    }

    /// Keep `err`'s source chain for the response log.
    pub fn caused_by(mut self, err: &dyn StdError) -> Self {
        self.report = Some(ErrorReport::from_error(REPORT_SOURCE, self.status, err));
        self
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<DeckBusy> for ApiError {
    fn from(busy: DeckBusy) -> Self {
        let mut error = ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::DECK_BUSY,
            "Slide busy",
            Some(format!("running {}", busy.current.operation)),
        );
        error.current = Some(busy.current.to_view());
        error
    }
}

impl From<SupervisorError> for ApiError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::SourceNotFound { .. } => ApiError::new(
                StatusCode::NOT_FOUND,
                codes::SOURCE_NOT_FOUND,
                "Slide source not found",
                Some(err.to_string()),
            )
            .caused_by(&err),
            SupervisorError::NoAvailablePort(_)
            | SupervisorError::Spawn { .. }
            | SupervisorError::RendererStartTimeout { .. } => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::RENDERER,
                "Renderer failed to start",
                Some(err.to_string()),
            )
            .caused_by(&err),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::CATALOG,
            "Deck catalog unavailable",
            Some(err.to_string()),
        )
        .caused_by(&err)
    }
}

impl From<BuildError> for ApiError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::Busy(busy) => busy.into(),
            BuildError::DeckNotFound { .. } => ApiError::new(
                StatusCode::NOT_FOUND,
                codes::DECK_NOT_FOUND,
                "Slide not found",
                Some(err.to_string()),
            )
            .caused_by(&err),
            BuildError::ProjectPathNotFound { .. } => ApiError::new(
                StatusCode::NOT_FOUND,
                codes::PROJECT_PATH_NOT_FOUND,
                "Project path not found",
                Some(err.to_string()),
            )
            .caused_by(&err),
            BuildError::Catalog(inner) => inner.into(),
            BuildError::Io { .. } => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::IO,
                "Build output could not be written",
                Some(err.to_string()),
            )
            .caused_by(&err),
            BuildError::BuildToolFailed { .. } | BuildError::BuildToolUnavailable { .. } => {
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    codes::BUILD,
                    "Slide build failed",
                    Some(err.to_string()),
                )
                .caused_by(&err)
            }
        }
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::Renderer(inner) => inner.into(),
            ProxyError::Catalog(inner) => inner.into(),
            ProxyError::DeckNotFound { .. } => ApiError::new(
                StatusCode::NOT_FOUND,
                codes::DECK_NOT_FOUND,
                "Slide not found",
                Some(err.to_string()),
            )
            .caused_by(&err),
            ProxyError::ProjectPathNotFound { .. } => ApiError::new(
                StatusCode::NOT_FOUND,
                codes::PROJECT_PATH_NOT_FOUND,
                "Project path not found",
                Some(err.to_string()),
            )
            .caused_by(&err),
            ProxyError::Upstream { .. } => ApiError::new(
                StatusCode::BAD_GATEWAY,
                codes::PROXY_UPSTREAM,
                "Preview renderer unreachable",
                Some(err.to_string()),
            )
            .caused_by(&err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let hint = self.hint.clone();
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
                current: self.current,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        let report = self.report.unwrap_or_else(|| {
            ErrorReport::from_message(
                REPORT_SOURCE,
                self.status,
                format!("{}: {}", self.code, hint.as_deref().unwrap_or(self.message)),
            )
        });
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use axum::body::to_bytes;
    use time::macros::datetime;

    use super::*;
    use crate::{application::locks::DeckLockState, domain::DeckId};

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test]
    async fn busy_maps_to_bad_request_with_current_operation() {
        let busy = DeckBusy {
            deck_id: DeckId::new(4),
            current: DeckLockState {
                operation: "build-slidev".into(),
                started_at: datetime!(2024-05-01 08:30:00 UTC),
            },
        };
        let response = ApiError::from(BuildError::Busy(busy)).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.extensions().get::<ErrorReport>().is_some());

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "deck_busy");
        assert_eq!(json["error"]["hint"], "running build-slidev");
        assert_eq!(json["error"]["current"]["operation"], "build-slidev");
        assert_eq!(json["error"]["current"]["started_at"], "2024-05-01T08:30:00Z");
    }

    #[test]
    fn not_found_variants_map_to_404() {
        let missing_deck = ApiError::from(BuildError::DeckNotFound {
            deck_id: DeckId::new(1),
        });
        assert_eq!(missing_deck.status(), StatusCode::NOT_FOUND);

        let missing_path = ApiError::from(BuildError::ProjectPathNotFound {
            deck_id: DeckId::new(1),
            path: None,
        });
        assert_eq!(missing_path.code(), codes::PROJECT_PATH_NOT_FOUND);

        let missing_source = ApiError::from(SupervisorError::SourceNotFound {
            path: PathBuf::from("/srv/projects/a/slides.md"),
        });
        assert_eq!(missing_source.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn upstream_failures_are_bad_gateway() {
        let error = ApiError::from(ProxyError::Upstream {
            target: "http://localhost:3030/".into(),
            message: "connection refused".into(),
        });
        assert_eq!(error.status(), StatusCode::BAD_GATEWAY);
    }
}
