//! Reverse proxy from `/preview/{deck_id}/...` to the deck's renderer, WebSockets included.

use std::{sync::Arc, time::Instant};

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderValue, Request, Response, StatusCode, Uri,
        header::{CONNECTION, HOST, UPGRADE},
    },
};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::{TokioExecutor, TokioIo},
};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    application::catalog::{CatalogError, DeckCatalog},
    domain::DeckId,
    runtime::{RendererSupervisor, SupervisorError},
};

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Renderer(#[from] SupervisorError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("deck {deck_id} not found")]
    DeckNotFound { deck_id: DeckId },
    #[error("project path not found for deck {deck_id}")]
    ProjectPathNotFound { deck_id: DeckId },
    #[error("upstream `{target}` failed: {message}")]
    Upstream { target: String, message: String },
}

#[derive(Clone)]
pub struct PreviewProxy {
    catalog: Arc<dyn DeckCatalog>,
    supervisor: RendererSupervisor,
    client: Client<HttpConnector, Body>,
}

impl PreviewProxy {
    pub fn new(catalog: Arc<dyn DeckCatalog>, supervisor: RendererSupervisor) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            catalog,
            supervisor,
            client,
        }
    }

    /// Resolve the deck's entry file and make sure its renderer is running.
    pub async fn ensure_renderer(&self, deck_id: DeckId) -> Result<u16, ProxyError> {
        let deck = self
            .catalog
            .find_deck(deck_id)
            .await?
            .ok_or(ProxyError::DeckNotFound { deck_id })?;
        let entry_file = deck
            .entry_file()
            .ok_or(ProxyError::ProjectPathNotFound { deck_id })?;
        Ok(self.supervisor.start_renderer(deck_id, entry_file).await?)
    }

    /// Forward `request` unchanged to the deck's renderer. `original_uri` is the
    /// full request URI before any router prefix stripping.
    pub async fn forward(
        &self,
        deck_id: DeckId,
        original_uri: &Uri,
        request: Request<Body>,
    ) -> Result<Response<Body>, ProxyError> {
        let started_at = Instant::now();
        let port = self.ensure_renderer(deck_id).await?;
        let method = request.method().clone();
        let path_and_query = original_uri
            .path_and_query()
            .map(|value| value.as_str())
            .unwrap_or("/");
        let target = format!("http://localhost:{port}{path_and_query}");

        let result = self.send(port, &target, request).await;
        match &result {
            Ok(response) => info!(
                target = "infra::http::proxy",
                op = "forward",
                result = "ok",
                deck_id = %deck_id,
                method = %method,
                path = %original_uri.path(),
                upstream = %target,
                status = response.status().as_u16(),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Preview request proxied"
            ),
            Err(err) => {
                counter!("deckhand_proxy_error_total").increment(1);
                warn!(
                    target = "infra::http::proxy",
                    op = "forward",
                    result = "error",
                    deck_id = %deck_id,
                    method = %method,
                    path = %original_uri.path(),
                    upstream = %target,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "Preview request failed upstream"
                );
            }
        }
        result
    }

    async fn send(
        &self,
        port: u16,
        target: &str,
        mut request: Request<Body>,
    ) -> Result<Response<Body>, ProxyError> {
        let upstream_error = |message: String| ProxyError::Upstream {
            target: target.to_string(),
            message,
        };
        let uri: Uri = target
            .parse()
            .map_err(|err: axum::http::uri::InvalidUri| upstream_error(err.to_string()))?;

        let upgrading = is_upgrade_request(request.headers());
        let client_upgrade = upgrading.then(|| hyper::upgrade::on(&mut request));

        let (mut parts, body) = request.into_parts();
        parts.uri = uri;
        if !upgrading {
            strip_hop_by_hop(&mut parts.headers);
        }
        if let Ok(host) = HeaderValue::from_str(&format!("localhost:{port}")) {
            parts.headers.insert(HOST, host);
        }

        let mut response = self
            .client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|err| upstream_error(format!("{err:#}")))?;

        if response.status() == StatusCode::SWITCHING_PROTOCOLS {
            if let Some(client_upgrade) = client_upgrade {
                let upstream_upgrade = hyper::upgrade::on(&mut response);
                let target = target.to_string();
                tokio::spawn(async move {
                    match tokio::try_join!(client_upgrade, upstream_upgrade) {
                        Ok((client, upstream)) => {
                            let mut client = TokioIo::new(client);
                            let mut upstream = TokioIo::new(upstream);
                            match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
                                Ok((sent, received)) => debug!(
                                    target = "infra::http::proxy",
                                    op = "tunnel",
                                    result = "closed",
                                    upstream = %target,
                                    sent,
                                    received,
                                    "Upgraded preview connection closed"
                                ),
                                Err(err) => debug!(
                                    target = "infra::http::proxy",
                                    op = "tunnel",
                                    result = "error",
                                    upstream = %target,
                                    error = %err,
                                    "Upgraded preview connection aborted"
                                ),
                            }
                        }
                        Err(err) => warn!(
                            target = "infra::http::proxy",
                            op = "tunnel",
                            result = "error",
                            upstream = %target,
                            error = %err,
                            "Failed to upgrade preview connection"
                        ),
                    }
                });
            }
        } else {
            strip_hop_by_hop(response.headers_mut());
        }

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers.contains_key(UPGRADE)
        && headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}
