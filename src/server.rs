//! HTTP surface over [`TaxonomyService`].
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /health` | liveness |
//! | `POST /cluster/{tenant}` | submit a background build, returns `202` with the job |
//! | `GET /cluster/{tenant}/status?job_id=` | job status, latest job when `job_id` is omitted |
//! | `POST /cluster/{tenant}/sync` | build and wait for the result |
//! | `GET /topics/{tenant}` | stored topics |
//!
//! Build requests take an optional JSON `ClusterConfig` body. An empty body
//! uses the service defaults.

use crate::taxonomy::TaxonomyService;

#[cfg(feature = "http-server")]
mod routes {
    use crate::config::ClusterConfig;
    use crate::error::StoreError;
    use crate::taxonomy::TaxonomyService;
    use crate::types::{BuildResult, BuildStatus};
    use axum::body::Bytes;
    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde::Deserialize;
    use tower_http::cors::CorsLayer;

    #[derive(Debug, Deserialize)]
    pub(super) struct StatusQuery {
        job_id: Option<String>,
    }

    pub(super) fn router(service: TaxonomyService) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route("/cluster/{tenant}", post(submit_build))
            .route("/cluster/{tenant}/status", get(build_status))
            .route("/cluster/{tenant}/sync", post(sync_build))
            .route("/topics/{tenant}", get(list_topics))
            .layer(CorsLayer::permissive())
            .with_state(service)
    }

    fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
        (
            status,
            Json(serde_json::json!({ "error": message.into() })),
        )
            .into_response()
    }

    /// Parse an optional config body. `Ok(None)` for an empty body.
    fn parse_config(body: &Bytes) -> Result<Option<ClusterConfig>, Response> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(body)
            .map(Some)
            .map_err(|e| error_body(StatusCode::BAD_REQUEST, format!("Invalid config: {e}")))
    }

    fn build_status_code(result: &BuildResult) -> StatusCode {
        if result.status == BuildStatus::Completed {
            return StatusCode::OK;
        }
        match result.error_code.as_deref() {
            Some("INVALID_CONFIG") => StatusCode::BAD_REQUEST,
            Some("BUILD_ALREADY_RUNNING") => StatusCode::CONFLICT,
            Some("BUILD_TIMED_OUT") => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    async fn health_check() -> &'static str {
        "OK"
    }

    async fn submit_build(
        State(service): State<TaxonomyService>,
        Path(tenant): Path<String>,
        body: Bytes,
    ) -> Response {
        let config = match parse_config(&body) {
            Ok(config) => config,
            Err(response) => return response,
        };
        let job = service.submit(&tenant, config);
        (StatusCode::ACCEPTED, Json(job)).into_response()
    }

    async fn build_status(
        State(service): State<TaxonomyService>,
        Path(tenant): Path<String>,
        Query(query): Query<StatusQuery>,
    ) -> Response {
        let job = match &query.job_id {
            Some(job_id) => service.jobs().get(&tenant, job_id),
            None => service.jobs().latest(&tenant),
        };
        match job {
            Some(job) => Json(job).into_response(),
            None => error_body(StatusCode::NOT_FOUND, "Job not found"),
        }
    }

    async fn sync_build(
        State(service): State<TaxonomyService>,
        Path(tenant): Path<String>,
        body: Bytes,
    ) -> Response {
        let config = match parse_config(&body) {
            Ok(config) => config,
            Err(response) => return response,
        };
        let result = service.build(&tenant, config).await;
        (build_status_code(&result), Json(result)).into_response()
    }

    async fn list_topics(
        State(service): State<TaxonomyService>,
        Path(tenant): Path<String>,
    ) -> Response {
        match service.topics(&tenant).await {
            Ok(topics) => Json(topics).into_response(),
            Err(e @ StoreError::InvalidTenant(_)) => {
                error_body(StatusCode::BAD_REQUEST, e.to_string())
            }
            Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }
}

/// Build the router without binding a socket.
#[cfg(feature = "http-server")]
pub fn router(service: TaxonomyService) -> axum::Router {
    routes::router(service)
}

/// Serve until Ctrl+C or until `shutdown` is cancelled.
///
/// Running builds observe the same token through the service.
#[cfg(feature = "http-server")]
pub async fn serve_http(
    service: TaxonomyService,
    bind: &str,
    shutdown: tokio_util::sync::CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(bind, "HTTP server listening");
    eprintln!("Taxonomy server listening on http://{bind}");
    eprintln!("Health check: http://{bind}/health");
    eprintln!("Press Ctrl+C to stop the server");

    let signal_token = shutdown.clone();
    axum::serve(listener, routes::router(service))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("Received shutdown signal");
                }
                _ = signal_token.cancelled() => {}
            }
            signal_token.cancel();
        })
        .await?;

    tracing::info!("HTTP server shut down");
    Ok(())
}

#[cfg(not(feature = "http-server"))]
pub async fn serve_http(
    _service: TaxonomyService,
    _bind: &str,
    _shutdown: tokio_util::sync::CancellationToken,
) -> anyhow::Result<()> {
    anyhow::bail!("HTTP server support is not compiled in. Rebuild with: cargo build --features http-server")
}
