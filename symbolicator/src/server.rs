//! The HTTP interface of the symbolication service.

use std::error::Error;
use std::future::Future;
use std::io;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use symbolic::symbolication::{
    SymbolicationError, SymbolicationErrorKind, SymbolicationService, V4Response, V5Response,
};
use tokio::net::TcpListener;

/// Renders an error and all of its sources as a single line.
pub fn error_chain(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError(SymbolicationError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            SymbolicationErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            SymbolicationErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let error = error_chain(&self.0);
        if status.is_server_error() {
            tracing::error!(error = &self.0 as &dyn Error, "symbolication request failed");
        } else {
            tracing::debug!(%error, "rejected symbolication request");
        }

        (status, Json(ErrorBody { error })).into_response()
    }
}

async fn symbolicate_v4(
    State(service): State<SymbolicationService>,
    body: Bytes,
) -> Result<Json<V4Response>, ApiError> {
    service.symbolicate_v4(&body).await.map(Json).map_err(ApiError)
}

async fn symbolicate_v5(
    State(service): State<SymbolicationService>,
    body: Bytes,
) -> Result<Json<V5Response>, ApiError> {
    service.symbolicate_v5(&body).await.map(Json).map_err(ApiError)
}

async fn health() -> &'static str {
    "ok"
}

/// Creates the router serving the symbolication endpoints.
pub fn router(service: SymbolicationService) -> Router {
    Router::new()
        .route("/symbolicate/v4", post(symbolicate_v4))
        .route("/symbolicate/v5", post(symbolicate_v5))
        .route("/health", get(health))
        .with_state(service)
}

/// Serves requests on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    service: SymbolicationService,
    shutdown: F,
) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await
}
