pub mod error;

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response as HttpResponse},
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::dispatch::ServerContext;
use crate::protocol::Response;

use error::ApiError;

/// Default request body limit.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub context: Arc<ServerContext>,
    /// Normalized URL prefix (`/wd/hub`), if any.
    pub url_base: Option<Arc<str>>,
}

/// Configuration for the HTTP router.
///
/// Use `RouterConfig::default()` in tests for a server mounted at `/`.
pub struct RouterConfig {
    pub url_base: Option<String>,
    pub body_limit: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            url_base: None,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

/// Normalize a URL base: leading slash, no trailing slash, `/` means none.
pub fn normalize_url_base(base: &str) -> Option<String> {
    let trimmed = base.trim().trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("/{trimmed}"))
    }
}

/// Build the router. Every method and path goes to a single fallback that
/// hands the request to the dispatcher.
pub fn router(context: Arc<ServerContext>, config: RouterConfig) -> Router {
    let state = AppState {
        context,
        url_base: config
            .url_base
            .as_deref()
            .and_then(normalize_url_base)
            .map(Arc::from),
    };

    Router::new()
        .fallback(dispatch_request)
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.body_limit))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(TraceLayer::new_for_http())
}

async fn dispatch_request(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    body: Result<Bytes, BytesRejection>,
) -> Result<HttpResponse, ApiError> {
    let body = body.map_err(|rejection| ApiError::BodyRejected {
        status: rejection.status(),
        detail: rejection.body_text(),
    })?;
    let path = strip_url_base(state.url_base.as_deref(), uri.path())?.to_string();

    // Commands run to completion on their own task; a client that hangs up
    // only drops the wait for the reply.
    let context = state.context.clone();
    let task = tokio::spawn(async move {
        context
            .handle_request(method.as_str(), &path, &body)
            .await
    });
    let envelope = task.await.map_err(|e| {
        tracing::error!(error = %e, "dispatch task failed");
        ApiError::TaskFailed(e.to_string())
    })??;
    Ok(envelope_response(StatusCode::OK, &envelope))
}

fn strip_url_base<'a>(base: Option<&str>, path: &'a str) -> Result<&'a str, ApiError> {
    let Some(base) = base else {
        return Ok(path);
    };
    match path.strip_prefix(base) {
        Some("") => Ok("/"),
        Some(rest) if rest.starts_with('/') => Ok(rest),
        _ => Err(ApiError::OutsideUrlBase(path.to_string())),
    }
}

/// Render an envelope as an `application/json` response.
pub(crate) fn envelope_response(status: StatusCode, envelope: &Response) -> HttpResponse {
    (
        status,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        )],
        envelope.to_bytes(),
    )
        .into_response()
}
