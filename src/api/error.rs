use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response as HttpResponse},
};

use crate::dispatch::DispatchError;
use crate::protocol::{Response, Status};
use crate::routes::HttpMethod;

use super::envelope_response;

/// Every way a request can fail at the HTTP boundary.
///
/// Each variant maps to an HTTP status code and a WebDriver status, and
/// renders as a standard `{sessionId, status, value}` envelope so clients
/// never see a non-JSON body.
#[derive(Debug)]
pub enum ApiError {
    /// Routing, session, or command failure reported by the dispatcher.
    Dispatch(DispatchError),
    /// 404 - Request path lies outside the configured URL base.
    OutsideUrlBase(String),
    /// 413 / 400 - The body could not be read.
    BodyRejected { status: StatusCode, detail: String },
    /// 500 - The task running the command ended without a reply.
    TaskFailed(String),
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        ApiError::Dispatch(err)
    }
}

impl ApiError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Dispatch(err) => match err {
                DispatchError::UnknownCommand(_) => StatusCode::NOT_FOUND,
                DispatchError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
                DispatchError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                DispatchError::SessionNotCreated(_) => StatusCode::INTERNAL_SERVER_ERROR,
                DispatchError::MalformedBody(_) => StatusCode::BAD_REQUEST,
                DispatchError::Command { source, .. } => {
                    if source.is_bad_request() {
                        StatusCode::BAD_REQUEST
                    } else if source.status() == Status::UnknownCommand {
                        StatusCode::NOT_FOUND
                    } else {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                }
            },
            ApiError::OutsideUrlBase(_) => StatusCode::NOT_FOUND,
            ApiError::BodyRejected { status, .. } => *status,
            ApiError::TaskFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the WebDriver status carried in the envelope.
    pub fn code(&self) -> Status {
        match self {
            ApiError::Dispatch(err) => err.status(),
            ApiError::OutsideUrlBase(_) => Status::UnknownCommand,
            ApiError::BodyRejected { .. } => Status::UnknownError,
            ApiError::TaskFailed(_) => Status::UnknownError,
        }
    }

    /// Returns a human-readable error message.
    pub fn message(&self) -> String {
        match self {
            ApiError::Dispatch(err) => err.message(),
            ApiError::OutsideUrlBase(path) => format!("unknown command: {path} is not served here"),
            ApiError::BodyRejected { detail, .. } => format!("could not read request body: {detail}"),
            ApiError::TaskFailed(_) => "the command did not complete".to_string(),
        }
    }

    pub fn to_envelope(&self) -> Response {
        match self {
            ApiError::Dispatch(err) => err.to_response(),
            other => Response::error("", other.code(), other.message()),
        }
    }

    fn allowed_methods(&self) -> Option<&[HttpMethod]> {
        match self {
            ApiError::Dispatch(DispatchError::MethodNotAllowed { allowed, .. }) => {
                Some(allowed.as_slice())
            }
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> HttpResponse {
        let mut response = envelope_response(self.status_code(), &self.to_envelope());
        if let Some(allowed) = self.allowed_methods() {
            let allow = allowed
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&allow) {
                response.headers_mut().insert(header::ALLOW, value);
            }
        }
        response
    }
}
