//! HTTP client for JSON Wire servers.
//!
//! Used by the `status` subcommand and by anything that forwards commands to
//! a subordinate driver. Every reply is decoded as a [`Response`] envelope,
//! whatever the HTTP status.

use std::time::Duration;

use serde_json::{json, Value};

use crate::protocol::Response;
use crate::routes::HttpMethod;
use crate::session::Capabilities;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Commands may legitimately block for a page load.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("could not connect to {0}; is the server running?")]
    Connect(String),
    #[error("request to {0} timed out")]
    Timeout(String),
    #[error("request failed: {0}")]
    Http(reqwest::Error),
    #[error("invalid response envelope: {0}")]
    InvalidEnvelope(#[from] serde_json::Error),
    /// The server answered with a non-zero WebDriver status.
    #[error("command failed with status {status}: {message}")]
    Command { status: u32, message: String },
}

/// A connection to one JSON Wire server, e.g. `http://127.0.0.1:4444/wd/hub`.
#[derive(Debug, Clone)]
pub struct WireClient {
    http: reqwest::Client,
    base_url: String,
}

impl WireClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ClientError::Http)?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one request and decode the envelope, successful or not.
    pub async fn execute(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = match method {
            HttpMethod::Get => self.http.get(&url),
            HttpMethod::Post => self.http.post(&url),
            HttpMethod::Put => self.http.put(&url),
            HttpMethod::Delete => self.http.delete(&url),
        };
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(|e| to_client_error(&url, e))?;
        let http_ok = resp.status().is_success();
        let bytes = resp.bytes().await.map_err(|e| to_client_error(&url, e))?;

        // Some drivers answer bodiless commands with an empty 2xx.
        if bytes.is_empty() && http_ok {
            return Ok(Response::success("", Value::Null));
        }
        Ok(Response::from_slice(&bytes)?)
    }

    /// Send a command and return its value, turning a non-zero status into
    /// [`ClientError::Command`].
    pub async fn command(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        let resp = self.execute(method, path, body).await?;
        if !resp.is_success() {
            return Err(ClientError::Command {
                status: resp.status,
                message: resp.message().unwrap_or_default().to_string(),
            });
        }
        Ok(resp.value)
    }

    /// Create a session; returns its id and negotiated capabilities.
    pub async fn new_session(
        &self,
        desired: Capabilities,
    ) -> Result<(String, Capabilities), ClientError> {
        let body = json!({ "desiredCapabilities": desired });
        let resp = self.execute(HttpMethod::Post, "/session", Some(&body)).await?;
        if !resp.is_success() {
            return Err(ClientError::Command {
                status: resp.status,
                message: resp.message().unwrap_or_default().to_string(),
            });
        }
        let caps = match resp.value {
            Value::Object(map) => map,
            _ => Capabilities::new(),
        };
        Ok((resp.session_id, caps))
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), ClientError> {
        self.command(HttpMethod::Delete, &format!("/session/{session_id}"), None)
            .await
            .map(|_| ())
    }

    pub async fn status(&self) -> Result<Value, ClientError> {
        self.command(HttpMethod::Get, "/status", None).await
    }
}

fn to_client_error(url: &str, e: reqwest::Error) -> ClientError {
    if e.is_connect() {
        ClientError::Connect(url.to_string())
    } else if e.is_timeout() {
        ClientError::Timeout(url.to_string())
    } else {
        ClientError::Http(e)
    }
}
