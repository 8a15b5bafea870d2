#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

use jsonwire::api::{self, RouterConfig};
use jsonwire::command::{handler_fn, Command, CommandHandler, CommandResult, HandlerTable};
use jsonwire::config::MatcherKind;
use jsonwire::dispatch::ServerContext;
use jsonwire::protocol::{Response, Status};
use jsonwire::resource::wire_resource_tree;
use jsonwire::routes::{wire_routes, CommandMatcher};
use jsonwire::session::{SessionContext, SessionRegistry};

/// Backend state of the fake browser: just the current URL.
#[derive(Debug, Default)]
pub struct FakeBrowser {
    pub url: String,
}

/// Native element reference held by the fake browser.
#[derive(Debug)]
pub struct FakeNode {
    pub text: String,
}

/// `executeScript` stand-in that sleeps for `ms` (default 50) while holding
/// the session lock.
pub struct SleepHandler;

#[async_trait]
impl CommandHandler for SleepHandler {
    async fn handle(&self, _session: &mut SessionContext, command: &Command) -> CommandResult {
        let ms = command.optional_param::<u64>("ms")?.unwrap_or(50);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!(ms))
    }
}

/// A handler table for a fake browser: navigation bumps the element
/// generation, `findElement` registers a node whose text is the locator
/// value, and `getElementText` dereferences it.
pub fn fake_handlers() -> HandlerTable {
    let mut table = HandlerTable::with_builtins();
    table
        .register(
            "get",
            handler_fn(|ctx, cmd| {
                let url: String = cmd.param("url")?;
                ctx.elements.advance_generation();
                ctx.set_backend_state(FakeBrowser { url });
                Ok(Value::Null)
            }),
        )
        .register(
            "getCurrentUrl",
            handler_fn(|ctx, _| {
                let url = ctx
                    .backend_state::<FakeBrowser>()
                    .map(|b| b.url.clone())
                    .unwrap_or_else(|| "about:blank".to_string());
                Ok(json!(url))
            }),
        )
        .register(
            "findElement",
            handler_fn(|ctx, cmd| {
                let value: String = cmd.param("value")?;
                let id = ctx.elements.insert(FakeNode { text: value });
                Ok(json!({ "ELEMENT": id }))
            }),
        )
        .register(
            "getElementText",
            handler_fn(|ctx, cmd| {
                let node = ctx.elements.resolve::<FakeNode>(cmd.path_param("id")?)?;
                Ok(json!(node.text))
            }),
        )
        .register(
            "elementEquals",
            handler_fn(|_, cmd| Ok(json!(cmd.path_param("id")? == cmd.path_param("other")?))),
        )
        .register(
            "deleteCookie",
            handler_fn(|_, cmd| Ok(json!({ "deleted": cmd.path_param("name")? }))),
        )
        .register("executeScript", SleepHandler);
    table
}

pub fn matcher(kind: MatcherKind) -> Arc<dyn CommandMatcher> {
    match kind {
        MatcherKind::Table => Arc::new(wire_routes().unwrap()),
        MatcherKind::Tree => Arc::new(wire_resource_tree().unwrap()),
    }
}

pub fn test_context(kind: MatcherKind) -> Arc<ServerContext> {
    Arc::new(ServerContext::new(
        SessionRegistry::new(),
        matcher(kind),
        fake_handlers(),
    ))
}

/// Create a router over the fake browser with the default config.
pub fn create_test_app() -> (axum::Router, Arc<ServerContext>) {
    create_test_app_with(MatcherKind::Table, RouterConfig::default())
}

pub fn create_test_app_with(
    kind: MatcherKind,
    config: RouterConfig,
) -> (axum::Router, Arc<ServerContext>) {
    let context = test_context(kind);
    (api::router(context.clone(), config), context)
}

/// Starts an HTTP server and returns its address.
pub async fn start_test_server(app: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(10)).await;

    addr
}

/// Send one request through the router and decode the envelope.
pub async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, HeaderMap, Response) {
    let body = match body {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let envelope = Response::from_slice(&bytes).expect("every reply is an envelope");
    (status, headers, envelope)
}

/// Create a session and return its id.
pub async fn new_session(app: &axum::Router) -> String {
    let (status, _, env) = send(app, "POST", "/session", Some(json!({ "capabilities": {} }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(env.status(), Some(Status::Success));
    env.session_id
}

/// Locate an element in the fake browser; returns its id.
pub async fn find_element(app: &axum::Router, session: &str, text: &str) -> String {
    let (_, _, env) = send(
        app,
        "POST",
        &format!("/session/{session}/element"),
        Some(json!({ "using": "css selector", "value": text })),
    )
    .await;
    assert!(env.is_success(), "findElement failed: {env:?}");
    env.value["ELEMENT"].as_str().unwrap().to_string()
}
