//! Request dispatch: route matching, session resolution, per-session
//! serialization, and conversion of handler outcomes into envelopes.
//!
//! [`ServerContext`] is built once at startup and shared behind an `Arc` by
//! every request. It owns the session registry, the command matcher, the
//! handler table, and the backend's [`SessionLifecycle`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Map, Value};

use crate::command::{Command, CommandError, HandlerTable};
use crate::config::{Config, MatcherKind};
use crate::protocol::{Response, Status};
use crate::resource::{wire_resource_tree, TreeError};
use crate::routes::{wire_routes, CommandMatcher, HttpMethod, MatchError};
use crate::session::{Capabilities, SessionContext, SessionRegistry};

pub const NEW_SESSION: &str = "newSession";
pub const GET_SESSIONS: &str = "getSessions";
pub const STATUS: &str = "status";
pub const QUIT: &str = "quit";

/// Path parameters that carry element ids and are validated before any
/// handler runs.
const ELEMENT_PARAMS: &[&str] = &["id", "other"];

/// Key of a JSON Wire element reference object, `{"ELEMENT": "<id>"}`.
pub const ELEMENT_KEY: &str = "ELEMENT";

/// Message sent in place of the cause of an unexpected handler failure.
const UNEXPECTED_MESSAGE: &str = "an unexpected error occurred while executing the command";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("method {method} is not supported for {path}")]
    MethodNotAllowed {
        method: String,
        path: String,
        allowed: Vec<HttpMethod>,
    },
    #[error("invalid session id: {0}")]
    SessionNotFound(String),
    #[error("session not created: {0}")]
    SessionNotCreated(String),
    #[error("malformed request body: {0}")]
    MalformedBody(String),
    #[error("{source}")]
    Command {
        session_id: String,
        #[source]
        source: CommandError,
    },
}

impl DispatchError {
    /// The WebDriver status carried in the error envelope.
    pub fn status(&self) -> Status {
        match self {
            DispatchError::UnknownCommand(_) => Status::UnknownCommand,
            DispatchError::MethodNotAllowed { .. } => Status::UnknownError,
            DispatchError::SessionNotFound(_) => Status::NoSuchDriver,
            DispatchError::SessionNotCreated(_) => Status::SessionNotCreated,
            DispatchError::MalformedBody(_) => Status::UnknownError,
            DispatchError::Command { source, .. } => source.status(),
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            DispatchError::SessionNotFound(id) => id,
            DispatchError::Command { session_id, .. } => session_id,
            _ => "",
        }
    }

    /// The message placed on the wire. Unexpected failures are reduced to a
    /// fixed string; their cause is only logged.
    pub fn message(&self) -> String {
        match self {
            DispatchError::Command {
                source: CommandError::Unexpected(_),
                ..
            } => UNEXPECTED_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    pub fn to_response(&self) -> Response {
        Response::error(self.session_id(), self.status(), self.message())
    }
}

/// Backend hooks around session creation.
#[async_trait]
pub trait SessionLifecycle: Send + Sync {
    /// Turn requested capabilities into the capabilities the session gets.
    fn negotiate(&self, requested: Capabilities) -> Result<Capabilities, CommandError>;

    /// Runs under the new session's lock before its id is returned. An error
    /// deletes the session again.
    async fn on_created(&self, _session: &mut SessionContext) -> Result<(), CommandError> {
        Ok(())
    }
}

/// Echoes requested capabilities over a fixed set of defaults.
#[derive(Debug, Clone)]
pub struct DefaultLifecycle {
    defaults: Capabilities,
}

impl DefaultLifecycle {
    pub fn new(defaults: Capabilities) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &Capabilities {
        &self.defaults
    }
}

impl Default for DefaultLifecycle {
    fn default() -> Self {
        let mut defaults = Capabilities::new();
        defaults.insert("browserName".into(), json!(""));
        defaults.insert("platform".into(), json!(platform_name()));
        defaults.insert("javascriptEnabled".into(), json!(true));
        defaults.insert("takesScreenshot".into(), json!(false));
        defaults.insert("version".into(), json!(""));
        Self { defaults }
    }
}

#[async_trait]
impl SessionLifecycle for DefaultLifecycle {
    fn negotiate(&self, requested: Capabilities) -> Result<Capabilities, CommandError> {
        let mut negotiated = self.defaults.clone();
        negotiated.extend(requested);
        Ok(negotiated)
    }
}

/// JSON Wire platform name for the host OS.
pub fn platform_name() -> &'static str {
    match std::env::consts::OS {
        "windows" => "WINDOWS",
        "macos" => "MAC",
        "linux" => "LINUX",
        _ => "ANY",
    }
}

pub struct ServerContext {
    registry: SessionRegistry,
    matcher: Arc<dyn CommandMatcher>,
    handlers: HandlerTable,
    lifecycle: Arc<dyn SessionLifecycle>,
}

impl ServerContext {
    pub fn new(
        registry: SessionRegistry,
        matcher: Arc<dyn CommandMatcher>,
        handlers: HandlerTable,
    ) -> Self {
        Self {
            registry,
            matcher,
            handlers,
            lifecycle: Arc::new(DefaultLifecycle::default()),
        }
    }

    /// Build a context from config: the chosen matcher over the standard
    /// route set, registry limits and timeouts, and default capabilities.
    pub fn from_config(config: &Config, handlers: HandlerTable) -> Result<Self, TreeError> {
        let matcher: Arc<dyn CommandMatcher> = match config.routing.matcher {
            MatcherKind::Table => Arc::new(wire_routes()?),
            MatcherKind::Tree => Arc::new(wire_resource_tree()?),
        };
        let registry = SessionRegistry::with_max_sessions(config.sessions.max_sessions())
            .with_default_timeouts(config.sessions.timeouts());

        let mut defaults = DefaultLifecycle::default().defaults;
        defaults.extend(config.capabilities.clone());

        Ok(Self::new(registry, matcher, handlers)
            .with_lifecycle(Arc::new(DefaultLifecycle::new(defaults))))
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn SessionLifecycle>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn matcher(&self) -> &dyn CommandMatcher {
        self.matcher.as_ref()
    }

    /// Handle one raw request: match it, parse its body, and dispatch it.
    ///
    /// `path` must already be relative to the server's URL base.
    pub async fn handle_request(
        &self,
        method: &str,
        path: &str,
        body: &[u8],
    ) -> Result<Response, DispatchError> {
        let command = self.resolve(method, path)?;
        let command = command.with_body(parse_body(body)?);
        self.dispatch(command).await
    }

    fn resolve(&self, method: &str, path: &str) -> Result<Command, DispatchError> {
        let not_allowed = |allowed| DispatchError::MethodNotAllowed {
            method: method.to_string(),
            path: path.to_string(),
            allowed,
        };

        let Ok(parsed) = HttpMethod::from_str(method) else {
            let allowed: Vec<HttpMethod> = HttpMethod::ALL
                .iter()
                .copied()
                .filter(|m| self.matcher.match_request(*m, path).is_ok())
                .collect();
            if allowed.is_empty() {
                return Err(DispatchError::UnknownCommand(format!("{method} {path}")));
            }
            return Err(not_allowed(allowed));
        };

        match self.matcher.match_request(parsed, path) {
            Ok(found) => Ok(Command {
                name: found.command,
                path_params: found.params,
                body: Map::new(),
            }),
            Err(MatchError::NotFound) => {
                Err(DispatchError::UnknownCommand(format!("{method} {path}")))
            }
            Err(MatchError::MethodNotAllowed(allowed)) => Err(not_allowed(allowed)),
        }
    }

    /// Execute an already-resolved command.
    pub async fn dispatch(&self, command: Command) -> Result<Response, DispatchError> {
        match command.name.as_str() {
            NEW_SESSION => self.new_session(&command).await,
            GET_SESSIONS => Ok(Response::success("", self.sessions_value())),
            STATUS => Ok(Response::success("", status_value())),
            _ => self.dispatch_to_session(command).await,
        }
    }

    async fn new_session(&self, command: &Command) -> Result<Response, DispatchError> {
        let requested = requested_capabilities(&command.body)?;
        let negotiated = self
            .lifecycle
            .negotiate(requested)
            .map_err(|e| DispatchError::SessionNotCreated(e.to_string()))?;
        let session = self
            .registry
            .create(negotiated)
            .map_err(|e| DispatchError::SessionNotCreated(e.to_string()))?;

        let mut context = session.lock().await;
        if let Err(e) = guarded(self.lifecycle.on_created(&mut context)).await {
            tracing::warn!(session = %session.id, error = %e, "session setup failed");
            context.terminate();
            self.registry.unregister(&session);
            return Err(DispatchError::SessionNotCreated(e.to_string()));
        }
        context.mark_ready();
        drop(context);

        Ok(Response::success(
            session.id.clone(),
            Value::Object(session.capabilities().clone()),
        ))
    }

    fn sessions_value(&self) -> Value {
        self.registry
            .list()
            .iter()
            .map(|s| json!({ "id": s.id, "capabilities": s.capabilities() }))
            .collect()
    }

    async fn dispatch_to_session(&self, command: Command) -> Result<Response, DispatchError> {
        let Some(session_id) = command.session_id().map(str::to_string) else {
            return Err(DispatchError::UnknownCommand(command.name.clone()));
        };
        let session = self
            .registry
            .get(&session_id)
            .ok_or_else(|| DispatchError::SessionNotFound(session_id.clone()))?;

        let mut context = session.lock().await;
        // Deleted between lookup and lock.
        if context.is_terminated() {
            return Err(DispatchError::SessionNotFound(session_id));
        }

        tracing::debug!(session = %session_id, command = %command.name, "dispatching command");

        if command.name == QUIT {
            if let Some(hook) = self.handlers.get(QUIT) {
                if let Err(e) = guarded(hook.handle(&mut context, &command)).await {
                    tracing::warn!(session = %session_id, error = %e, "quit hook failed");
                }
            }
            context.terminate();
            self.registry.unregister(&session);
            return Ok(Response::success(session_id, Value::Null));
        }

        let command_error = |source: CommandError| DispatchError::Command {
            session_id: session_id.clone(),
            source,
        };

        let path_refs = ELEMENT_PARAMS
            .iter()
            .filter_map(|key| command.path_params.get(*key).map(String::as_str));
        let mut body_refs = Vec::new();
        for value in command.body.values() {
            collect_element_refs(value, &mut body_refs);
        }
        for element_id in path_refs.chain(body_refs) {
            context
                .elements
                .validate(element_id)
                .map_err(|e| command_error(e.into()))?;
        }

        let handler = self.handlers.get(&command.name).ok_or_else(|| {
            command_error(CommandError::failed(
                Status::UnknownCommand,
                format!("no handler is bound for command '{}'", command.name),
            ))
        })?;

        match guarded(handler.handle(&mut context, &command)).await {
            Ok(value) => Ok(Response::success(session.id.clone(), value)),
            Err(e) => {
                if matches!(e, CommandError::Unexpected(_)) {
                    tracing::warn!(
                        session = %session_id,
                        command = %command.name,
                        error = %e,
                        "command failed unexpectedly"
                    );
                }
                Err(command_error(e))
            }
        }
    }

    /// Delete every remaining session, waiting for in-flight commands.
    /// Returns the number of sessions deleted.
    pub async fn shutdown(&self) -> usize {
        let mut deleted = 0;
        for session in self.registry.list() {
            if self.registry.delete(&session.id).await.is_ok() {
                deleted += 1;
            }
        }
        tracing::info!(deleted, "all sessions closed");
        deleted
    }
}

/// Run a handler future, turning a panic into [`CommandError::Unexpected`].
async fn guarded<T, F>(fut: F) -> Result<T, CommandError>
where
    F: Future<Output = Result<T, CommandError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(CommandError::Unexpected(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

/// Collect the ids of every `{"ELEMENT": "<id>"}` object nested in `value`.
fn collect_element_refs<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(id)) = map.get(ELEMENT_KEY) {
                out.push(id);
            }
            for nested in map.values() {
                collect_element_refs(nested, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_element_refs(item, out);
            }
        }
        _ => {}
    }
}

/// An empty body is an empty parameter map; anything else must be a JSON
/// object.
fn parse_body(body: &[u8]) -> Result<Map<String, Value>, DispatchError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(DispatchError::MalformedBody(
            "expected a JSON object".to_string(),
        )),
        Err(e) => Err(DispatchError::MalformedBody(e.to_string())),
    }
}

/// Merge `desiredCapabilities`, `capabilities`, and `requiredCapabilities`,
/// later keys winning.
fn requested_capabilities(body: &Map<String, Value>) -> Result<Capabilities, DispatchError> {
    let mut caps = Capabilities::new();
    for key in ["desiredCapabilities", "capabilities", "requiredCapabilities"] {
        match body.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => caps.extend(map.clone()),
            Some(_) => {
                return Err(DispatchError::MalformedBody(format!(
                    "{key} must be an object"
                )))
            }
        }
    }
    Ok(caps)
}

fn status_value() -> Value {
    json!({
        "build": { "version": env!("CARGO_PKG_VERSION") },
        "os": { "name": platform_name(), "arch": std::env::consts::ARCH },
    })
}
