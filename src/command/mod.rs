//! Commands and the handlers that execute them.
//!
//! A backend binds one [`CommandHandler`] per command name in a
//! [`HandlerTable`]. Handlers receive the locked [`SessionContext`] and the
//! parsed [`Command`], and return either a JSON value or a [`CommandError`]
//! carrying a WebDriver status.

pub mod builtins;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::element::ElementError;
use crate::protocol::Status;
use crate::session::SessionContext;

/// One request, resolved to a command name and its parameters.
#[derive(Debug, Clone, Default)]
pub struct Command {
    pub name: String,
    pub path_params: HashMap<String, String>,
    pub body: Map<String, Value>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_path_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Map<String, Value>) -> Self {
        self.body = body;
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.path_params.get("sessionId").map(String::as_str)
    }

    /// The element id placeholder, if the command addresses an element.
    pub fn element_id(&self) -> Option<&str> {
        self.path_params.get("id").map(String::as_str)
    }

    pub fn path_param(&self, key: &str) -> Result<&str, CommandError> {
        self.path_params
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| CommandError::MissingParameter(key.to_string()))
    }

    /// Deserialize a required body parameter.
    pub fn param<T: DeserializeOwned>(&self, key: &str) -> Result<T, CommandError> {
        let value = self
            .body
            .get(key)
            .ok_or_else(|| CommandError::MissingParameter(key.to_string()))?;
        T::deserialize(value).map_err(|e| CommandError::InvalidParameter {
            name: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// Deserialize an optional body parameter; `null` counts as absent.
    pub fn optional_param<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CommandError> {
        match self.body.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.param(key).map(Some),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// A backend failure with an explicit WebDriver status.
    #[error("{message}")]
    Failed { status: Status, message: String },
    #[error("missing parameter: {0}")]
    MissingParameter(String),
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
    #[error(transparent)]
    Element(#[from] ElementError),
    /// Anything the backend did not classify. The detail is logged, never sent.
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl CommandError {
    pub fn failed(status: Status, message: impl Into<String>) -> Self {
        CommandError::Failed {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> Status {
        match self {
            CommandError::Failed { status, .. } => *status,
            CommandError::MissingParameter(_) | CommandError::InvalidParameter { .. } => {
                Status::UnknownError
            }
            CommandError::Element(ElementError::NotFound(_)) => Status::NoSuchElement,
            CommandError::Element(ElementError::Stale(_)) => Status::StaleElementReference,
            CommandError::Element(ElementError::WrongType(_)) => Status::UnknownError,
            CommandError::Unexpected(_) => Status::UnknownError,
        }
    }

    /// True for errors caused by the request itself rather than the browser.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            CommandError::MissingParameter(_) | CommandError::InvalidParameter { .. }
        )
    }
}

pub type CommandResult = Result<Value, CommandError>;

/// Executes one command against a locked session.
///
/// Implementations must not stash the session reference anywhere that
/// outlives the call.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, session: &mut SessionContext, command: &Command) -> CommandResult;
}

/// Adapter for synchronous closures.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> CommandHandler for FnHandler<F>
where
    F: Fn(&mut SessionContext, &Command) -> CommandResult + Send + Sync,
{
    async fn handle(&self, session: &mut SessionContext, command: &Command) -> CommandResult {
        (self.0)(session, command)
    }
}

/// Wrap a synchronous closure as a [`CommandHandler`].
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&mut SessionContext, &Command) -> CommandResult + Send + Sync,
{
    FnHandler(f)
}

/// Command name to handler bindings.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table pre-populated with the session-state commands this crate
    /// implements itself (timeouts, capabilities).
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        builtins::register(&mut table);
        table
    }

    /// Bind `handler` to `name`, replacing any previous binding.
    pub fn register<H>(&mut self, name: impl Into<String>, handler: H) -> &mut Self
    where
        H: CommandHandler + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRegistry;
    use serde_json::json;

    fn body(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn required_param_is_typed() {
        let cmd = Command::new("implicitlyWait").with_body(body(json!({"ms": 250})));
        assert_eq!(cmd.param::<u64>("ms").unwrap(), 250);
    }

    #[test]
    fn missing_param_is_reported_by_name() {
        let cmd = Command::new("get");
        let err = cmd.param::<String>("url").unwrap_err();
        assert!(matches!(err, CommandError::MissingParameter(ref k) if k == "url"));
        assert!(err.is_bad_request());
        assert_eq!(err.status(), Status::UnknownError);
    }

    #[test]
    fn wrong_type_is_invalid_param() {
        let cmd = Command::new("get").with_body(body(json!({"url": 5})));
        let err = cmd.param::<String>("url").unwrap_err();
        assert!(matches!(err, CommandError::InvalidParameter { ref name, .. } if name == "url"));
    }

    #[test]
    fn null_optional_param_is_absent() {
        let cmd = Command::new("x").with_body(body(json!({"a": null, "b": "y"})));
        assert_eq!(cmd.optional_param::<String>("a").unwrap(), None);
        assert_eq!(cmd.optional_param::<String>("b").unwrap().as_deref(), Some("y"));
        assert_eq!(cmd.optional_param::<String>("c").unwrap(), None);
    }

    #[test]
    fn element_errors_map_to_statuses() {
        assert_eq!(
            CommandError::from(ElementError::NotFound("e".into())).status(),
            Status::NoSuchElement
        );
        assert_eq!(
            CommandError::from(ElementError::Stale("e".into())).status(),
            Status::StaleElementReference
        );
        assert_eq!(
            CommandError::failed(Status::JavaScriptError, "boom").status(),
            Status::JavaScriptError
        );
    }

    #[tokio::test]
    async fn fn_handler_runs_against_session() {
        let registry = SessionRegistry::new();
        let session = registry.create(Default::default()).unwrap();
        let mut table = HandlerTable::new();
        table.register(
            "getTitle",
            handler_fn(|ctx, _cmd| Ok(Value::from(format!("title of {}", ctx.id())))),
        );

        let handler = table.get("getTitle").unwrap();
        let mut ctx = session.lock().await;
        let value = handler
            .handle(&mut ctx, &Command::new("getTitle"))
            .await
            .unwrap();
        assert_eq!(value, Value::from(format!("title of {}", session.id)));
        assert!(table.get("getUrl").is_none());
    }
}
