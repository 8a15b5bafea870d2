//! Session-state commands answered without a browser backend.

use serde_json::Value;

use super::{handler_fn, Command, CommandError, CommandResult, HandlerTable};
use crate::session::SessionContext;

pub const GET_SESSION_CAPABILITIES: &str = "getSessionCapabilities";
pub const SET_TIMEOUTS: &str = "setTimeouts";
pub const IMPLICITLY_WAIT: &str = "implicitlyWait";
pub const SET_SCRIPT_TIMEOUT: &str = "setScriptTimeout";

pub(super) fn register(table: &mut HandlerTable) {
    table
        .register(GET_SESSION_CAPABILITIES, handler_fn(session_capabilities))
        .register(SET_TIMEOUTS, handler_fn(set_timeouts))
        .register(IMPLICITLY_WAIT, handler_fn(implicitly_wait))
        .register(SET_SCRIPT_TIMEOUT, handler_fn(set_script_timeout));
}

fn session_capabilities(session: &mut SessionContext, _command: &Command) -> CommandResult {
    Ok(Value::Object(session.capabilities().clone()))
}

/// Read `ms` as a non-negative integer. Clients commonly send whole numbers
/// as floats (`250.0`), so those are accepted too.
fn millis(command: &Command) -> Result<u64, CommandError> {
    let value: Value = command.param("ms")?;
    let invalid = || CommandError::InvalidParameter {
        name: "ms".to_string(),
        reason: format!("expected a non-negative integer, got {value}"),
    };
    if let Some(ms) = value.as_u64() {
        return Ok(ms);
    }
    match value.as_f64() {
        Some(ms) if ms >= 0.0 && ms.fract() == 0.0 && ms <= u64::MAX as f64 => Ok(ms as u64),
        _ => Err(invalid()),
    }
}

fn set_timeouts(session: &mut SessionContext, command: &Command) -> CommandResult {
    let kind: String = command.param("type")?;
    let ms = millis(command)?;
    match kind.as_str() {
        "implicit" => session.timeouts.implicit_wait_ms = ms,
        "script" => session.timeouts.script_timeout_ms = ms,
        "page load" | "pageLoad" => session.timeouts.page_load_timeout_ms = ms,
        other => {
            return Err(CommandError::InvalidParameter {
                name: "type".to_string(),
                reason: format!("unknown timeout type '{other}'"),
            })
        }
    }
    tracing::debug!(session = %session.id(), kind = %kind, ms, "timeout set");
    Ok(Value::Null)
}

fn implicitly_wait(session: &mut SessionContext, command: &Command) -> CommandResult {
    session.timeouts.implicit_wait_ms = millis(command)?;
    Ok(Value::Null)
}

fn set_script_timeout(session: &mut SessionContext, command: &Command) -> CommandResult {
    session.timeouts.script_timeout_ms = millis(command)?;
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Capabilities, SessionRegistry};
    use serde_json::json;

    async fn run(name: &str, body: Value) -> (CommandResult, crate::session::Timeouts) {
        let registry = SessionRegistry::new();
        let mut caps = Capabilities::new();
        caps.insert("browserName".into(), json!("fake"));
        let session = registry.create(caps).unwrap();
        let table = HandlerTable::with_builtins();
        let cmd = Command::new(name).with_body(body.as_object().cloned().unwrap_or_default());
        let mut ctx = session.lock().await;
        let result = table.get(name).unwrap().handle(&mut ctx, &cmd).await;
        (result, ctx.timeouts)
    }

    #[tokio::test]
    async fn capabilities_are_returned() {
        let (result, _) = run(GET_SESSION_CAPABILITIES, json!({})).await;
        assert_eq!(result.unwrap()["browserName"], "fake");
    }

    #[tokio::test]
    async fn implicit_wait_is_stored() {
        let (result, timeouts) = run(IMPLICITLY_WAIT, json!({"ms": 1500})).await;
        assert!(result.unwrap().is_null());
        assert_eq!(timeouts.implicit_wait_ms, 1500);
    }

    #[tokio::test]
    async fn whole_float_millis_are_accepted() {
        let (result, timeouts) = run(SET_SCRIPT_TIMEOUT, json!({"ms": 2000.0})).await;
        result.unwrap();
        assert_eq!(timeouts.script_timeout_ms, 2000);
    }

    #[tokio::test]
    async fn negative_millis_are_rejected() {
        let (result, timeouts) = run(IMPLICITLY_WAIT, json!({"ms": -1})).await;
        assert!(matches!(result, Err(CommandError::InvalidParameter { .. })));
        assert_eq!(timeouts.implicit_wait_ms, 0);
    }

    #[tokio::test]
    async fn typed_timeouts_route_by_type() {
        let (_, timeouts) = run(SET_TIMEOUTS, json!({"type": "page load", "ms": 10})).await;
        assert_eq!(timeouts.page_load_timeout_ms, 10);
        let (_, timeouts) = run(SET_TIMEOUTS, json!({"type": "script", "ms": 20})).await;
        assert_eq!(timeouts.script_timeout_ms, 20);
    }

    #[tokio::test]
    async fn unknown_timeout_type_is_rejected() {
        let (result, _) = run(SET_TIMEOUTS, json!({"type": "forever", "ms": 10})).await;
        let err = result.unwrap_err();
        assert!(err.is_bad_request());
        assert!(err.to_string().contains("forever"));
    }

    #[tokio::test]
    async fn missing_ms_is_reported() {
        let (result, _) = run(IMPLICITLY_WAIT, json!({})).await;
        assert!(matches!(result, Err(CommandError::MissingParameter(ref k)) if k == "ms"));
    }
}
