//! JSON Wire Protocol envelope and status codes.
//!
//! Every reply is a JSON object with exactly three keys:
//!
//! ```text
//! {"sessionId": <string>, "status": <int>, "value": <any>}
//! ```
//!
//! `status` is a WebDriver status code, `0` meaning success. Error replies
//! carry `{"message": ...}` in `value`.

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// WebDriver status codes used by the JSON Wire Protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Status {
    Success = 0,
    NoSuchDriver = 6,
    NoSuchElement = 7,
    NoSuchFrame = 8,
    UnknownCommand = 9,
    StaleElementReference = 10,
    ElementNotVisible = 11,
    InvalidElementState = 12,
    UnknownError = 13,
    ElementIsNotSelectable = 15,
    JavaScriptError = 17,
    XPathLookupError = 19,
    Timeout = 21,
    NoSuchWindow = 23,
    InvalidCookieDomain = 24,
    UnableToSetCookie = 25,
    UnexpectedAlertOpen = 26,
    NoAlertOpen = 27,
    ScriptTimeout = 28,
    InvalidElementCoordinates = 29,
    ImeNotAvailable = 30,
    ImeEngineActivationFailed = 31,
    InvalidSelector = 32,
    SessionNotCreated = 33,
    MoveTargetOutOfBounds = 34,
}

impl Status {
    /// The integer carried on the wire.
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        let status = match code {
            0 => Self::Success,
            6 => Self::NoSuchDriver,
            7 => Self::NoSuchElement,
            8 => Self::NoSuchFrame,
            9 => Self::UnknownCommand,
            10 => Self::StaleElementReference,
            11 => Self::ElementNotVisible,
            12 => Self::InvalidElementState,
            13 => Self::UnknownError,
            15 => Self::ElementIsNotSelectable,
            17 => Self::JavaScriptError,
            19 => Self::XPathLookupError,
            21 => Self::Timeout,
            23 => Self::NoSuchWindow,
            24 => Self::InvalidCookieDomain,
            25 => Self::UnableToSetCookie,
            26 => Self::UnexpectedAlertOpen,
            27 => Self::NoAlertOpen,
            28 => Self::ScriptTimeout,
            29 => Self::InvalidElementCoordinates,
            30 => Self::ImeNotAvailable,
            31 => Self::ImeEngineActivationFailed,
            32 => Self::InvalidSelector,
            33 => Self::SessionNotCreated,
            34 => Self::MoveTargetOutOfBounds,
            _ => return None,
        };
        Some(status)
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// The `{sessionId, status, value}` reply envelope.
///
/// `status` stays a plain integer so envelopes from other drivers with codes
/// outside [`Status`] still deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "sessionId", default, deserialize_with = "null_as_empty")]
    pub session_id: String,
    #[serde(default)]
    pub status: u32,
    #[serde(default)]
    pub value: Value,
}

/// Older drivers send `"sessionId": null` before a session exists.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Response {
    pub fn success(session_id: impl Into<String>, value: Value) -> Self {
        Self {
            session_id: session_id.into(),
            status: Status::Success.code(),
            value,
        }
    }

    /// An error envelope with `{"message": ...}` as its value.
    pub fn error(session_id: impl Into<String>, status: Status, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            status: status.code(),
            value: serde_json::json!({ "message": message.into() }),
        }
    }

    /// The typed status, if the code is one this crate knows.
    pub fn status(&self) -> Option<Status> {
        Status::from_code(self.status)
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success.code()
    }

    /// The `message` field of an error value, if present.
    pub fn message(&self) -> Option<&str> {
        self.value.get("message").and_then(Value::as_str)
    }

    /// Serialize to UTF-8 JSON bytes.
    pub fn to_bytes(&self) -> Bytes {
        match serde_json::to_vec(self) {
            Ok(buf) => Bytes::from(buf),
            Err(e) => {
                // Only reachable with a non-string map key smuggled into `value`.
                tracing::error!(?e, "failed to serialize response envelope");
                Bytes::from_static(
                    br#"{"sessionId":"","status":13,"value":{"message":"failed to serialize response"}}"#,
                )
            }
        }
    }

    /// Parse an envelope received from another driver.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_exactly_three_keys() {
        let resp = Response::success("abc", json!({"title": "x"}));
        let json: Value = serde_json::from_slice(&resp.to_bytes()).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert_eq!(obj["sessionId"], "abc");
        assert_eq!(obj["status"], 0);
        assert_eq!(obj["value"]["title"], "x");
    }

    #[test]
    fn null_value_is_serialized_not_omitted() {
        let resp = Response::success("", Value::Null);
        let json: Value = serde_json::from_slice(&resp.to_bytes()).unwrap();
        assert!(json.as_object().unwrap().contains_key("value"));
        assert!(json["value"].is_null());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let resp = Response::from_slice(br#"{}"#).unwrap();
        assert_eq!(resp.session_id, "");
        assert_eq!(resp.status, 0);
        assert!(resp.value.is_null());
    }

    #[test]
    fn null_session_id_reads_as_empty() {
        let resp = Response::from_slice(br#"{"sessionId":null,"status":13,"value":{"message":"boom"}}"#)
            .unwrap();
        assert_eq!(resp.session_id, "");
        assert_eq!(resp.status(), Some(Status::UnknownError));
        assert_eq!(resp.message(), Some("boom"));
    }

    #[test]
    fn unknown_status_code_survives() {
        let resp = Response::from_slice(br#"{"sessionId":"s","status":405,"value":null}"#).unwrap();
        assert_eq!(resp.status, 405);
        assert_eq!(resp.status(), None);
    }

    #[test]
    fn envelopes_round_trip() {
        let samples = [
            Response::success("", Value::Null),
            Response::success("s-1", json!([1, "two", {"three": 3.5}])),
            Response::success("s-2", json!("scalar")),
            Response::error("s-3", Status::StaleElementReference, "element is stale"),
        ];
        for resp in samples {
            let back = Response::from_slice(&resp.to_bytes()).unwrap();
            assert_eq!(back, resp);
        }
    }

    #[test]
    fn finite_floats_round_trip_exactly() {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let mut checked = 0;
        while checked < 20_000 {
            let f = f64::from_bits(rng.gen::<u64>());
            if !f.is_finite() {
                continue;
            }
            let resp = Response::success("s", json!(f));
            let back = Response::from_slice(&resp.to_bytes()).unwrap();
            assert_eq!(back, resp, "{f:e}");
            checked += 1;
        }
    }

    #[test]
    fn status_codes_map_both_ways() {
        for code in 0..64 {
            if let Some(status) = Status::from_code(code) {
                assert_eq!(status.code(), code);
            }
        }
        assert_eq!(Status::UnknownCommand.code(), 9);
        assert_eq!(Status::InvalidSelector.code(), 32);
        assert!(Status::from_code(1).is_none());
    }
}
