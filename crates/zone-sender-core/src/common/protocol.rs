//! Message shapes exchanged with the queue server.
//!
//! Outbound requests are flat JSON objects:
//!
//! ```json
//! { "req": 7, "cmd": "GET", "zone": "default" }
//! ```
//!
//! Inbound responses echo the `req` of the request they answer and carry
//! either an `error` or a `response`:
//!
//! ```json
//! { "req": 7, "response": { "id": "18f...", "seq": "001" } }
//! { "req": 8, "error": "Lock expired" }
//! ```
//!
//! The handshake is the only outbound message without a `req`.

use crate::{error::CommandError, types::RequestId};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Outcome of one correlated request: the response payload (absent for void
/// results) or the reason it failed.
pub type Reply = Result<Option<Value>, CommandError>;

/// An outbound request before it has been assigned a correlation id.
///
/// A command is an action tag plus an open set of action-specific fields. The
/// `req` and `cmd` keys are owned by the framing and always win over a field
/// of the same name.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    action: String,
    fields: Map<String, Value>,
}

impl Command {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            fields: Map::new(),
        }
    }

    /// Adds an action-specific field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Produces the wire frame for this command tagged with `req`.
    pub fn into_frame(self, req: RequestId) -> Value {
        let mut body = self.fields;
        body.insert("req".to_owned(), Value::from(req));
        body.insert("cmd".to_owned(), Value::String(self.action));
        Value::Object(body)
    }
}

impl From<&str> for Command {
    fn from(action: &str) -> Self {
        Self::new(action)
    }
}

impl From<String> for Command {
    fn from(action: String) -> Self {
        Self::new(action)
    }
}

/// The handshake announcing this process to the queue server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hello {
    /// Zone served by this process.
    pub zone: String,
    /// Client identity of this process.
    pub id: String,
}

impl Hello {
    pub const ACTION: &'static str = "HELLO";

    pub fn new(zone: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            id: id.into(),
        }
    }

    pub fn into_frame(self) -> Value {
        let mut body = Map::new();
        body.insert("cmd".to_owned(), Value::from(Self::ACTION));
        body.insert("zone".to_owned(), Value::String(self.zone));
        body.insert("id".to_owned(), Value::String(self.id));
        Value::Object(body)
    }
}

/// An inbound message from the queue server.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Response {
    /// Correlation id of the request being answered. Messages without one are
    /// not answers and are ignored by the command channel.
    #[serde(default)]
    pub req: Option<RequestId>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub response: Option<Value>,
}

impl Response {
    pub fn ok(req: RequestId, response: impl Into<Value>) -> Self {
        Self {
            req: Some(req),
            error: None,
            response: Some(response.into()),
        }
    }

    pub fn rejected(req: RequestId, error: impl Into<Value>) -> Self {
        Self {
            req: Some(req),
            error: Some(error.into()),
            response: None,
        }
    }

    /// Derives the caller-facing outcome.
    ///
    /// An `error` only counts when it is truthy (`null`, `false`, `0` and the
    /// empty string are treated as "no error"). On success a JSON `null`
    /// response is reported as absent.
    pub fn into_reply(self) -> Reply {
        match self.error {
            Some(error) if is_truthy(&error) => Err(CommandError::Rejected(error)),
            _ => Ok(self.response.filter(|value| !value.is_null())),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_carries_req_and_cmd_alongside_fields() {
        let frame = Command::new("DEFER")
            .with("id", "18f2a")
            .with("ttl", 60_000)
            .into_frame(12);
        assert_eq!(
            frame,
            json!({"req": 12, "cmd": "DEFER", "id": "18f2a", "ttl": 60_000})
        );
    }

    #[test]
    fn framing_keys_override_fields() {
        let frame = Command::new("GET")
            .with("req", 999)
            .with("cmd", "BOGUS")
            .into_frame(3);
        assert_eq!(frame, json!({"req": 3, "cmd": "GET"}));
    }

    #[test]
    fn hello_has_no_correlation_id() {
        let frame = Hello::new("us", "c0ffee").into_frame();
        assert_eq!(frame, json!({"cmd": "HELLO", "zone": "us", "id": "c0ffee"}));
        assert!(frame.get("req").is_none());
    }

    #[test]
    fn response_decodes_success_and_failure() {
        let ok: Response = serde_json::from_value(json!({"req": 7, "response": "ok"})).unwrap();
        assert_eq!(ok.into_reply(), Ok(Some(json!("ok"))));

        let err: Response =
            serde_json::from_value(json!({"req": 7, "error": "rejected"})).unwrap();
        assert_eq!(
            err.into_reply(),
            Err(CommandError::Rejected(json!("rejected")))
        );
    }

    #[test]
    fn void_and_null_responses_are_absent() {
        let void: Response = serde_json::from_value(json!({"req": 1})).unwrap();
        assert_eq!(void.into_reply(), Ok(None));

        let null: Response =
            serde_json::from_value(json!({"req": 1, "response": null})).unwrap();
        assert_eq!(null.into_reply(), Ok(None));
    }

    #[test]
    fn falsy_error_counts_as_success() {
        for error in [json!(null), json!(false), json!(0), json!("")] {
            let reply = Response {
                req: Some(4),
                error: Some(error),
                response: Some(json!(true)),
            }
            .into_reply();
            assert_eq!(reply, Ok(Some(json!(true))));
        }
    }

    #[test]
    fn error_wins_over_response() {
        let reply = Response {
            req: Some(4),
            error: Some(json!({"message": "locked"})),
            response: Some(json!("ignored")),
        }
        .into_reply();
        assert_eq!(
            reply,
            Err(CommandError::Rejected(json!({"message": "locked"})))
        );
    }
}
