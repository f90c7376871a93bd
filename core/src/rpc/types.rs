//! Request/response envelopes of the wire protocol

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::ProtocolError;

/// Revision of the command set, reported by `ping` and `capabilities`
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl Request {
    pub fn new(id: impl Into<String>, command: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args: match args {
                Value::Object(m) => m,
                _ => Map::new(),
            },
        }
    }

    /// Decodes the request envelope out of a frame.
    ///
    /// On failure, returns the request id when one could be recovered so the
    /// error response can echo it.
    pub fn from_frame(frame: Value) -> Result<Self, (Option<String>, ProtocolError)> {
        let Value::Object(mut obj) = frame else {
            return Err((None, ProtocolError::NotAnObject));
        };

        let id = match obj.remove("id") {
            Some(Value::String(s)) => s,
            None | Some(Value::Null) => return Err((None, ProtocolError::MissingId)),
            Some(_) => return Err((None, ProtocolError::InvalidId)),
        };

        let command = match obj.remove("command") {
            Some(Value::String(s)) if !s.is_empty() => s,
            _ => return Err((Some(id), ProtocolError::InvalidCommand)),
        };

        let args = match obj.remove("args") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(m)) => m,
            Some(_) => return Err((Some(id), ProtocolError::InvalidArgs)),
        };

        Ok(Self { id, command, args })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Option<String>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Response {
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: Some(id.into()),
            status: Status::Ok,
            result: Some(result),
            detail: None,
        }
    }

    pub fn error(id: Option<String>, detail: impl ToString) -> Self {
        Self {
            id,
            status: Status::Error,
            result: None,
            detail: Some(detail.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_ok() {
        let r = Request::from_frame(json!({"id": "1", "command": "ping"})).unwrap();
        assert_eq!(r.id, "1");
        assert_eq!(r.command, "ping");
        assert!(r.args.is_empty());

        let r = Request::from_frame(json!({"id": "2", "command": "x", "args": {"a": 1}})).unwrap();
        assert_eq!(r.args["a"], 1);
    }

    #[test]
    fn envelope_errors() {
        assert_eq!(
            Request::from_frame(json!([1, 2])),
            Err((None, ProtocolError::NotAnObject))
        );
        assert_eq!(
            Request::from_frame(json!({"command": "ping"})),
            Err((None, ProtocolError::MissingId))
        );
        assert_eq!(
            Request::from_frame(json!({"id": 5, "command": "ping"})),
            Err((None, ProtocolError::InvalidId))
        );
        assert_eq!(
            Request::from_frame(json!({"id": "a", "command": ""})),
            Err((Some("a".to_string()), ProtocolError::InvalidCommand))
        );
        assert_eq!(
            Request::from_frame(json!({"id": "a", "command": "ping", "args": [1]})),
            Err((Some("a".to_string()), ProtocolError::InvalidArgs))
        );
    }

    #[test]
    fn response_field_layout() {
        let ok = serde_json::to_string(&Response::ok("1", json!({"pong": true}))).unwrap();
        assert_eq!(ok, r#"{"id":"1","status":"ok","result":{"pong":true}}"#);

        let err = serde_json::to_string(&Response::error(None, "bad")).unwrap();
        assert_eq!(err, r#"{"id":null,"status":"error","detail":"bad"}"#);
    }
}
