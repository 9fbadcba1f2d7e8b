// src/control/protocol.rs

//! JSON frames exchanged over the control socket.
//!
//! Client to server, one call per text frame:
//!
//! ```json
//! {"id": 1, "method": "runCommand", "params": {"source": "server", "command": "test"}}
//! ```
//!
//! Server to client:
//!
//! ```json
//! {"type": "response", "id": 1, "result": {"status": "started", "pid": 4242}}
//! {"type": "response", "id": 2, "error": {"kind": "sourceNotFound", "message": "Source nope not found"}}
//! {"type": "event", "event": "data", "source": "server", "command": "test", "chunk": "hello\n"}
//! ```
//!
//! The `id` is echoed verbatim and may be any JSON value.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RunnerError;
use crate::process::ControlEvent;
use crate::types::{CommandName, SourceName};

/// A decoded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List,
    RunCommand { source: SourceName, command: CommandName },
    StopCommand { source: SourceName, command: CommandName },
    GetBuffer { source: SourceName },
    IsRunning { source: SourceName, command: CommandName },
}

#[derive(Debug, Deserialize)]
struct RawCall {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct CommandParams {
    source: SourceName,
    command: CommandName,
}

#[derive(Debug, Deserialize)]
struct SourceParams {
    source: SourceName,
}

/// Decode one text frame into its id and call.
///
/// On failure the id is still returned when it could be read, so the error
/// response can be correlated.
pub fn decode_call(text: &str) -> Result<(Value, Call), (Value, WireError)> {
    let raw: RawCall = serde_json::from_str(text).map_err(|e| {
        let id = serde_json::from_str::<Value>(text)
            .ok()
            .and_then(|v| v.get("id").cloned())
            .unwrap_or(Value::Null);
        (id, WireError::invalid_frame(e.to_string()))
    })?;

    let call = match raw.method.as_str() {
        "list" => Ok(Call::List),
        "runCommand" => params::<CommandParams>(raw.params).map(|p| Call::RunCommand {
            source: p.source,
            command: p.command,
        }),
        "stopCommand" => params::<CommandParams>(raw.params).map(|p| Call::StopCommand {
            source: p.source,
            command: p.command,
        }),
        "getBuffer" => params::<SourceParams>(raw.params).map(|p| Call::GetBuffer { source: p.source }),
        "isRunning" => params::<CommandParams>(raw.params).map(|p| Call::IsRunning {
            source: p.source,
            command: p.command,
        }),
        other => Err(WireError::invalid_frame(format!("unknown method: {other}"))),
    };

    match call {
        Ok(call) => Ok((raw.id, call)),
        Err(err) => Err((raw.id, err)),
    }
}

fn params<T: DeserializeOwned>(params: Value) -> Result<T, WireError> {
    serde_json::from_value(params).map_err(|e| WireError::invalid_frame(format!("invalid params: {e}")))
}

/// Stable failure categories reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    SourceNotFound,
    CommandNotFound,
    SpawnFailed,
    InvalidFrame,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WireError {
    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InvalidFrame,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Internal,
            message: message.into(),
        }
    }
}

impl From<&RunnerError> for WireError {
    fn from(err: &RunnerError) -> Self {
        let kind = match err {
            RunnerError::SourceNotFound(_) => ErrorKind::SourceNotFound,
            RunnerError::CommandNotFound { .. } => ErrorKind::CommandNotFound,
            RunnerError::Spawn { .. } => ErrorKind::SpawnFailed,
            _ => ErrorKind::Internal,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: WireError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Everything the server writes to a socket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    Response(Response),
    Event(ControlEvent),
}

impl ServerFrame {
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            // Only reachable through a serializer bug; keep the socket usable.
            format!(r#"{{"type":"error","message":"encoding failed: {e}"}}"#)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_calls() {
        let (id, call) = decode_call(r#"{"id":7,"method":"runCommand","params":{"source":"api","command":"test"}}"#)
            .unwrap();
        assert_eq!(id, json!(7));
        assert_eq!(
            call,
            Call::RunCommand {
                source: "api".into(),
                command: "test".into()
            }
        );

        let (id, call) = decode_call(r#"{"id":"a","method":"list"}"#).unwrap();
        assert_eq!(id, json!("a"));
        assert_eq!(call, Call::List);
    }

    #[test]
    fn bad_frames_keep_their_id() {
        let (id, err) = decode_call(r#"{"id":3,"method":"explode"}"#).unwrap_err();
        assert_eq!(id, json!(3));
        assert_eq!(err.kind, ErrorKind::InvalidFrame);

        let (id, err) = decode_call(r#"{"id":4,"method":"getBuffer","params":{}}"#).unwrap_err();
        assert_eq!(id, json!(4));
        assert!(err.message.contains("source"), "{}", err.message);

        let (id, _) = decode_call("not json").unwrap_err();
        assert_eq!(id, Value::Null);
    }

    #[test]
    fn frames_are_tagged() {
        let event = ServerFrame::Event(ControlEvent::Status {
            source: "api".into(),
            command: "run".into(),
            running: true,
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "event", "event": "status", "source": "api", "command": "run", "running": true})
        );

        let err = RunnerError::SourceNotFound("nope".into());
        let response = ServerFrame::Response(Response::err(json!(2), WireError::from(&err)));
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"type": "response", "id": 2, "error": {"kind": "sourceNotFound", "message": "Source nope not found"}})
        );
    }
}
