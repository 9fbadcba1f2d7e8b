// src/control/dispatch.rs

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::control::protocol::{Call, Response, ServerFrame, WireError, decode_call};
use crate::errors::RunnerError;
use crate::process::RegistryHandle;

/// Execute one call against the registry.
pub async fn dispatch(registry: &RegistryHandle, call: Call) -> Result<Value, WireError> {
    match call {
        Call::List => to_value(registry.list()),
        Call::RunCommand { source, command } => {
            to_value(registry.run_command(&source, &command).await.map_err(wire)?)
        }
        Call::StopCommand { source, command } => {
            to_value(registry.stop_command(&source, &command).await.map_err(wire)?)
        }
        Call::GetBuffer { source } => to_value(registry.get_buffer(&source).await.map_err(wire)?),
        Call::IsRunning { source, command } => {
            to_value(registry.is_running(&source, &command).await.map_err(wire)?)
        }
    }
}

/// Decode a text frame, run it, and encode the response frame.
pub async fn handle_text(registry: &RegistryHandle, text: &str) -> String {
    let response = match decode_call(text) {
        Ok((id, call)) => {
            debug!(?id, ?call, "control call");
            match dispatch(registry, call).await {
                Ok(result) => Response::ok(id, result),
                Err(error) => Response::err(id, error),
            }
        }
        Err((id, error)) => {
            debug!(?id, message = %error.message, "rejected control frame");
            Response::err(id, error)
        }
    };
    ServerFrame::Response(response).encode()
}

fn wire(err: RunnerError) -> WireError {
    WireError::from(&err)
}

fn to_value<T: Serialize>(value: T) -> Result<Value, WireError> {
    serde_json::to_value(value).map_err(|e| WireError::internal(e.to_string()))
}
