// src/process/events.rs

use serde::Serialize;

use crate::types::{CommandName, SourceName};

/// Events pushed to every connected observer.
///
/// Serialized with an `event` tag, e.g.
/// `{"event":"status","source":"server","command":"run","running":true}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ControlEvent {
    /// A chunk of interleaved stdout/stderr, or the final exit line.
    Data {
        source: SourceName,
        command: CommandName,
        chunk: String,
    },
    Status {
        source: SourceName,
        command: CommandName,
        running: bool,
    },
    Clear { source: SourceName },
}
