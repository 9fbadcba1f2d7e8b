// src/control/mod.rs

//! Remote control plane: JSON calls and pushed events over a WebSocket.

pub mod dispatch;
pub mod protocol;
pub mod server;

pub use dispatch::{dispatch, handle_text};
pub use protocol::{Call, ErrorKind, Response, ServerFrame, WireError, decode_call};
pub use server::{bind, router, serve};
