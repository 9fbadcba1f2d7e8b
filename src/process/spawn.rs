// src/process/spawn.rs

//! Spawning managed children and pumping their output back to the registry.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::debug;

use crate::process::registry::RegistryCommand;
use crate::process::state::{ExitKind, InstanceId};
use crate::types::CommandKey;

/// How long to keep draining pipes after the child itself exited. A
/// backgrounded grandchild may hold them open indefinitely.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 8 * 1024;

/// Everything needed to start one managed command.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub key: CommandKey,
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

/// Start the child as leader of a new process group, stdin closed, stdout and
/// stderr piped.
pub fn spawn_child(spec: &SpawnSpec) -> Result<Child> {
    let (program, args) = spec
        .argv
        .split_first()
        .ok_or_else(|| anyhow!("empty argv for {}", spec.key))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(&spec.cwd)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn()
        .with_context(|| format!("spawning {:?} in {:?}", spec.argv, spec.cwd))
}

/// Watch a registered child until it exits.
///
/// Output from both pipes is forwarded as [`RegistryCommand::Output`] in
/// arrival order; once the child exited and the pipes drained, a single
/// [`RegistryCommand::Exited`] follows.
pub fn supervise(
    mut child: Child,
    key: CommandKey,
    instance: InstanceId,
    registry_tx: mpsc::Sender<RegistryCommand>,
) {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let mut pumps = Vec::new();
    if let Some(stdout) = stdout {
        pumps.push(tokio::spawn(pump(stdout, key.clone(), instance, registry_tx.clone())));
    }
    if let Some(stderr) = stderr {
        pumps.push(tokio::spawn(pump(stderr, key.clone(), instance, registry_tx.clone())));
    }

    tokio::spawn(async move {
        let exit = match child.wait().await {
            Ok(status) => exit_kind(status),
            Err(e) => {
                debug!(command = %key, error = %e, "waiting for child failed");
                ExitKind::Unknown
            }
        };

        // A reader still blocked after the deadline belongs to a descendant
        // that outlived the child; its output must not reach a later instance.
        let deadline = tokio::time::Instant::now() + PIPE_DRAIN_TIMEOUT;
        for mut pump in pumps {
            if tokio::time::timeout_at(deadline, &mut pump).await.is_err() {
                debug!(command = %key, instance, "pipe still open after exit; dropping it");
                pump.abort();
            }
        }

        let _ = registry_tx
            .send(RegistryCommand::Exited {
                key,
                instance,
                exit,
            })
            .await;
    });
}

async fn pump<R>(
    mut reader: R,
    key: CommandKey,
    instance: InstanceId,
    registry_tx: mpsc::Sender<RegistryCommand>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut carry = Vec::new();

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(command = %key, instance, error = %e, "pipe read failed");
                break;
            }
        };

        let chunk = decode_utf8(&mut carry, &buf[..n]);
        if chunk.is_empty() {
            continue;
        }
        let sent = registry_tx
            .send(RegistryCommand::Output {
                key: key.clone(),
                chunk,
            })
            .await;
        if sent.is_err() {
            return;
        }
    }

    if !carry.is_empty() {
        let chunk = String::from_utf8_lossy(&carry).into_owned();
        let _ = registry_tx.send(RegistryCommand::Output { key, chunk }).await;
    }
}

/// Decode as much of `carry + bytes` as possible.
///
/// An incomplete multi-byte sequence at the end stays in `carry` for the next
/// read; invalid bytes become U+FFFD.
pub fn decode_utf8(carry: &mut Vec<u8>, bytes: &[u8]) -> String {
    carry.extend_from_slice(bytes);
    let mut out = String::new();

    loop {
        match std::str::from_utf8(carry) {
            Ok(s) => {
                out.push_str(s);
                carry.clear();
                break;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&carry[..valid]));
                match e.error_len() {
                    None => {
                        carry.drain(..valid);
                        break;
                    }
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        carry.drain(..valid + bad);
                    }
                }
            }
        }
    }

    out
}

fn exit_kind(status: std::process::ExitStatus) -> ExitKind {
    if let Some(code) = status.code() {
        return ExitKind::Code(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return ExitKind::Signal(sig);
        }
    }

    ExitKind::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_multibyte_sequence_is_carried() {
        let bytes = "é→".as_bytes();
        let mut carry = Vec::new();

        assert_eq!(decode_utf8(&mut carry, &bytes[..1]), "");
        assert_eq!(carry.len(), 1);
        assert_eq!(decode_utf8(&mut carry, &bytes[1..3]), "é");
        assert_eq!(decode_utf8(&mut carry, &bytes[3..]), "→");
        assert!(carry.is_empty());
    }

    #[test]
    fn invalid_bytes_are_replaced() {
        let mut carry = Vec::new();
        assert_eq!(decode_utf8(&mut carry, b"ok\xffok"), "ok\u{FFFD}ok");
        assert!(carry.is_empty());
    }
}
