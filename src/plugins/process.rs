//! Subprocess transport
//!
//! Runs a plugin's entry point, passes the request as JSON on stdin and
//! expects a single JSON payload on stdout.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::connection::PeerTransport;
use super::types::{Capability, PeerFailure, PeerTarget};

/// Request written to a plugin's stdin
#[derive(Debug, Serialize)]
struct PeerRequest<'a> {
    capability: &'a str,
    plugin_id: &'a str,
}

/// Transport that runs each plugin's entry point as a child process
#[derive(Debug, Clone)]
pub struct ProcessTransport {
    capability: Capability,
}

impl ProcessTransport {
    /// Create a transport that asks plugins for `capability`
    #[must_use]
    pub const fn new(capability: Capability) -> Self {
        Self { capability }
    }
}

#[async_trait]
impl PeerTransport for ProcessTransport {
    async fn open(&self, target: &PeerTarget) -> Result<serde_json::Value, PeerFailure> {
        let entry = target.entry_path().ok_or_else(|| {
            PeerFailure::Unreachable(format!("plugin '{}' declares no entry point", target.id))
        })?;

        let request = serde_json::to_string(&PeerRequest {
            capability: self.capability.as_str(),
            plugin_id: &target.id,
        })
        .map_err(|e| PeerFailure::Unknown(format!("failed to serialize request: {e}")))?;

        let (program, mut args) = determine_executor(&entry)?;
        args.extend(target.args.iter().cloned());

        // Aborting the owning task drops the child, which kills it
        let mut child = Command::new(&program)
            .args(&args)
            .current_dir(&target.location)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PeerFailure::Unreachable(format!("failed to spawn plugin: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            // Plugins that answer without reading the request close stdin early
            if let Err(e) = stdin.write_all(request.as_bytes()).await
                && e.kind() != std::io::ErrorKind::BrokenPipe
            {
                return Err(PeerFailure::Unknown(format!(
                    "failed to write to plugin stdin: {e}"
                )));
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PeerFailure::Unknown(format!("plugin execution failed: {e}")))?;

        if !output.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!(plugin_id = %target.id, stderr = %stderr, "plugin stderr");
        }

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            return Err(PeerFailure::Rejected(format!("plugin exited with code {code}")));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Err(PeerFailure::ProtocolMismatch(
                "plugin produced no output".to_string(),
            ));
        }

        serde_json::from_str(&stdout)
            .map_err(|e| PeerFailure::ProtocolMismatch(format!("invalid plugin output: {e}")))
    }
}

/// Determine how to execute the entry point based on its extension
fn determine_executor(entry: &Path) -> Result<(String, Vec<String>), PeerFailure> {
    let extension = entry.extension().and_then(|e| e.to_str()).unwrap_or("");

    let path_str = entry
        .to_str()
        .ok_or_else(|| PeerFailure::Unreachable("entry path is not valid UTF-8".to_string()))?
        .to_string();

    match extension {
        "py" => Ok(("python3".to_string(), vec![path_str])),
        "js" => Ok(("node".to_string(), vec![path_str])),
        "ts" => Ok(("bun".to_string(), vec!["run".to_string(), path_str])),
        "rb" => Ok(("ruby".to_string(), vec![path_str])),
        "sh" => Ok(("bash".to_string(), vec![path_str])),
        "" => Ok((path_str, vec![])),
        _ => Err(PeerFailure::Unreachable(format!(
            "unknown entry extension: .{extension}"
        ))),
    }
}
