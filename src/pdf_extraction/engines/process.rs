// Bounded execution of external extraction tools
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::types::EngineError;

/// Run `program args…`, returning stdout. A child still running at the
/// deadline is killed and reported as a timeout.
pub async fn run_tool(program: &Path, args: &[&str], timeout: Duration) -> Result<Vec<u8>, EngineError> {
    debug!(program = %program.display(), ?args, "spawning extraction tool");
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| EngineError::Unavailable(format!("failed to spawn {}: {err}", program.display())))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| EngineError::TimedOut(timeout))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EngineError::Failed(format!(
            "{} failed (exit {}): {}",
            program.display(),
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }
    Ok(output.stdout)
}
