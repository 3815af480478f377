//! Invocation of external runtime command-line tools.

use std::path::{Path, PathBuf};
use std::process::Command;

use boxexec_common::error::{BoxexecError, Result};

/// Resolves `binary` on `PATH`.
///
/// # Errors
///
/// Returns [`BoxexecError::NotFound`] if the binary is not installed.
pub fn locate(binary: &'static str) -> Result<PathBuf> {
    which::which(binary).map_err(|_| BoxexecError::NotFound {
        kind: "runtime CLI",
        id: binary.to_string(),
    })
}

/// Runs `binary` with `args` and returns its trimmed standard output.
///
/// # Errors
///
/// Returns [`BoxexecError::Io`] if the tool cannot be spawned, or
/// [`BoxexecError::ExternalTool`] carrying its standard error if it exits
/// unsuccessfully.
pub fn capture(tool: &'static str, binary: &Path, args: &[String]) -> Result<String> {
    tracing::debug!(tool, args = ?args, "invoking runtime CLI");
    let output = Command::new(binary)
        .args(args)
        .output()
        .map_err(|e| BoxexecError::Io {
            path: binary.to_path_buf(),
            source: e,
        })?;

    if !output.status.success() {
        return Err(BoxexecError::ExternalTool {
            tool,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
