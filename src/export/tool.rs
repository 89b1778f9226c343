//! Child-process plumbing for the external toolchain.

use crate::error::MonogramError;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Longest diagnostic text attached to a tool failure, in bytes.
const MAX_DIAGNOSTICS: usize = 8 * 1024;

/// Locate `program` on `PATH`, or check it directly when it contains a
/// path separator.
pub fn resolve_tool(program: &str) -> Result<PathBuf, MonogramError> {
    let unavailable = || MonogramError::ToolUnavailable {
        tool: program.to_string(),
    };

    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return is_executable(candidate)
            .then(|| candidate.to_path_buf())
            .ok_or_else(unavailable);
    }

    let path_var = std::env::var_os("PATH").ok_or_else(unavailable)?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|p| is_executable(p))
        .ok_or_else(unavailable)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

/// Run a tool inside `cwd`, killing it once `timeout` elapses.
///
/// A non-zero exit becomes [`MonogramError::ToolFailed`] carrying the tool's
/// stderr and stdout.
pub async fn run_tool<I, S>(
    tool: &str,
    program: &Path,
    args: I,
    cwd: &Path,
    timeout: Duration,
) -> Result<Output, MonogramError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                MonogramError::ToolUnavailable {
                    tool: tool.to_string(),
                }
            }
            _ => MonogramError::Internal(format!("Failed to start {tool}: {e}")),
        })?;

    debug!("Started {} in {}", tool, cwd.display());

    // Dropping the wait future on timeout drops the child, which kills it.
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result
            .map_err(|e| MonogramError::Internal(format!("Failed to wait for {tool}: {e}")))?,
        Err(_) => {
            warn!("{} timed out after {}s", tool, timeout.as_secs());
            return Err(MonogramError::ToolTimeout {
                tool: tool.to_string(),
                secs: timeout.as_secs(),
            });
        }
    };

    if !output.status.success() {
        return Err(MonogramError::ToolFailed {
            tool: tool.to_string(),
            diagnostics: diagnostics(&output),
        });
    }

    Ok(output)
}

/// Stderr then stdout, keeping the tail when too long.
///
/// TeX prints its errors to stdout near the end of the log.
fn diagnostics(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let text = [stderr.trim(), stdout.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if text.is_empty() {
        return format!("exited with {}", output.status);
    }
    if text.len() <= MAX_DIAGNOSTICS {
        return text;
    }

    let mut start = text.len() - MAX_DIAGNOSTICS;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn resolves_shell_from_path() {
        let sh = resolve_tool("sh").unwrap();
        assert!(sh.is_absolute());
    }

    #[test]
    fn missing_tool_is_unavailable() {
        let err = resolve_tool("monogram-no-such-tool").unwrap_err();
        assert!(matches!(err, MonogramError::ToolUnavailable { .. }));
        assert_eq!(err.status_code(), 503);

        let err = resolve_tool("/nonexistent/bin/pdflatex").unwrap_err();
        assert!(matches!(err, MonogramError::ToolUnavailable { .. }));
    }

    #[tokio::test]
    async fn failure_carries_output() {
        let dir = tempfile::tempdir().unwrap();
        let sh = resolve_tool("sh").unwrap();
        let err = run_tool(
            "sh",
            &sh,
            ["-c", "echo '! Undefined control sequence.'; echo oops >&2; exit 1"],
            dir.path(),
            Duration::from_secs(10),
        )
        .await
        .unwrap_err();

        match err {
            MonogramError::ToolFailed { tool, diagnostics } => {
                assert_eq!(tool, "sh");
                assert!(diagnostics.starts_with("oops"));
                assert!(diagnostics.contains("Undefined control sequence"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn hung_tool_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let sh = resolve_tool("sh").unwrap();
        let err = run_tool("sh", &sh, ["-c", "sleep 30"], dir.path(), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, MonogramError::ToolTimeout { .. }));
    }

    #[tokio::test]
    async fn runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sh = resolve_tool("sh").unwrap();
        run_tool("sh", &sh, ["-c", "echo hi > out.txt"], dir.path(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("out.txt")).unwrap(), "hi\n");
    }

    #[test]
    fn long_diagnostics_keep_the_tail() {
        use std::os::unix::process::ExitStatusExt;
        let output = Output {
            status: std::process::ExitStatus::from_raw(256),
            stdout: format!("{}END", "x".repeat(MAX_DIAGNOSTICS * 2)).into_bytes(),
            stderr: Vec::new(),
        };
        let d = diagnostics(&output);
        assert!(d.starts_with("..."));
        assert!(d.ends_with("END"));
        assert!(d.len() <= MAX_DIAGNOSTICS + 3);
    }
}
