//! External helper tools (xdelta3, ffmpeg, lz4).
//!
//! The installer ships with or expects three command-line helpers. Lookup
//! order: a `tools/` directory next to the executable, the executable's own
//! directory, then the system PATH.
//!
//! Subprocess stdout/stderr are always drained on their own threads before
//! waiting, so a chatty child can never deadlock on a full pipe buffer.

use anyhow::{bail, Context, Result};
use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Binary-patch helper
pub const XDELTA3: &str = "xdelta3";
/// Media-transcode helper
pub const FFMPEG: &str = "ffmpeg";
/// LZ4 frame decompressor
pub const LZ4: &str = "lz4";

/// Wall-clock limit for every media-tool invocation. The binary-patch tool
/// runs without a timeout.
pub const MEDIA_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Locate a helper binary by name.
pub fn find_tool(name: &str) -> Result<PathBuf> {
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let candidates = [exe_dir.join("tools").join(name), exe_dir.join(name)];
            for candidate in candidates {
                if candidate.is_file() {
                    debug!("Found {} at {}", name, candidate.display());
                    return Ok(candidate);
                }
            }
        }
    }

    if let Ok(path) = which::which(name) {
        debug!("Found {} on PATH: {}", name, path.display());
        return Ok(path);
    }

    bail!(
        "Helper tool '{}' not found. Place it in a tools/ directory next to \
         the installer or install it on the PATH.",
        name
    )
}

/// Captured output of a finished helper process.
pub struct ToolOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Stderr if non-empty, else stdout, else the exit code.
    pub fn failure_text(&self) -> String {
        if !self.stderr.trim().is_empty() {
            self.stderr.trim().to_string()
        } else if !self.stdout.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            format!("exit code {:?}", self.exit_code)
        }
    }
}

fn display_args(args: &[&OsStr]) -> String {
    args.iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn spawn_drained(program: &Path, args: &[&OsStr]) -> Result<(Child, DrainHandles)> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to execute {}", program.display()))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let drain = |stream: Option<Box<dyn Read + Send>>| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut stream) = stream {
                let _ = stream.read_to_end(&mut buf);
            }
            buf
        })
    };

    let handles = DrainHandles {
        stdout: drain(stdout.map(|s| Box::new(s) as Box<dyn Read + Send>)),
        stderr: drain(stderr.map(|s| Box::new(s) as Box<dyn Read + Send>)),
    };

    Ok((child, handles))
}

struct DrainHandles {
    stdout: std::thread::JoinHandle<Vec<u8>>,
    stderr: std::thread::JoinHandle<Vec<u8>>,
}

impl DrainHandles {
    fn join(self) -> (String, String) {
        let stdout = self.stdout.join().unwrap_or_default();
        let stderr = self.stderr.join().unwrap_or_default();
        (
            String::from_utf8_lossy(&stdout).into_owned(),
            String::from_utf8_lossy(&stderr).into_owned(),
        )
    }
}

/// Run a helper to completion with no time limit.
pub fn run_tool(program: &Path, args: &[&OsStr]) -> Result<ToolOutput> {
    debug!("Running {} {}", program.display(), display_args(args));
    let (mut child, handles) = spawn_drained(program, args)?;

    let status = child
        .wait()
        .with_context(|| format!("Failed to wait for {}", program.display()))?;
    let (stdout, stderr) = handles.join();

    Ok(ToolOutput {
        success: status.success(),
        exit_code: status.code(),
        stdout,
        stderr,
    })
}

/// Run a helper with a wall-clock limit. On expiry the child is killed and
/// an error is returned.
pub fn run_tool_with_timeout(
    program: &Path,
    args: &[&OsStr],
    timeout: Duration,
) -> Result<ToolOutput> {
    debug!(
        "Running {} {} (timeout {}s)",
        program.display(),
        display_args(args),
        timeout.as_secs()
    );
    let (mut child, handles) = spawn_drained(program, args)?;

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    warn!(
                        "{} exceeded {}s timeout, killing",
                        program.display(),
                        timeout.as_secs()
                    );
                    let _ = child.kill();
                    let _ = child.wait();
                    drop(handles.join());
                    bail!(
                        "{} timed out after {}s",
                        program.display(),
                        timeout.as_secs()
                    );
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                drop(handles.join());
                return Err(e)
                    .with_context(|| format!("Failed to wait for {}", program.display()));
            }
        }
    };

    let (stdout, stderr) = handles.join();
    Ok(ToolOutput {
        success: status.success(),
        exit_code: status.code(),
        stdout,
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh_args(script: &str) -> [&OsStr; 2] {
        [OsStr::new("-c"), OsStr::new(script)]
    }

    #[test]
    fn test_run_tool_captures_output() -> Result<()> {
        let sh = which::which("sh").expect("sh available");
        let out = run_tool(&sh, &sh_args("echo hi; echo oops >&2"))?;
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hi");
        assert_eq!(out.stderr.trim(), "oops");
        Ok(())
    }

    #[test]
    fn test_run_tool_nonzero_exit() -> Result<()> {
        let sh = which::which("sh").expect("sh available");
        let out = run_tool(&sh, &sh_args("echo broken >&2; exit 3"))?;
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.failure_text(), "broken");
        Ok(())
    }

    #[test]
    fn test_timeout_kills_child() {
        let sh = which::which("sh").expect("sh available");
        let started = Instant::now();
        let result = run_tool_with_timeout(&sh, &sh_args("sleep 30"), Duration::from_millis(200));
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_large_output_does_not_deadlock() -> Result<()> {
        // Well past the 64 KiB pipe buffer
        let sh = which::which("sh").expect("sh available");
        let out = run_tool_with_timeout(
            &sh,
            &sh_args("head -c 1000000 /dev/zero | tr '\\0' 'x'"),
            Duration::from_secs(20),
        )?;
        assert!(out.success);
        assert_eq!(out.stdout.len(), 1_000_000);
        Ok(())
    }
}
