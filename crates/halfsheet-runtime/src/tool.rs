//! External tool invocation with a timeout and cooperative cancellation.
//!
//! Used for PDF compression through qpdf. A child that outlives its timeout
//! or gets cancelled is killed together with every process it started: on
//! unix the child leads its own process group, which is sent `SIGKILL`; on
//! Windows `taskkill /T` walks the tree.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::cancel::CancelToken;

const QPDF: &str = "qpdf";

/// How long the availability check may take
const VERSION_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
    #[error("{program} was cancelled")]
    Cancelled { program: String },
    #[error("{program} exited with {}: {stderr}", exit_label(.code))]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("qpdf is not installed or not on PATH")]
    Unavailable,
    #[error("input file does not exist: {}", .0.display())]
    InputMissing(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

/// Captured result of a finished tool run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A program invocation
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<OsString>,
    timeout: Option<Duration>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Run `command` to completion, whatever its exit code.
///
/// The child's process tree is killed if the timeout expires or `cancel`
/// fires first.
pub async fn run_tool(command: &ToolCommand, cancel: &CancelToken) -> Result<ToolOutput, ToolError> {
    let program = command.program.clone();
    let mut process = Command::new(&command.program);
    process
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    process.process_group(0);

    let mut child = process.spawn().map_err(|source| ToolError::Spawn {
        program: program.clone(),
        source,
    })?;
    let pid = child.id();
    let stdout = tokio::spawn(read_pipe(child.stdout.take()));
    let stderr = tokio::spawn(read_pipe(child.stderr.take()));

    let timeout = command.timeout.unwrap_or(Duration::MAX);
    log::debug!("Running {program} {:?} (pid {pid:?})", command.args);

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        _ = tokio::time::sleep(timeout) => Outcome::TimedOut,
        _ = cancel.cancelled() => Outcome::Cancelled,
    };

    // The child is still unreaped here, so its pid still names the tree
    let status = match outcome {
        Outcome::Exited(status) => status?,
        Outcome::TimedOut => {
            log::warn!("{program} timed out after {timeout:?}; killing it");
            kill_tree(pid).await;
            let _ = child.kill().await;
            return Err(ToolError::TimedOut { program, timeout });
        }
        Outcome::Cancelled => {
            log::info!("{program} cancelled; killing it");
            kill_tree(pid).await;
            let _ = child.kill().await;
            return Err(ToolError::Cancelled { program });
        }
    };

    Ok(ToolOutput {
        code: status.code(),
        stdout: String::from_utf8_lossy(&stdout.await.unwrap_or_default()).into_owned(),
        stderr: String::from_utf8_lossy(&stderr.await.unwrap_or_default()).into_owned(),
    })
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            log::debug!("Reading tool output failed: {e}");
        }
    }
    buf
}

/// Kill the process group led by `pid`
#[cfg(unix)]
async fn kill_tree(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; it touches no memory of ours
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH: the whole group is already gone
        if err.raw_os_error() != Some(libc::ESRCH) {
            log::warn!("Cannot kill process group {pgid}: {err}");
        }
    }
}

#[cfg(windows)]
async fn kill_tree(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    let result = Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match result {
        Ok(status) if !status.success() => log::debug!("taskkill {pid} exited with {status}"),
        Ok(_) => {}
        Err(e) => log::warn!("Cannot run taskkill for {pid}: {e}"),
    }
}

#[cfg(not(any(unix, windows)))]
async fn kill_tree(_pid: Option<u32>) {}

/// Whether `qpdf --version` runs. Exit code 2 still counts: some builds
/// print the version and return it.
pub async fn qpdf_available() -> bool {
    let check = ToolCommand::new(QPDF).arg("--version").timeout(VERSION_TIMEOUT);
    match run_tool(&check, &CancelToken::new()).await {
        Ok(output) => matches!(output.code, Some(0) | Some(2)),
        Err(e) => {
            log::debug!("qpdf version check failed: {e}");
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressOptions {
    pub linearize: bool,
    pub timeout: Option<Duration>,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            linearize: true,
            timeout: None,
        }
    }
}

/// qpdf arguments for rewriting `input` into `output`
pub fn qpdf_args(input: &Path, output: &Path, linearize: bool) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::with_capacity(5);
    if linearize {
        args.push("--linearize".into());
    }
    args.push("--object-streams=generate".into());
    args.push("--recompress-flate".into());
    args.push(input.as_os_str().to_owned());
    args.push(output.as_os_str().to_owned());
    args
}

/// Shrink a PDF with qpdf, creating the output directory if needed
pub async fn compress_pdf(
    input: &Path,
    output: &Path,
    options: CompressOptions,
    cancel: &CancelToken,
) -> Result<(), ToolError> {
    if !tokio::fs::try_exists(input).await? {
        return Err(ToolError::InputMissing(input.to_owned()));
    }
    if !qpdf_available().await {
        return Err(ToolError::Unavailable);
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut command = ToolCommand::new(QPDF).args(qpdf_args(input, output, options.linearize));
    if let Some(timeout) = options.timeout {
        command = command.timeout(timeout);
    }

    let result = run_tool(&command, cancel).await?;
    if !result.success() {
        return Err(ToolError::Failed {
            program: QPDF.to_string(),
            code: result.code,
            stderr: result.stderr.trim().to_string(),
        });
    }
    log::info!("Compressed {} → {}", input.display(), output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qpdf_args_with_linearize() {
        let args = qpdf_args(Path::new("in.pdf"), Path::new("out.pdf"), true);
        assert_eq!(
            args,
            ["--linearize", "--object-streams=generate", "--recompress-flate", "in.pdf", "out.pdf"]
                .map(OsString::from)
        );
    }

    #[test]
    fn test_qpdf_args_without_linearize() {
        let args = qpdf_args(Path::new("in.pdf"), Path::new("out.pdf"), false);
        assert_eq!(args[0], OsString::from("--object-streams=generate"));
        assert_eq!(args.len(), 4);
    }

    #[tokio::test]
    async fn test_missing_input_is_reported_first() {
        let err = compress_pdf(
            Path::new("/definitely/not/here.pdf"),
            Path::new("/tmp/out.pdf"),
            CompressOptions::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::InputMissing(_)));
    }
}
