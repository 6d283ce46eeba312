pub mod registry;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::{self, JoinHandle};

pub use registry::{ProcessRegistry, Registration};

pub const STDERR_SEPARATOR: &str = "\n--- STDERR ---\n";

// how long pipe readers may keep draining after the child is gone; a
// grandchild that inherited the pipe would otherwise hold it open
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// One external tool run against one target.
#[derive(Clone, Debug)]
pub struct ToolInvocation {
    pub tool: String,
    pub program: String,
    pub args: Vec<String>,
    /// Base URL, host or domain the tool was pointed at.
    pub target: String,
    pub output_path: Option<PathBuf>,
    pub timeout: Duration,
    pub shell: bool,
}

impl ToolInvocation {
    pub fn new(
        tool: impl Into<String>,
        program: impl Into<String>,
        args: Vec<String>,
        target: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            tool: tool.into(),
            program: program.into(),
            args,
            target: target.into(),
            output_path: None,
            timeout,
            shell: false,
        }
    }

    /// Runs `script` through `sh -c`. Only for tools that need pipes or
    /// redirection.
    pub fn shell(
        tool: impl Into<String>,
        script: impl Into<String>,
        target: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            tool: tool.into(),
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.into()],
            target: target.into(),
            output_path: None,
            timeout,
            shell: true,
        }
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(char::is_whitespace) {
                line.push_str(&format!("'{arg}'"));
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<i32>,
    pub truncated_by_timeout: bool,
}

impl RawResult {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines()
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to launch {tool} ({program}): {source}")]
    Launch {
        tool: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} timed out after {seconds}s")]
    Timeout {
        tool: String,
        seconds: u64,
        partial: RawResult,
    },

    #[error("{tool} was interrupted")]
    Interrupted { tool: String, partial: RawResult },

    #[error("failed waiting on {tool}: {source}")]
    Wait {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    /// Output captured before the process was stopped, if any.
    pub fn partial(&self) -> Option<&RawResult> {
        match self {
            ProcessError::Timeout { partial, .. } | ProcessError::Interrupted { partial, .. } => {
                Some(partial)
            }
            _ => None,
        }
    }
}

type SharedBuf = Arc<Mutex<Vec<u8>>>;

fn spawn_pipe_reader<R>(pipe: Option<R>, sink: SharedBuf) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    task::spawn(async move {
        let Some(mut pipe) = pipe else {
            return;
        };
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .extend_from_slice(&chunk[..n]),
            }
        }
    })
}

async fn drain(reader: JoinHandle<()>) {
    let abort = reader.abort_handle();
    if tokio::time::timeout(PIPE_DRAIN_GRACE, reader).await.is_err() {
        abort.abort();
    }
}

fn take_text(buf: &SharedBuf) -> String {
    let bytes = buf.lock().unwrap_or_else(|p| p.into_inner());
    String::from_utf8_lossy(&bytes).to_string()
}

enum Exit {
    Finished(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Interrupted,
}

/// Runs one invocation to completion or until its timeout elapses.
///
/// A non-zero exit status is not an error: the result records it and the
/// caller decides how loud to be. On timeout or interrupt the child is
/// killed and whatever it printed so far travels in the error. The output
/// file, when configured, is written in every case where the process ran.
pub async fn execute(
    invocation: &ToolInvocation,
    registry: &ProcessRegistry,
) -> Result<RawResult, ProcessError> {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if invocation.shell {
        // keep `sh -c` scripts out of the terminal's foreground group; the
        // registry is what stops them
        #[cfg(unix)]
        cmd.process_group(0);
        tracing::debug!(tool = %invocation.tool, "running through sh -c");
    }

    let mut child = cmd.spawn().map_err(|source| ProcessError::Launch {
        tool: invocation.tool.clone(),
        program: invocation.program.clone(),
        source,
    })?;
    let registration = registry.register(&invocation.tool);
    tracing::debug!(tool = %invocation.tool, command = %invocation.command_line(), "spawned");

    let stdout_buf: SharedBuf = Arc::default();
    let stderr_buf: SharedBuf = Arc::default();
    let stdout_reader = spawn_pipe_reader(child.stdout.take(), stdout_buf.clone());
    let stderr_reader = spawn_pipe_reader(child.stderr.take(), stderr_buf.clone());

    let exit = tokio::select! {
        status = child.wait() => Exit::Finished(status),
        _ = tokio::time::sleep(invocation.timeout) => Exit::TimedOut,
        _ = registration.token().cancelled() => Exit::Interrupted,
    };

    if !matches!(exit, Exit::Finished(_)) {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
    drop(registration);

    drain(stdout_reader).await;
    drain(stderr_reader).await;

    let mut raw = RawResult {
        stdout: take_text(&stdout_buf),
        stderr: take_text(&stderr_buf),
        exit_status: None,
        truncated_by_timeout: false,
    };

    let outcome = match exit {
        Exit::Finished(Ok(status)) => {
            raw.exit_status = status.code();
            Ok(raw.clone())
        }
        Exit::Finished(Err(source)) => Err(ProcessError::Wait {
            tool: invocation.tool.clone(),
            source,
        }),
        Exit::TimedOut => {
            raw.truncated_by_timeout = true;
            Err(ProcessError::Timeout {
                tool: invocation.tool.clone(),
                seconds: invocation.timeout.as_secs(),
                partial: raw.clone(),
            })
        }
        Exit::Interrupted => Err(ProcessError::Interrupted {
            tool: invocation.tool.clone(),
            partial: raw.clone(),
        }),
    };

    if let Some(path) = invocation.output_path.as_deref() {
        if let Err(e) = write_output_file(path, &raw).await {
            tracing::warn!(tool = %invocation.tool, path = %path.display(), "could not write tool output: {e}");
        }
    }

    outcome
}

pub fn render_output(raw: &RawResult) -> String {
    let mut contents = raw.stdout.clone();
    if !raw.stderr.trim().is_empty() {
        contents.push_str(STDERR_SEPARATOR);
        contents.push_str(&raw.stderr);
    }
    contents
}

pub async fn write_output_file(path: &Path, raw: &RawResult) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, render_output(raw)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_stderr_and_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("tool.txt");
        let inv = ToolInvocation::shell(
            "fake",
            "echo found; echo oops >&2; exit 3",
            "https://x.com",
            Duration::from_secs(5),
        )
        .with_output(&out);
        let raw = execute(&inv, &ProcessRegistry::new()).await.unwrap();
        assert_eq!(raw.stdout.trim(), "found");
        assert_eq!(raw.stderr.trim(), "oops");
        assert_eq!(raw.exit_status, Some(3));
        assert!(!raw.success());

        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written, "found\n\n--- STDERR ---\noops\n");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn shell_scripts_lead_their_own_process_group() {
        let script = r#"[ "$(cut -d' ' -f5 /proc/$$/stat)" = "$$" ] && echo isolated || echo shared"#;
        let inv = ToolInvocation::shell("fake", script, "https://x.com", Duration::from_secs(5));
        let raw = execute(&inv, &ProcessRegistry::new()).await.unwrap();
        assert_eq!(raw.stdout.trim(), "isolated");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_and_keeps_partial_output() {
        let registry = ProcessRegistry::new();
        let inv = ToolInvocation::shell(
            "sleepy",
            "echo early; sleep 30",
            "t",
            Duration::from_millis(300),
        );
        let started = Instant::now();
        let err = execute(&inv, &registry).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            ProcessError::Timeout { partial, .. } => {
                assert!(partial.truncated_by_timeout);
                assert_eq!(partial.stdout.trim(), "early");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_failure() {
        let inv = ToolInvocation::new(
            "ghost",
            "reconductor-no-such-binary",
            vec![],
            "t",
            Duration::from_secs(1),
        );
        let err = execute(&inv, &ProcessRegistry::new()).await.unwrap_err();
        assert!(matches!(err, ProcessError::Launch { .. }));
        assert!(err.partial().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interrupt_terminates_running_child() {
        let registry = ProcessRegistry::new();
        let inv = ToolInvocation::shell("long", "sleep 30", "t", Duration::from_secs(60));
        let reg = registry.clone();
        let killer = tokio::spawn(async move {
            while reg.is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            reg.terminate_all()
        });
        let err = execute(&inv, &registry).await.unwrap_err();
        assert!(matches!(err, ProcessError::Interrupted { .. }));
        assert_eq!(killer.await.unwrap(), 1);
    }

    #[test]
    fn command_line_quotes_whitespace() {
        let inv = ToolInvocation::new(
            "ffuf",
            "ffuf",
            vec!["-H".into(), "User-Agent: x".into()],
            "t",
            Duration::from_secs(1),
        );
        assert_eq!(inv.command_line(), "ffuf -H 'User-Agent: x'");
    }
}
