use crate::error::{OpsError, Result};
use regex::Regex;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

/// Quote `value` as one POSIX shell word.
///
/// Everything goes inside single quotes; embedded quotes become `'\''`.
pub fn shell_escape(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Mask `--password='...'` so commands can be logged or printed.
pub fn redact(command: &str) -> String {
    static PASSWORD: OnceLock<Regex> = OnceLock::new();
    let re = PASSWORD.get_or_init(|| {
        Regex::new(r"--password='(?:[^']|'\\'')*'").expect("static regex")
    });
    re.replace_all(command, "--password='****'").into_owned()
}

/// Resolve `binary` on PATH or fail with `DependencyMissing`.
pub fn require_binary(binary: &str) -> Result<PathBuf> {
    which::which(binary).map_err(|_| OpsError::missing(binary))
}

pub fn has_binary(binary: &str) -> bool {
    which::which(binary).is_ok()
}

/// Exit status and captured output of one shell command.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    /// stdout followed by stderr
    pub output: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }
}

/// Runs a shell pipeline. Executors go through this seam so tests can stand
/// in for the real client binaries.
pub trait ProcessRunner {
    /// Fail with `DependencyMissing` unless `binary` can be executed.
    fn require(&self, binary: &str) -> Result<()> {
        require_binary(binary).map(|_| ())
    }

    fn run(
        &self,
        command: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<ProcessOutput>> + Send;
}

/// Runs commands through `bash -o pipefail -c`, or plain `sh -c` when bash is
/// missing. Without pipefail a failing `mysqldump | gzip` reports gzip's 0.
///
/// Each command gets its own process group so a deadline (or a dropped
/// future) takes down every stage of the pipeline, not only the shell.
#[derive(Debug, Clone, Default)]
pub struct Shell;

impl Shell {
    fn interpreter() -> Command {
        let mut cmd = if has_binary("bash") {
            let mut cmd = Command::new("bash");
            cmd.arg("-o").arg("pipefail");
            cmd
        } else {
            Command::new("sh")
        };
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

impl ProcessRunner for Shell {
    async fn run(&self, command: &str, timeout: Duration) -> Result<ProcessOutput> {
        tracing::debug!(command = %redact(command), "exec");

        let mut child = Self::interpreter()
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OpsError::Resource(format!("Failed to spawn shell: {}", e)))?;
        let mut group = ProcessGroup::of(&child);

        let stdout = tokio::spawn(drain(child.stdout.take()));
        let stderr = tokio::spawn(drain(child.stderr.take()));

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                group.disarm();
                let mut output =
                    String::from_utf8_lossy(&stdout.await.unwrap_or_default()).into_owned();
                output.push_str(&String::from_utf8_lossy(&stderr.await.unwrap_or_default()));
                Ok(ProcessOutput {
                    code: status.code(),
                    output: output.trim().to_string(),
                    timed_out: false,
                })
            }
            Ok(Err(e)) => Err(OpsError::Resource(format!(
                "Failed to wait for shell: {}",
                e
            ))),
            Err(_) => {
                tracing::warn!(?timeout, "command exceeded its deadline, killing its process group");
                group.kill();
                if let Err(e) = child.wait().await {
                    tracing::warn!(error = %e, "failed to reap timed-out shell");
                }
                stdout.abort();
                stderr.abort();
                Ok(ProcessOutput {
                    code: None,
                    output: format!("timed out after {}s", timeout.as_secs()),
                    timed_out: true,
                })
            }
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

/// SIGKILLs a shell's whole process group when killed or dropped while armed.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    /// The shell exited on its own and its pipeline with it.
    fn disarm(&mut self) {
        self.pgid = None;
    }

    #[cfg(unix)]
    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        // SAFETY: kill(2) has no memory-safety preconditions. The leader is
        // not reaped yet, so the group id cannot have been recycled.
        let rc = unsafe { libc::kill(-(pgid as libc::pid_t), libc::SIGKILL) };
        if rc != 0 {
            tracing::warn!(
                pgid,
                error = %std::io::Error::last_os_error(),
                "failed to kill process group"
            );
        }
    }

    #[cfg(not(unix))]
    fn kill(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}
