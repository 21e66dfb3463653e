use crate::error::{OpsError, Result};
use crate::ops::command::build_dump_command;
use crate::ops::options::DumpOptions;
use crate::ops::outcome::DumpResult;
use crate::ops::registry::ServerProfile;
use crate::ops::shell::{redact, ProcessRunner, Shell};
use crate::ops::tunnel::{TunnelHandle, TunnelManager};
use std::fs;
use std::time::{Duration, Instant};

/// Runs `mysqldump` against a profile, tunneling when the profile says so.
pub struct DumpExecutor<R: ProcessRunner = Shell> {
    tunnels: TunnelManager,
    runner: R,
    timeout: Duration,
}

impl DumpExecutor<Shell> {
    pub fn new(tunnels: TunnelManager, timeout: Duration) -> Self {
        Self::with_runner(tunnels, Shell, timeout)
    }
}

impl<R: ProcessRunner> DumpExecutor<R> {
    pub fn with_runner(tunnels: TunnelManager, runner: R, timeout: Duration) -> Self {
        Self {
            tunnels,
            runner,
            timeout,
        }
    }

    /// The command that `dump` would run against the direct endpoint, with
    /// the password masked.
    pub fn preview(&self, profile: &ServerProfile, options: &DumpOptions) -> String {
        redact(&build_dump_command(profile, options, None))
    }

    /// Never returns an error: every failure becomes a failed `DumpResult`.
    pub async fn dump(&self, profile: &ServerProfile, options: &DumpOptions) -> DumpResult {
        let started = Instant::now();
        match self.try_dump(profile, options, started).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(server = %profile.name, error = %e, "dump failed");
                DumpResult::failure(options.output_path(), e.to_string(), started.elapsed())
            }
        }
    }

    async fn try_dump(
        &self,
        profile: &ServerProfile,
        options: &DumpOptions,
        started: Instant,
    ) -> Result<DumpResult> {
        self.runner.require("mysqldump")?;
        if options.gzip() {
            self.runner.require("gzip")?;
        }

        let mut tunnel = self.tunnels.open_if_configured(profile).await?;
        let endpoint = tunnel.as_ref().map(TunnelHandle::endpoint);
        let command = build_dump_command(profile, options, endpoint.as_ref());

        tracing::info!(
            server = %profile.name,
            database = options.database(),
            tables = options.tables().len(),
            tunneled = tunnel.is_some(),
            "running mysqldump"
        );
        let outcome = self.runner.run(&command, self.timeout).await;

        // A panic above drops the handle, and kill_on_drop reaps the child.
        if let Some(handle) = tunnel.as_mut() {
            self.tunnels.close_tunnel(handle).await;
        }

        let output = outcome?;
        let path = options.output_path();

        if output.timed_out {
            remove_partial(path);
            return Ok(DumpResult::failure(
                path,
                format!("mysqldump {}", output.output),
                started.elapsed(),
            ));
        }
        if !output.success() {
            remove_partial(path);
            let err = OpsError::CommandFailed {
                code: output.code,
                output: output.output,
            };
            return Ok(DumpResult::failure(path, err.to_string(), started.elapsed()));
        }

        match fs::metadata(path) {
            Ok(meta) => Ok(DumpResult::success(path, meta.len(), started.elapsed())),
            Err(_) => Ok(DumpResult::failure(
                path,
                format!(
                    "mysqldump exited cleanly but {} was not created",
                    path.display()
                ),
                started.elapsed(),
            )),
        }
    }
}

fn remove_partial(path: &std::path::Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "could not remove partial dump");
        }
    }
}
