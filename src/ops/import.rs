use crate::error::{OpsError, Result};
use crate::ops::command::build_import_command;
use crate::ops::options::{is_gzipped, ImportOptions};
use crate::ops::outcome::ImportResult;
use crate::ops::registry::ServerProfile;
use crate::ops::shell::{redact, ProcessRunner, Shell};
use crate::ops::tunnel::{TunnelHandle, TunnelManager};
use std::time::{Duration, Instant};

/// Streams a `.sql` / `.sql.gz` file into `mysql`.
pub struct ImportExecutor<R: ProcessRunner = Shell> {
    tunnels: TunnelManager,
    runner: R,
    timeout: Duration,
}

impl ImportExecutor<Shell> {
    pub fn new(tunnels: TunnelManager, timeout: Duration) -> Self {
        Self::with_runner(tunnels, Shell, timeout)
    }
}

impl<R: ProcessRunner> ImportExecutor<R> {
    pub fn with_runner(tunnels: TunnelManager, runner: R, timeout: Duration) -> Self {
        Self {
            tunnels,
            runner,
            timeout,
        }
    }

    pub fn preview(&self, profile: &ServerProfile, options: &ImportOptions) -> String {
        redact(&build_import_command(profile, options, None))
    }

    pub async fn import(&self, profile: &ServerProfile, options: &ImportOptions) -> ImportResult {
        let started = Instant::now();
        match self.try_import(profile, options, started).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(server = %profile.name, error = %e, "import failed");
                ImportResult::failure(options.file_path(), e.to_string(), started.elapsed())
            }
        }
    }

    async fn try_import(
        &self,
        profile: &ServerProfile,
        options: &ImportOptions,
        started: Instant,
    ) -> Result<ImportResult> {
        self.runner.require("mysql")?;
        if is_gzipped(options.file_path()) {
            self.runner.require("gzip")?;
        }

        let mut tunnel = self.tunnels.open_if_configured(profile).await?;
        let endpoint = tunnel.as_ref().map(TunnelHandle::endpoint);
        let command = build_import_command(profile, options, endpoint.as_ref());

        tracing::info!(
            server = %profile.name,
            database = options.database(),
            file = %options.file_path().display(),
            tunneled = tunnel.is_some(),
            "running mysql import"
        );
        let outcome = self.runner.run(&command, self.timeout).await;

        if let Some(handle) = tunnel.as_mut() {
            self.tunnels.close_tunnel(handle).await;
        }

        let output = outcome?;
        let path = options.file_path();
        if output.timed_out {
            return Ok(ImportResult::failure(
                path,
                format!("mysql import {}", output.output),
                started.elapsed(),
            ));
        }
        if !output.success() {
            let err = OpsError::CommandFailed {
                code: output.code,
                output: output.output,
            };
            return Ok(ImportResult::failure(path, err.to_string(), started.elapsed()));
        }

        Ok(ImportResult::success(path, started.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TunnelConfig;
    use crate::ops::shell::ProcessOutput;
    use std::sync::Mutex;

    struct CannedRunner {
        code: i32,
        output: &'static str,
        required: Mutex<Vec<String>>,
    }

    impl ProcessRunner for CannedRunner {
        fn require(&self, binary: &str) -> Result<()> {
            self.required.lock().unwrap().push(binary.to_string());
            Ok(())
        }

        async fn run(&self, _command: &str, _timeout: Duration) -> Result<ProcessOutput> {
            Ok(ProcessOutput {
                code: Some(self.code),
                output: self.output.to_string(),
                timed_out: false,
            })
        }
    }

    fn executor(code: i32, output: &'static str) -> ImportExecutor<CannedRunner> {
        ImportExecutor::with_runner(
            TunnelManager::new(TunnelConfig::default()),
            CannedRunner {
                code,
                output,
                required: Mutex::new(Vec::new()),
            },
            Duration::from_secs(60),
        )
    }

    fn sql_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> ImportOptions {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        ImportOptions::new("shop", path).unwrap()
    }

    #[tokio::test]
    async fn test_import_success() {
        let dir = tempfile::tempdir().unwrap();
        let options = sql_file(&dir, "seed.sql", b"INSERT INTO t VALUES (1);");
        let profile = ServerProfile::new("dev", "localhost", 3306, "root");

        let result = executor(0, "").import(&profile, &options).await;
        assert!(result.is_success());
        assert!(result.error().is_none());
    }

    #[tokio::test]
    async fn test_import_failure_keeps_output() {
        let dir = tempfile::tempdir().unwrap();
        let options = sql_file(&dir, "seed.sql", b"garbage");
        let profile = ServerProfile::new("dev", "localhost", 3306, "root");

        let result = executor(1, "ERROR 1064 (42000) at line 1: You have an error in your SQL syntax")
            .import(&profile, &options)
            .await;
        assert!(!result.is_success());
        assert!(result.error().unwrap().contains("ERROR 1064"));
    }

    #[tokio::test]
    async fn test_gzip_import_requires_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let options = sql_file(&dir, "seed.sql.gz", &[0x1f, 0x8b, 0x08]);
        let profile = ServerProfile::new("dev", "localhost", 3306, "root");

        let exec = executor(0, "");
        exec.import(&profile, &options).await;
        let required = exec.runner.required.lock().unwrap().clone();
        assert_eq!(required, vec!["mysql".to_string(), "gzip".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tunnel_torn_down_after_success_and_failure() {
        use crate::ops::registry::SshTunnelConfig;
        use crate::ops::testing::{wait_gone, StandInForwarder};

        let dir = tempfile::tempdir().unwrap();
        let forwarder = StandInForwarder::start(dir.path());
        let options = sql_file(&dir, "seed.sql", b"INSERT INTO t VALUES (1);");
        let profile = ServerProfile::new("prod", "10.0.0.5", 3306, "app")
            .with_tunnel(SshTunnelConfig::with_key("bastion", "ops", "/k"));

        for (code, output) in [(0, ""), (1, "ERROR 2013 (HY000): Lost connection")] {
            let exec = ImportExecutor::with_runner(
                TunnelManager::new(TunnelConfig::default()).with_ssh_binary(forwarder.ssh_path()),
                CannedRunner {
                    code,
                    output,
                    required: Mutex::new(Vec::new()),
                },
                Duration::from_secs(60),
            );
            let result = exec.import(&profile, &options).await;
            assert_eq!(result.is_success(), code == 0, "{:?}", result.error());
            assert!(wait_gone(forwarder.pid(), Duration::from_secs(2)).await);
        }
    }
}
