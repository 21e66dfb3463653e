//! SSH local port-forwards, one per operation.
//!
//! A [`TunnelHandle`] owns its `ssh` child and that child's pipes. Nothing is
//! tracked globally: closing (or dropping) the handle is the only cleanup.

use crate::config::TunnelConfig;
use crate::error::{OpsError, Result};
use crate::ops::command::Endpoint;
use crate::ops::ports;
use crate::ops::registry::{ServerProfile, SshAuth, SshTunnelConfig};
use crate::ops::shell::require_binary;
use std::fs;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::Instant;

pub const TUNNEL_HOST: &str = "127.0.0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Unstarted,
    Starting,
    Established,
    Closing,
    Closed,
    Failed,
}

/// A live forward from `127.0.0.1:<port>` to the database behind the SSH host.
#[derive(Debug)]
pub struct TunnelHandle {
    port: u16,
    child: Option<Child>,
    state: TunnelState,
}

impl TunnelHandle {
    /// Wrap an already-running forwarder. The child should be spawned with
    /// `kill_on_drop(true)` so a dropped handle never leaks a process.
    pub fn from_child(port: u16, child: Child) -> Self {
        Self {
            port,
            child: Some(child),
            state: TunnelState::Established,
        }
    }

    pub fn host(&self) -> &str {
        TUNNEL_HOST
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(TUNNEL_HOST, self.port)
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// SIGTERM, wait `grace`, then SIGKILL. Idempotent and infallible:
    /// errors are logged, never returned.
    pub async fn close(&mut self, grace: Duration) {
        let Some(mut child) = self.child.take() else {
            self.state = TunnelState::Closed;
            return;
        };

        if !matches!(child.try_wait(), Ok(None)) {
            self.state = TunnelState::Closed;
            return;
        }

        self.state = TunnelState::Closing;
        if let Err(e) = terminate(&mut child) {
            tracing::warn!(port = self.port, error = %e, "failed to signal tunnel process");
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(port = self.port, %status, "tunnel exited after SIGTERM");
            }
            Ok(Err(e)) => {
                tracing::warn!(port = self.port, error = %e, "failed to reap tunnel process");
            }
            Err(_) => {
                tracing::debug!(port = self.port, "tunnel ignored SIGTERM, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(port = self.port, error = %e, "failed to kill tunnel process");
                }
            }
        }

        // dropping the child closes its stderr pipe
        drop(child);
        self.state = TunnelState::Closed;
        tracing::info!(port = self.port, "tunnel closed");
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    // SAFETY: kill(2) has no memory-safety preconditions; pid belongs to a
    // child we have not yet reaped, so it cannot have been recycled.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

/// Spawns and tears down SSH forwarders.
#[derive(Debug, Clone)]
pub struct TunnelManager {
    config: TunnelConfig,
    ssh_binary: String,
}

impl TunnelManager {
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config,
            ssh_binary: "ssh".to_string(),
        }
    }

    /// Use a different client binary (tests, or a non-default OpenSSH).
    pub fn with_ssh_binary(mut self, binary: &str) -> Self {
        self.ssh_binary = binary.to_string();
        self
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    // ssh gives up on an unreachable bastion within the settle window
    fn connect_timeout_secs(&self) -> u64 {
        self.config.settle_timeout_ms.div_ceil(1000).max(1)
    }

    /// Arguments for `ssh -N -L <local>:<db_host>:<db_port> ... user@host`.
    pub fn ssh_args(
        &self,
        tunnel: &SshTunnelConfig,
        local_port: u16,
        remote: &Endpoint,
    ) -> Result<Vec<String>> {
        let remote_host = if remote.host.contains(':') {
            format!("[{}]", remote.host)
        } else {
            remote.host.clone()
        };

        let mut args = vec![
            "-N".to_string(),
            "-L".to_string(),
            format!("{}:{}:{}", local_port, remote_host, remote.port),
            "-p".to_string(),
            tunnel.ssh_port.to_string(),
            "-o".to_string(),
            "ExitOnForwardFailure=yes".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=30".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs()),
        ];
        args.extend(self.config.host_key_policy.ssh_options());

        match tunnel.auth()? {
            SshAuth::Key(key) => {
                args.push("-i".to_string());
                args.push(key.to_string_lossy().into_owned());
                args.push("-o".to_string());
                args.push("BatchMode=yes".to_string());
                args.push("-o".to_string());
                args.push("IdentitiesOnly=yes".to_string());
            }
            SshAuth::Password(_) => {
                args.push("-o".to_string());
                args.push("PreferredAuthentications=password,keyboard-interactive".to_string());
                args.push("-o".to_string());
                args.push("PubkeyAuthentication=no".to_string());
            }
        }

        args.push(tunnel.target());
        Ok(args)
    }

    /// Start a forward for `profile` and wait until the local port accepts
    /// connections.
    pub async fn create_tunnel(&self, profile: &ServerProfile) -> Result<TunnelHandle> {
        let tunnel = profile.ssh_tunnel.as_ref().ok_or_else(|| {
            OpsError::Config(format!(
                "Server '{}' has no SSH tunnel configured",
                profile.name
            ))
        })?;

        let ssh_path = require_binary(&self.ssh_binary)?;
        let auth = tunnel.auth()?;
        let mut command = match auth {
            SshAuth::Key(_) => Command::new(&ssh_path),
            SshAuth::Password(password) => {
                let sshpass = require_binary("sshpass")?;
                let mut cmd = Command::new(sshpass);
                // password travels in the environment, never on argv
                cmd.arg("-e").arg(&ssh_path).env("SSHPASS", password);
                cmd
            }
        };

        let local_port = ports::allocate()?;
        let remote = Endpoint::of(profile);
        command
            .args(self.ssh_args(tunnel, local_port, &remote)?)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(
            server = %profile.name,
            via = %tunnel.target(),
            local_port,
            "starting ssh tunnel"
        );

        let child = command.spawn().map_err(|e| {
            OpsError::Resource(format!("Failed to spawn {}: {}", self.ssh_binary, e))
        })?;

        let mut handle = TunnelHandle {
            port: local_port,
            child: Some(child),
            state: TunnelState::Starting,
        };

        match self.wait_until_ready(&mut handle).await {
            Ok(()) => {
                handle.state = TunnelState::Established;
                tracing::info!(local_port, "ssh tunnel established");
                Ok(handle)
            }
            Err(e) => {
                handle.close(self.config.grace()).await;
                handle.state = TunnelState::Failed;
                Err(e)
            }
        }
    }

    /// A tunnel when the profile asks for one, `None` for direct connections.
    pub async fn open_if_configured(&self, profile: &ServerProfile) -> Result<Option<TunnelHandle>> {
        if profile.ssh_tunnel.is_none() {
            return Ok(None);
        }
        self.create_tunnel(profile).await.map(Some)
    }

    pub async fn close_tunnel(&self, handle: &mut TunnelHandle) {
        handle.close(self.config.grace()).await;
    }

    // Poll until the forward is listening, the child dies, or the settle
    // timeout runs out.
    async fn wait_until_ready(&self, handle: &mut TunnelHandle) -> Result<()> {
        let deadline = Instant::now() + self.config.settle_timeout();
        let poll = self.config.poll_interval();

        loop {
            if let Some(child) = handle.child.as_mut() {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        let stderr = read_stderr(child, self.config.grace()).await;
                        let detail = if stderr.is_empty() {
                            format!("ssh exited with {}", status)
                        } else {
                            stderr
                        };
                        return Err(OpsError::TunnelEstablishFailed(detail));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        return Err(OpsError::Resource(format!(
                            "Could not poll ssh process: {}",
                            e
                        )))
                    }
                }
            }

            if forward_listening(handle.port, poll).await {
                return Ok(());
            }

            if Instant::now() >= deadline {
                let mut detail = format!(
                    "local port {} not ready after {}ms",
                    handle.port, self.config.settle_timeout_ms
                );
                if let Some(child) = handle.child.as_mut() {
                    // kill first so the stderr pipe reaches EOF
                    if let Err(e) = child.kill().await {
                        tracing::warn!(port = handle.port, error = %e, "failed to kill stalled ssh");
                    }
                    let stderr = read_stderr(child, self.config.grace()).await;
                    if !stderr.is_empty() {
                        detail = format!("{}: {}", detail, stderr);
                    }
                }
                return Err(OpsError::TunnelEstablishFailed(detail));
            }
            tokio::time::sleep(poll).await;
        }
    }
}

async fn read_stderr(child: &mut Child, limit: Duration) -> String {
    let mut buf = Vec::new();
    if let Some(mut stderr) = child.stderr.take() {
        // sshpass can leave ssh holding the pipe open
        let _ = tokio::time::timeout(limit, stderr.read_to_end(&mut buf)).await;
    }
    String::from_utf8_lossy(&buf).trim().to_string()
}

/// Whether something listens on the local end of the forward.
///
/// Reads the kernel socket tables where available so the check never opens a
/// connection through the tunnel to the database server.
async fn forward_listening(port: u16, poll: Duration) -> bool {
    if let Some(listening) = listening_socket(port) {
        return listening;
    }
    let connect = TcpStream::connect((Ipv4Addr::LOCALHOST, port));
    matches!(tokio::time::timeout(poll, connect).await, Ok(Ok(_)))
}

const TCP_LISTEN: &str = "0A";

/// `None` when procfs is not available.
fn listening_socket(port: u16) -> Option<bool> {
    let mut readable = false;
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        let Ok(content) = fs::read_to_string(table) else {
            continue;
        };
        readable = true;
        if content.lines().skip(1).any(|line| is_listen_entry(line, port)) {
            return Some(true);
        }
    }
    readable.then_some(false)
}

// "  0: 0100007F:9C40 00000000:0000 0A ..." (local address, remote, state)
fn is_listen_entry(line: &str, port: u16) -> bool {
    let mut fields = line.split_whitespace().skip(1);
    let (Some(local), Some(state)) = (fields.next(), fields.nth(1)) else {
        return false;
    };
    state == TCP_LISTEN
        && local
            .rsplit(':')
            .next()
            .and_then(|hex| u16::from_str_radix(hex, 16).ok())
            == Some(port)
}
