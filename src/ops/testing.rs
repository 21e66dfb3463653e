//! Test support: process liveness checks and a stand-in `ssh` forwarder.

use crate::ops::shell::shell_escape;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// True once `pid` no longer exists or is only a zombie.
pub fn process_gone(pid: i32) -> bool {
    match fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // state is the first field after "(comm) "
        Ok(stat) => stat
            .rsplit(") ")
            .next()
            .map(|rest| rest.starts_with('Z'))
            .unwrap_or(false),
        Err(_) if Path::new("/proc/self/stat").exists() => true,
        // no procfs
        Err(_) => (unsafe { libc::kill(pid, 0) }) != 0,
    }
}

pub async fn wait_gone(pid: i32, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if process_gone(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    process_gone(pid)
}

/// Write an executable `/bin/sh` script into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Plays the part of `ssh -N -L`: the script records its pid and argv, and a
/// task in the test process listens on each local port it is asked for.
pub struct StandInForwarder {
    ssh_path: PathBuf,
    record: PathBuf,
    listener: JoinHandle<()>,
}

impl StandInForwarder {
    pub fn start(dir: &Path) -> Self {
        let record = dir.join("forwarder.args");
        let body = format!(
            "echo \"$$ $*\" > {}\nexec sleep 30\n",
            shell_escape(&record.to_string_lossy())
        );
        let ssh_path = write_script(dir, "stand-in-ssh", &body);

        let watched = record.clone();
        let listener = tokio::spawn(async move {
            let mut bound = None;
            loop {
                if let Some((_, port)) = read_record(&watched) {
                    if bound != Some(port) {
                        bound = Some(port);
                        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
                        // accept and hang up, like a forward to a dead database
                        tokio::spawn(async move {
                            loop {
                                let _ = listener.accept().await;
                            }
                        });
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        Self {
            ssh_path,
            record,
            listener,
        }
    }

    pub fn ssh_path(&self) -> &str {
        self.ssh_path.to_str().unwrap()
    }

    /// Pid of the last forwarder started, once it has run.
    pub fn pid(&self) -> i32 {
        read_record(&self.record).expect("forwarder never started").0
    }
}

impl Drop for StandInForwarder {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

// "<pid> -N -L <local>:<host>:<port> ..."
fn read_record(path: &Path) -> Option<(i32, u16)> {
    let line = fs::read_to_string(path).ok()?;
    let mut words = line.split_whitespace();
    let pid = words.next()?.parse().ok()?;
    let forward = words.skip_while(|w| *w != "-L").nth(1)?;
    let port = forward.split(':').next()?.parse().ok()?;
    Some((pid, port))
}
