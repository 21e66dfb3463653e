//! Error taxonomy for tunnel, command and executor operations.

use thiserror::Error;

/// Failures raised by the connection/tunnel core.
///
/// Executors and the prober convert these into failure-shaped results at
/// their boundary; only option construction returns them directly.
#[derive(Error, Debug)]
pub enum OpsError {
    /// Tunnel requested for a profile that has no SSH configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required external binary is not on PATH
    #[error("Missing dependency: '{binary}' not found on PATH. {hint}")]
    DependencyMissing { binary: String, hint: String },

    /// Local port allocation or subprocess spawn failed
    #[error("Resource error: {0}")]
    Resource(String),

    /// SSH forwarder exited or never became ready
    #[error("SSH tunnel failed to establish: {0}")]
    TunnelEstablishFailed(String),

    /// External client returned a non-zero exit code
    #[error("Command failed (exit {code:?}): {output}")]
    CommandFailed { code: Option<i32>, output: String },

    /// Malformed options, rejected before any subprocess runs
    #[error("Validation error: {0}")]
    Validation(String),
}

impl OpsError {
    pub fn missing(binary: &str) -> Self {
        OpsError::DependencyMissing {
            binary: binary.to_string(),
            hint: install_hint(binary).to_string(),
        }
    }
}

fn install_hint(binary: &str) -> &'static str {
    match binary {
        "mysqldump" | "mysql" => {
            "Install the MySQL client tools (apt install mysql-client / brew install mysql-client)."
        }
        "ssh" => "Install an OpenSSH client (apt install openssh-client).",
        "sshpass" => {
            "Password-based SSH tunnels need sshpass (apt install sshpass), or configure --ssh-key instead."
        }
        "gzip" => "Install gzip (apt install gzip / brew install gzip).",
        _ => "Install it and make sure it is on PATH.",
    }
}

pub type Result<T> = std::result::Result<T, OpsError>;
