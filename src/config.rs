use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// How the SSH forwarder treats unknown host keys.
///
/// `AcceptNew` keeps unattended runs working against fresh hosts by skipping
/// host-key pinning entirely (no known_hosts file). That is a security
/// trade-off: a MITM on the SSH hop would go unnoticed. Use `Strict` to pin
/// against the user's own known_hosts.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    #[default]
    AcceptNew,
    Strict,
}

impl HostKeyPolicy {
    pub fn ssh_options(&self) -> Vec<String> {
        match self {
            HostKeyPolicy::AcceptNew => vec![
                "-o".to_string(),
                "StrictHostKeyChecking=no".to_string(),
                "-o".to_string(),
                "UserKnownHostsFile=/dev/null".to_string(),
            ],
            HostKeyPolicy::Strict => vec![
                "-o".to_string(),
                "StrictHostKeyChecking=yes".to_string(),
            ],
        }
    }
}

impl std::str::FromStr for HostKeyPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "accept-new" => Ok(HostKeyPolicy::AcceptNew),
            "strict" => Ok(HostKeyPolicy::Strict),
            other => Err(anyhow::anyhow!(
                "Unknown host key policy '{}' (expected 'accept-new' or 'strict')",
                other
            )),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TunnelConfig {
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64, // upper bound on waiting for the forward to bind
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64, // SIGTERM -> SIGKILL escalation delay
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            settle_timeout_ms: default_settle_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            grace_ms: default_grace_ms(),
            host_key_policy: HostKeyPolicy::default(),
        }
    }
}

impl TunnelConfig {
    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

fn default_settle_timeout_ms() -> u64 {
    10_000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_grace_ms() -> u64 {
    100
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExecutionConfig {
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl ExecutionConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn default_command_timeout_secs() -> u64 {
    6 * 60 * 60
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
        }
    }
}

fn default_output_directory() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// `~/.sqlhop`, falling back to the working directory when there is no home.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".sqlhop"))
        .unwrap_or_else(|| PathBuf::from(".sqlhop"))
}

impl AppConfig {
    pub fn path() -> PathBuf {
        data_dir().join("config.toml")
    }

    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::path();
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&config_path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_dir = data_dir();
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        let mut file = fs::File::create(Self::path())?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }

    /// Apply a dotted `section.key` assignment from the CLI.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "tunnel.settle_timeout_ms" => self.tunnel.settle_timeout_ms = value.parse()?,
            "tunnel.poll_interval_ms" => self.tunnel.poll_interval_ms = value.parse()?,
            "tunnel.grace_ms" => self.tunnel.grace_ms = value.parse()?,
            "tunnel.host_key_policy" => self.tunnel.host_key_policy = value.parse()?,
            "execution.command_timeout_secs" => {
                self.execution.command_timeout_secs = value.parse()?
            }
            "output.directory" => self.output.directory = PathBuf::from(value),
            other => return Err(anyhow::anyhow!("Unknown config key '{}'", other)),
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigManager {
    pub config: AppConfig,
}

impl ConfigManager {
    pub fn new() -> anyhow::Result<Self> {
        let config = AppConfig::load()?;
        Ok(Self { config })
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.config.save()
    }

    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.config.set(key, value)?;
        self.save()
    }
}
