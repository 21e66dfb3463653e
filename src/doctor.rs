use crate::config::AppConfig;
use crate::ops::shell::has_binary;
use crate::security::Vault;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warning,
    Fail,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DoctorCheck {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DoctorReport {
    pub checks: Vec<DoctorCheck>,
    pub overall_health: CheckStatus,
}

/// Binaries every install needs, and what they are for.
const REQUIRED_BINARIES: &[(&str, &str)] = &[
    ("mysqldump", "dumps"),
    ("mysql", "imports"),
    ("ssh", "SSH tunnels"),
    ("gzip", "compressed dumps and imports"),
];

pub struct Doctor {
    lookup: fn(&str) -> bool,
}

impl Default for Doctor {
    fn default() -> Self {
        Self::new()
    }
}

impl Doctor {
    pub fn new() -> Self {
        Self { lookup: has_binary }
    }

    /// Swap the PATH lookup, for tests.
    pub fn with_lookup(lookup: fn(&str) -> bool) -> Self {
        Self { lookup }
    }

    pub fn run(&self) -> DoctorReport {
        self.run_at(&AppConfig::path(), &Vault::key_path())
    }

    pub fn run_at(&self, config_path: &Path, key_path: &Path) -> DoctorReport {
        let mut checks: Vec<DoctorCheck> = REQUIRED_BINARIES
            .iter()
            .map(|(binary, purpose)| self.check_binary(binary, purpose))
            .collect();

        checks.push(self.check_sshpass());
        checks.push(self.check_config(config_path));
        checks.push(self.check_vault_key(key_path));

        let overall_health = if checks.iter().any(|c| matches!(c.status, CheckStatus::Fail)) {
            CheckStatus::Fail
        } else if checks
            .iter()
            .any(|c| matches!(c.status, CheckStatus::Warning))
        {
            CheckStatus::Warning
        } else {
            CheckStatus::Pass
        };

        DoctorReport {
            checks,
            overall_health,
        }
    }

    fn check_binary(&self, binary: &str, purpose: &str) -> DoctorCheck {
        if (self.lookup)(binary) {
            DoctorCheck {
                name: binary.to_string(),
                status: CheckStatus::Pass,
                message: format!("Found on PATH (needed for {})", purpose),
            }
        } else {
            DoctorCheck {
                name: binary.to_string(),
                status: CheckStatus::Fail,
                message: format!("Not found on PATH; {} will fail", purpose),
            }
        }
    }

    fn check_sshpass(&self) -> DoctorCheck {
        if (self.lookup)("sshpass") {
            DoctorCheck {
                name: "sshpass".to_string(),
                status: CheckStatus::Pass,
                message: "Password-based SSH tunnels available".to_string(),
            }
        } else {
            DoctorCheck {
                name: "sshpass".to_string(),
                status: CheckStatus::Warning,
                message: "Not installed; only key-based SSH tunnels will work".to_string(),
            }
        }
    }

    fn check_config(&self, path: &Path) -> DoctorCheck {
        if !path.exists() {
            return DoctorCheck {
                name: "Config".to_string(),
                status: CheckStatus::Pass,
                message: "No config file, using defaults".to_string(),
            };
        }
        match std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|c| toml::from_str::<AppConfig>(&c).map_err(anyhow::Error::from))
        {
            Ok(_) => DoctorCheck {
                name: "Config".to_string(),
                status: CheckStatus::Pass,
                message: format!("{} parsed", path.display()),
            },
            Err(e) => DoctorCheck {
                name: "Config".to_string(),
                status: CheckStatus::Fail,
                message: format!("{} is invalid: {}", path.display(), e),
            },
        }
    }

    fn check_vault_key(&self, path: &Path) -> DoctorCheck {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() == 32 => DoctorCheck {
                name: "Vault Key".to_string(),
                status: CheckStatus::Pass,
                message: "Credential key present".to_string(),
            },
            Ok(_) => DoctorCheck {
                name: "Vault Key".to_string(),
                status: CheckStatus::Fail,
                message: format!("{} is corrupt; stored passwords cannot be read", path.display()),
            },
            Err(_) => DoctorCheck {
                name: "Vault Key".to_string(),
                status: CheckStatus::Warning,
                message: "No key yet; one is created when you first save a password".to_string(),
            },
        }
    }
}
