use crate::error::OpsError;
use crate::security::Vault;
use anyhow::{anyhow, Result};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SshTunnelConfig {
    pub ssh_host: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    pub ssh_username: String,
    pub ssh_password: Option<String>,
    pub ssh_key_path: Option<PathBuf>,
}

/// How the tunnel authenticates against the SSH host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SshAuth<'a> {
    Key(&'a Path),
    Password(&'a str),
}

impl SshTunnelConfig {
    pub fn with_key(host: &str, username: &str, key_path: impl Into<PathBuf>) -> Self {
        Self {
            ssh_host: host.to_string(),
            ssh_port: default_ssh_port(),
            ssh_username: username.to_string(),
            ssh_password: None,
            ssh_key_path: Some(key_path.into()),
        }
    }

    pub fn with_password(host: &str, username: &str, password: &str) -> Self {
        Self {
            ssh_host: host.to_string(),
            ssh_port: default_ssh_port(),
            ssh_username: username.to_string(),
            ssh_password: Some(password.to_string()),
            ssh_key_path: None,
        }
    }

    /// Exactly one of key path or password must be configured.
    pub fn auth(&self) -> std::result::Result<SshAuth<'_>, OpsError> {
        match (&self.ssh_key_path, &self.ssh_password) {
            (Some(key), None) => Ok(SshAuth::Key(key)),
            (None, Some(password)) => Ok(SshAuth::Password(password)),
            (Some(_), Some(_)) => Err(OpsError::Validation(
                "SSH tunnel config sets both a key path and a password; choose one".to_string(),
            )),
            (None, None) => Err(OpsError::Validation(
                "SSH tunnel config needs either a key path or a password".to_string(),
            )),
        }
    }

    pub fn target(&self) -> String {
        format!("{}@{}", self.ssh_username, self.ssh_host)
    }
}

fn default_ssh_port() -> u16 {
    22
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServerProfile {
    pub name: String,
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub database: Option<String>,
    #[serde(default = "default_charset")]
    pub charset: String,
    #[serde(default = "default_collation")]
    pub collation: String,
    #[serde(default)]
    pub is_default: bool,
    pub ssh_tunnel: Option<SshTunnelConfig>,
}

fn default_mysql_port() -> u16 {
    3306
}
fn default_charset() -> String {
    "utf8mb4".to_string()
}
fn default_collation() -> String {
    "utf8mb4_unicode_ci".to_string()
}

impl ServerProfile {
    pub fn new(name: &str, host: &str, port: u16, username: &str) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: None,
            database: None,
            charset: default_charset(),
            collation: default_collation(),
            is_default: false,
            ssh_tunnel: None,
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_database(mut self, database: &str) -> Self {
        self.database = Some(database.to_string());
        self
    }

    pub fn with_tunnel(mut self, tunnel: SshTunnelConfig) -> Self {
        self.ssh_tunnel = Some(tunnel);
        self
    }

    pub fn validate(&self) -> std::result::Result<(), OpsError> {
        if self.name.trim().is_empty() {
            return Err(OpsError::Validation("Server name must not be empty".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(OpsError::Validation("Server host must not be empty".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(OpsError::Validation("Username must not be empty".to_string()));
        }
        if let Some(tunnel) = &self.ssh_tunnel {
            if tunnel.ssh_host.trim().is_empty() || tunnel.ssh_username.trim().is_empty() {
                return Err(OpsError::Validation(
                    "SSH tunnel needs both a host and a username".to_string(),
                ));
            }
            tunnel.auth()?;
        }
        Ok(())
    }

    /// Copy with every credential encrypted for storage.
    pub fn seal(&self, vault: &Vault) -> Result<Self> {
        let mut sealed = self.clone();
        sealed.password = seal_value(vault, self.password.as_deref())?;
        if let Some(tunnel) = sealed.ssh_tunnel.as_mut() {
            tunnel.ssh_password = seal_value(vault, tunnel.ssh_password.as_deref())?;
        }
        Ok(sealed)
    }

    /// Copy with every credential decrypted for use.
    pub fn unseal(&self, vault: &Vault) -> Result<Self> {
        let mut open = self.clone();
        open.password = unseal_value(vault, self.password.as_deref())?;
        if let Some(tunnel) = open.ssh_tunnel.as_mut() {
            tunnel.ssh_password = unseal_value(vault, tunnel.ssh_password.as_deref())?;
        }
        Ok(open)
    }
}

fn seal_value(vault: &Vault, value: Option<&str>) -> Result<Option<String>> {
    match value {
        Some(v) if !Vault::is_encrypted(v) => Ok(Some(vault.encrypt(v)?)),
        other => Ok(other.map(str::to_string)),
    }
}

fn unseal_value(vault: &Vault, value: Option<&str>) -> Result<Option<String>> {
    value
        .map(|v| vault.decrypt(v).map(|s| s.expose_secret().to_string()))
        .transpose()
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct ServersFile {
    #[serde(default)]
    servers: Vec<ServerProfile>,
}

/// Named connection profiles persisted in `servers.toml`.
#[derive(Debug)]
pub struct ServerRegistry {
    path: PathBuf,
    servers: Vec<ServerProfile>,
}

impl ServerRegistry {
    pub fn default_path() -> PathBuf {
        crate::config::data_dir().join("servers.toml")
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let servers = if path.exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str::<ServersFile>(&content)?.servers
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            servers,
        })
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = ServersFile {
            servers: self.servers.clone(),
        };
        fs::write(&self.path, toml::to_string_pretty(&file)?)?;
        Ok(())
    }

    pub fn find_by_name(&self, name: &str) -> Option<&ServerProfile> {
        self.servers.iter().find(|s| s.name == name)
    }

    pub fn all(&self) -> &[ServerProfile] {
        &self.servers
    }

    pub fn default_server(&self) -> Option<&ServerProfile> {
        self.servers.iter().find(|s| s.is_default)
    }

    /// Look up `name`, or the default profile when no name is given.
    pub fn resolve(&self, name: Option<&str>) -> Result<&ServerProfile> {
        match name {
            Some(n) => self
                .find_by_name(n)
                .ok_or_else(|| anyhow!("Server '{}' not found. Run 'sqlhop server list'.", n)),
            None => self.default_server().ok_or_else(|| {
                anyhow!("No server given and no default set. Use 'sqlhop server set-default <name>'.")
            }),
        }
    }

    pub fn add(&mut self, profile: ServerProfile) -> Result<()> {
        profile.validate()?;
        if self.find_by_name(&profile.name).is_some() {
            return Err(anyhow!("Server '{}' already exists", profile.name));
        }
        let make_default = profile.is_default || self.servers.is_empty();
        let name = profile.name.clone();
        self.servers.push(profile);
        if make_default {
            self.mark_default(&name);
        }
        self.save()
    }

    pub fn update(&mut self, profile: ServerProfile) -> Result<()> {
        profile.validate()?;
        let slot = self
            .servers
            .iter_mut()
            .find(|s| s.name == profile.name)
            .ok_or_else(|| anyhow!("Server '{}' not found", profile.name))?;
        let make_default = profile.is_default;
        let name = profile.name.clone();
        *slot = profile;
        if make_default {
            self.mark_default(&name);
        }
        self.save()
    }

    pub fn remove(&mut self, name: &str) -> Result<ServerProfile> {
        let index = self
            .servers
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| anyhow!("Server '{}' not found", name))?;
        let removed = self.servers.remove(index);
        self.save()?;
        Ok(removed)
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if self.find_by_name(name).is_none() {
            return Err(anyhow!("Server '{}' not found", name));
        }
        self.mark_default(name);
        self.save()
    }

    // Clear every flag and set the target in one pass.
    fn mark_default(&mut self, name: &str) {
        for server in &mut self.servers {
            server.is_default = server.name == name;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, ServerRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = ServerRegistry::load_from(&dir.path().join("servers.toml")).unwrap();
        (dir, registry)
    }

    #[test]
    fn test_first_server_becomes_default() {
        let (_dir, mut registry) = registry();
        registry.add(ServerProfile::new("prod", "db.example.com", 3306, "app")).unwrap();
        assert_eq!(registry.default_server().unwrap().name, "prod");
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (_dir, mut registry) = registry();
        registry.add(ServerProfile::new("prod", "a", 3306, "app")).unwrap();
        assert!(registry.add(ServerProfile::new("prod", "b", 3306, "app")).is_err());
    }

    #[test]
    fn test_single_default() {
        let (_dir, mut registry) = registry();
        registry.add(ServerProfile::new("a", "h1", 3306, "u")).unwrap();
        registry.add(ServerProfile::new("b", "h2", 3306, "u")).unwrap();
        registry.add(ServerProfile::new("c", "h3", 3306, "u")).unwrap();

        registry.set_default("c").unwrap();
        let defaults: Vec<_> = registry.all().iter().filter(|s| s.is_default).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].name, "c");
    }

    #[test]
    fn test_persist_and_reload() {
        let (dir, mut registry) = registry();
        let tunnel = SshTunnelConfig::with_key("bastion", "ops", "/home/ops/.ssh/id_ed25519");
        registry
            .add(ServerProfile::new("prod", "10.0.0.5", 3307, "app").with_tunnel(tunnel))
            .unwrap();

        let reloaded = ServerRegistry::load_from(&dir.path().join("servers.toml")).unwrap();
        let prod = reloaded.find_by_name("prod").unwrap();
        assert_eq!(prod.port, 3307);
        assert_eq!(prod.ssh_tunnel.as_ref().unwrap().ssh_port, 22);
    }

    #[test]
    fn test_tunnel_auth_must_be_exclusive() {
        let mut tunnel = SshTunnelConfig::with_key("bastion", "ops", "/k");
        tunnel.ssh_password = Some("pw".to_string());
        let profile = ServerProfile::new("x", "h", 3306, "u").with_tunnel(tunnel);
        assert!(matches!(profile.validate(), Err(OpsError::Validation(_))));
    }

    #[test]
    fn test_seal_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::load_or_create_at(&dir.path().join("secret.key")).unwrap();
        let profile = ServerProfile::new("x", "h", 3306, "u")
            .with_password("pw")
            .with_tunnel(SshTunnelConfig::with_password("bastion", "ops", "sshpw"));

        let sealed = profile.seal(&vault).unwrap();
        assert!(Vault::is_encrypted(sealed.password.as_deref().unwrap()));
        assert_eq!(sealed.unseal(&vault).unwrap(), profile);
    }

    #[test]
    fn test_resolve_without_default_fails() {
        let (_dir, registry) = registry();
        assert!(registry.resolve(None).is_err());
    }
}
