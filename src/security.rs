use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{Context, Result};
use rand::RngCore;
use secrecy::SecretString;
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, ZeroizeOnDrop};

const VAULT_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Prefix marking a stored value as vault ciphertext.
pub const ENCRYPTED_PREFIX: &str = "enc:";

#[derive(Zeroize, ZeroizeOnDrop)]
struct VaultKey(Vec<u8>);

/// Symmetric encryption for credentials stored in `servers.toml`.
pub struct Vault {
    key: VaultKey,
}

impl Vault {
    pub fn key_path() -> PathBuf {
        crate::config::data_dir().join("secret.key")
    }

    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_at(&Self::key_path())
    }

    /// Read the key file, generating one (mode 0600) on first use.
    pub fn load_or_create_at(path: &Path) -> Result<Self> {
        if path.exists() {
            let bytes = fs::read(path)
                .with_context(|| format!("Failed to read vault key: {:?}", path))?;
            if bytes.len() != VAULT_KEY_LEN {
                return Err(anyhow::anyhow!(
                    "Vault key at {:?} is corrupt (expected {} bytes, found {})",
                    path,
                    VAULT_KEY_LEN,
                    bytes.len()
                ));
            }
            return Ok(Self { key: VaultKey(bytes) });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut key_bytes = [0u8; VAULT_KEY_LEN];
        rand::rng().fill_bytes(&mut key_bytes);
        fs::write(path, key_bytes)
            .with_context(|| format!("Failed to write vault key: {:?}", path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }

        let key = VaultKey(key_bytes.to_vec());
        key_bytes.zeroize();
        Ok(Self { key })
    }

    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(ENCRYPTED_PREFIX)
    }

    /// Encrypt a secret into `enc:<hex(nonce || ciphertext)>`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let key = Key::<Aes256Gcm>::from_slice(&self.key.0);
        let cipher = Aes256Gcm::new(key);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("Encryption failure: {}", e))?;

        let mut blob = nonce_bytes.to_vec();
        blob.extend(ciphertext);
        Ok(format!("{}{}", ENCRYPTED_PREFIX, hex::encode(blob)))
    }

    /// Decrypt a stored value. Values without the prefix are treated as
    /// legacy plaintext and returned as-is.
    pub fn decrypt(&self, stored: &str) -> Result<SecretString> {
        let Some(encoded) = stored.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(SecretString::from(stored.to_string()));
        };

        let blob = hex::decode(encoded).context("Stored credential is not valid hex")?;
        if blob.len() < NONCE_LEN {
            return Err(anyhow::anyhow!("Invalid ciphertext length"));
        }

        let nonce = Nonce::from_slice(&blob[..NONCE_LEN]);
        let key = Key::<Aes256Gcm>::from_slice(&self.key.0);
        let cipher = Aes256Gcm::new(key);

        let mut plaintext = cipher
            .decrypt(nonce, &blob[NONCE_LEN..])
            .map_err(|e| anyhow::anyhow!("Decryption failure: {}", e))?;

        let text = String::from_utf8(plaintext.clone()).context("Decrypted credential is not UTF-8");
        plaintext.zeroize();
        Ok(SecretString::from(text?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_encrypt_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::load_or_create_at(&dir.path().join("secret.key")).unwrap();

        let stored = vault.encrypt("hunter2").unwrap();
        assert!(Vault::is_encrypted(&stored));
        assert!(!stored.contains("hunter2"));
        assert_eq!(vault.decrypt(&stored).unwrap().expose_secret(), "hunter2");
    }

    #[test]
    fn test_key_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");
        let stored = Vault::load_or_create_at(&path).unwrap().encrypt("s3cret").unwrap();

        let reopened = Vault::load_or_create_at(&path).unwrap();
        assert_eq!(reopened.decrypt(&stored).unwrap().expose_secret(), "s3cret");
    }

    #[test]
    fn test_plaintext_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::load_or_create_at(&dir.path().join("secret.key")).unwrap();
        assert_eq!(vault.decrypt("legacy").unwrap().expose_secret(), "legacy");
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::load_or_create_at(&dir.path().join("secret.key")).unwrap();
        let mut stored = vault.encrypt("abc").unwrap();
        let last = stored.pop().unwrap();
        stored.push(if last == '0' { '1' } else { '0' });
        assert!(vault.decrypt(&stored).is_err());
    }

    #[test]
    fn test_corrupt_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");
        fs::write(&path, b"short").unwrap();
        assert!(Vault::load_or_create_at(&path).is_err());
    }
}
