// 密钥口令与服务密码的查找，按 (service, account) 存放在系统钥匙串
use crate::utils::error::{IsshoError, Result};
use crate::utils::file::absolute_path;
use keyring::Entry;
use log::debug;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

pub const KINIT: &str = "kinit";
pub const SSH: &str = "ssh";

/// Backend holding `(service, account) -> secret` entries.
pub trait SecretStore {
    fn get(&self, service: &str, account: &str) -> Result<Option<String>>;
    fn set(&self, service: &str, account: &str, secret: &str) -> Result<()>;
}

/// Platform credential store (Keychain, Credential Manager, Secret Service).
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringStore;

impl SecretStore for KeyringStore {
    fn get(&self, service: &str, account: &str) -> Result<Option<String>> {
        let entry = Entry::new(service, account)?;
        match entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, service: &str, account: &str, secret: &str) -> Result<()> {
        Entry::new(service, account)?.set_password(secret)?;
        Ok(())
    }
}

/// Process-local store; nothing is persisted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl SecretStore for MemoryStore {
    fn get(&self, service: &str, account: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get(&(service.to_string(), account.to_string()))
            .cloned())
    }

    fn set(&self, service: &str, account: &str, secret: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            (service.to_string(), account.to_string()),
            secret.to_string(),
        );
        Ok(())
    }
}

/// `(service, account)` address of one secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretName {
    pub kind: String,
    pub service: String,
    pub account: String,
}

/// Profile-scoped secret, e.g. `kinit_dev` owned by the local user.
pub fn profile_secret(kind: &str, profile: &str, owner: &str) -> SecretName {
    SecretName {
        kind: kind.to_string(),
        service: format!("{}_{}", kind, profile),
        account: owner.to_string(),
    }
}

/// Passphrase entry for a private key file.
///
/// The path is normalized first, so every spelling of the same file maps to
/// the same entry.
pub fn key_secret<P: AsRef<Path>>(key_path: P) -> SecretName {
    let normalized = absolute_path(key_path).to_string_lossy().into_owned();
    SecretName {
        kind: SSH.to_string(),
        service: normalized
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect(),
        account: normalized,
    }
}

pub fn local_user() -> String {
    whoami::username()
}

/// Typed access to the secrets this tool needs.
pub struct Credentials<'a> {
    backend: &'a dyn SecretStore,
}

impl<'a> Credentials<'a> {
    pub fn new(backend: &'a dyn SecretStore) -> Self {
        Credentials { backend }
    }

    pub fn lookup(&self, name: &SecretName) -> Result<Option<String>> {
        debug!("Looking up {} secret {}/{}", name.kind, name.service, name.account);
        self.backend.get(&name.service, &name.account)
    }

    pub fn store(&self, name: &SecretName, secret: &str) -> Result<()> {
        debug!("Storing {} secret {}/{}", name.kind, name.service, name.account);
        self.backend.set(&name.service, &name.account, secret)
    }

    /// Passphrase for `key_path`; `Ok(None)` means the key is unencrypted.
    pub fn ssh_passphrase(&self, key_path: &Path, profile: &str) -> Result<Option<String>> {
        let name = key_secret(key_path);
        let secret = self.require(&name, profile)?;
        Ok(Some(secret).filter(|s| !s.is_empty()))
    }

    pub fn kinit_password(&self, profile: &str) -> Result<String> {
        let name = profile_secret(KINIT, profile, &local_user());
        let password = self.require(&name, profile)?;
        if password.is_empty() {
            return Err(missing(&name, profile));
        }
        Ok(password)
    }

    fn require(&self, name: &SecretName, profile: &str) -> Result<String> {
        self.lookup(name)?.ok_or_else(|| missing(name, profile))
    }
}

fn missing(name: &SecretName, profile: &str) -> IsshoError {
    IsshoError::MissingSecret {
        kind: name.kind.clone(),
        service: name.service.clone(),
        account: name.account.clone(),
        hint: format!(
            "Run `issho config {}` to store it in your keyring.",
            profile
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::ErrorKind;

    #[test]
    fn profile_secret_names() {
        let name = profile_secret(KINIT, "dev", "alice");
        assert_eq!(name.service, "kinit_dev");
        assert_eq!(name.account, "alice");
    }

    #[test]
    fn key_secret_is_stable_across_spellings() {
        let a = key_secret("/home/alice/.ssh/id_rsa");
        let b = key_secret("/home/alice/.ssh//./id_rsa/");
        let c = key_secret("/home/alice/tmp/../.ssh/id_rsa");
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.service, "homealicesshidrsa");
        assert_eq!(a.account, "/home/alice/.ssh/id_rsa");
    }

    #[test]
    fn missing_passphrase_is_actionable() {
        let store = MemoryStore::default();
        let creds = Credentials::new(&store);

        let err = creds
            .ssh_passphrase(Path::new("/keys/id_rsa"), "dev")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(err.to_string().contains("issho config dev"));
    }

    #[test]
    fn empty_passphrase_means_unencrypted_key() {
        let store = MemoryStore::default();
        let creds = Credentials::new(&store);
        creds.store(&key_secret("/keys/id_rsa"), "").unwrap();
        assert_eq!(creds.ssh_passphrase(Path::new("/keys/id_rsa"), "dev").unwrap(), None);

        creds.store(&key_secret("/keys/id_rsa"), "hunter2").unwrap();
        assert_eq!(
            creds.ssh_passphrase(Path::new("/keys/id_rsa"), "dev").unwrap(),
            Some("hunter2".to_string())
        );
    }

    #[test]
    fn kinit_password_round_trip_through_store() {
        let store = MemoryStore::default();
        let creds = Credentials::new(&store);
        assert!(matches!(
            creds.kinit_password("dev"),
            Err(IsshoError::MissingSecret { .. })
        ));

        creds
            .store(&profile_secret(KINIT, "dev", &local_user()), "s3cret")
            .unwrap();
        assert_eq!(creds.kinit_password("dev").unwrap(), "s3cret");
        assert!(creds.kinit_password("prod").is_err());
    }
}
