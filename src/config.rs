// 配置管理：profile 与 environment 两个命名空间，各自一个 TOML 文件
use crate::utils::error::{IsshoError, Result};
use crate::utils::file::{absolute_path, ensure_parent_dir};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const SSH_CONFIG_PATH: &str = "SSH_CONFIG_PATH";
pub const RSA_ID_PATH: &str = "RSA_ID_PATH";
pub const SSH_PROFILE: &str = "SSH_PROFILE";
pub const HIVE_OPTS: &str = "HIVE_OPTS";
pub const HIVE_JDBC: &str = "HIVE_JDBC";
pub const SPARK_CONF: &str = "SPARK_CONF";

pub const DEFAULT_SSH_CONFIG: &str = "~/.ssh/config";
pub const DEFAULT_RSA_ID: &str = "~/.ssh/id_rsa";

/// A flat string-to-string section, as stored on disk.
pub type Vars = BTreeMap<String, String>;

/// A whole namespace file: one table per name.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct Document {
    sections: BTreeMap<String, Vars>,
}

/// Locations of the two backing documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub profiles: PathBuf,
    pub environments: PathBuf,
}

impl StorePaths {
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        StorePaths {
            profiles: dir.join("conf.toml"),
            environments: dir.join("envs.toml"),
        }
    }

    /// `~/.issho/{conf,envs}.toml`
    pub fn default_location() -> Self {
        Self::in_dir(absolute_path("~/.issho"))
    }
}

/// One namespace: a TOML document holding a table per name.
#[derive(Debug, Clone)]
pub struct KvStore {
    namespace: &'static str,
    path: PathBuf,
}

impl KvStore {
    pub fn new(namespace: &'static str, path: PathBuf) -> Self {
        KvStore { namespace, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self, name: &str) -> Result<Vars> {
        let mut document = self.load()?;
        document.sections.remove(name).ok_or_else(|| IsshoError::NotFound {
            namespace: self.namespace,
            name: name.to_string(),
            path: self.path.display().to_string(),
        })
    }

    /// Merges `vars` into the section `name`; keys not in `vars` are kept.
    pub fn write(&self, name: &str, vars: &Vars) -> Result<()> {
        let mut document = self.load()?;
        let section = document.sections.entry(name.to_string()).or_default();
        for (key, value) in vars {
            section.insert(key.clone(), value.clone());
        }
        self.save(&document)?;
        debug!("Saved {} '{}' to {}", self.namespace, name, self.path.display());
        Ok(())
    }

    pub fn names(&self) -> Result<Vec<String>> {
        Ok(self.load()?.sections.into_keys().collect())
    }

    fn load(&self) -> Result<Document> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Document::default()),
            Err(e) => return Err(e.into()),
        };
        toml::from_str(&content).map_err(|e| {
            IsshoError::invalid_config(format!("{}: {}", self.path.display(), e))
        })
    }

    fn save(&self, document: &Document) -> Result<()> {
        let content = toml::to_string(document).map_err(|e| {
            IsshoError::invalid_config(format!("{}: {}", self.path.display(), e))
        })?;
        ensure_parent_dir(&self.path)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

/// Profiles and environment bundles.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    profiles: KvStore,
    environments: KvStore,
}

impl ConfigStore {
    pub fn new(paths: StorePaths) -> Self {
        ConfigStore {
            profiles: KvStore::new("profile", paths.profiles),
            environments: KvStore::new("environment", paths.environments),
        }
    }

    pub fn profiles(&self) -> &KvStore {
        &self.profiles
    }

    pub fn environments(&self) -> &KvStore {
        &self.environments
    }

    pub fn profile(&self, name: &str) -> Result<Profile> {
        Ok(Profile::from_vars(name, self.profiles.read(name)?))
    }
}

/// Typed view over a stored profile section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub ssh_config_path: PathBuf,
    pub key_path: PathBuf,
    pub ssh_alias: String,
    pub vars: Vars,
}

impl Profile {
    pub fn from_vars(name: &str, vars: Vars) -> Self {
        let path_var = |key: &str, default: &str| {
            absolute_path(vars.get(key).map(String::as_str).unwrap_or(default))
        };
        Profile {
            name: name.to_string(),
            ssh_config_path: path_var(SSH_CONFIG_PATH, DEFAULT_SSH_CONFIG),
            key_path: path_var(RSA_ID_PATH, DEFAULT_RSA_ID),
            ssh_alias: vars
                .get(SSH_PROFILE)
                .filter(|alias| !alias.is_empty())
                .cloned()
                .unwrap_or_else(|| name.to_string()),
            vars,
        }
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Like [`Profile::var`], but a missing key is a configuration error.
    pub fn require_var(&self, key: &str) -> Result<&str> {
        self.var(key).ok_or_else(|| {
            IsshoError::invalid_config(format!(
                "profile '{}' has no {} set; run `issho update-variable {} {} <value>`",
                self.name, key, self.name, key
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn store_in(dir: &Path) -> ConfigStore {
        ConfigStore::new(StorePaths::in_dir(dir.join("issho")))
    }

    #[test]
    fn write_then_read_returns_written_vars() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let written = vars(&[("HIVE_OPTS", "--silent"), ("RSA_ID_PATH", "/k/id_rsa")]);

        store.profiles().write("dev", &written).unwrap();

        assert_eq!(store.profiles().read("dev").unwrap(), written);
        assert!(store.profiles().path().exists());
    }

    #[test]
    fn partial_write_keeps_existing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .profiles()
            .write("dev", &vars(&[("A", "1"), ("B", "2")]))
            .unwrap();

        store.profiles().write("dev", &vars(&[("B", "3"), ("C", "4")])).unwrap();

        assert_eq!(
            store.profiles().read("dev").unwrap(),
            vars(&[("A", "1"), ("B", "3"), ("C", "4")])
        );
    }

    #[test]
    fn writing_one_profile_leaves_others_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.profiles().write("dev", &vars(&[("A", "1")])).unwrap();
        store.profiles().write("prod", &vars(&[("A", "2")])).unwrap();

        assert_eq!(store.profiles().read("dev").unwrap(), vars(&[("A", "1")]));
        assert_eq!(store.profiles().names().unwrap(), vec!["dev", "prod"]);
    }

    #[test]
    fn reading_absent_profile_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.profiles().write("dev", &vars(&[("A", "1")])).unwrap();

        let err = store.profiles().read("staging").unwrap_err();
        assert_eq!(err.kind(), crate::utils::error::ErrorKind::NotFound);

        // 文件不存在时同样是 NotFound
        let empty = store_in(&dir.path().join("elsewhere"));
        assert!(matches!(
            empty.profiles().read("dev"),
            Err(IsshoError::NotFound { .. })
        ));
    }

    #[test]
    fn environments_are_a_separate_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.environments().write("hadoop", &vars(&[("HIVE_OPTS", "-x")])).unwrap();

        assert!(store.profiles().read("hadoop").is_err());
        assert_eq!(
            store.environments().read("hadoop").unwrap(),
            vars(&[("HIVE_OPTS", "-x")])
        );
    }

    #[test]
    fn reads_hand_written_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        ensure_parent_dir(store.profiles().path()).unwrap();
        fs::write(
            store.profiles().path(),
            "[dev]\nHIVE_OPTS = \"--silent\"\n\n[prod]\nSSH_PROFILE = \"prod-box\"\n",
        )
        .unwrap();

        assert_eq!(store.profiles().names().unwrap(), vec!["dev", "prod"]);
        assert_eq!(store.profile("prod").unwrap().ssh_alias, "prod-box");
        assert_eq!(
            store.profiles().read("dev").unwrap(),
            vars(&[("HIVE_OPTS", "--silent")])
        );
    }

    #[test]
    fn malformed_document_is_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        ensure_parent_dir(store.profiles().path()).unwrap();
        fs::write(store.profiles().path(), "[dev]\nA = 1\n").unwrap();

        let err = store.profiles().read("dev").unwrap_err();
        assert_eq!(err.kind(), crate::utils::error::ErrorKind::InvalidConfig);
    }

    #[test]
    fn profile_defaults_alias_and_paths() {
        let profile = Profile::from_vars("dev", vars(&[(SSH_CONFIG_PATH, "/etc/ssh/cfg")]));
        assert_eq!(profile.ssh_alias, "dev");
        assert_eq!(profile.ssh_config_path, PathBuf::from("/etc/ssh/cfg"));
        assert!(profile.key_path.ends_with(".ssh/id_rsa"));
        assert!(profile.require_var(HIVE_JDBC).is_err());

        let aliased = Profile::from_vars("work", vars(&[(SSH_PROFILE, "dev-box")]));
        assert_eq!(aliased.ssh_alias, "dev-box");
    }
}
