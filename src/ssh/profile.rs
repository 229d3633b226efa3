// ~/.ssh/config 主机参数查找
use crate::utils::error::{IsshoError, Result};
use crate::utils::file::expand_tilde;
use ssh2_config::{ParseRule, SshConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

pub const DEFAULT_SSH_PORT: u16 = 22;

/// Effective settings for one host alias.
///
/// `hostname` and `user` stay `None` when no stanza provides them; see
/// [`HostParams::require`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostParams {
    pub hostname: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub identity_files: Vec<PathBuf>,
}

impl Default for HostParams {
    fn default() -> Self {
        HostParams {
            hostname: None,
            port: DEFAULT_SSH_PORT,
            user: None,
            identity_files: Vec::new(),
        }
    }
}

/// What is needed to open a TCP connection and authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub hostname: String,
    pub port: u16,
    pub user: String,
}

impl ConnectParams {
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

impl HostParams {
    pub fn require(&self, alias: &str) -> Result<ConnectParams> {
        let missing: Vec<&str> = [("HostName", &self.hostname), ("User", &self.user)]
            .into_iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| name)
            .collect();
        match (&self.hostname, &self.user) {
            (Some(hostname), Some(user)) => Ok(ConnectParams {
                hostname: hostname.clone(),
                port: self.port,
                user: user.clone(),
            }),
            _ => Err(IsshoError::invalid_config(format!(
                "ssh config has no {} for host '{}'",
                missing.join(" or "),
                alias
            ))),
        }
    }
}

/// Parses the ssh client config at `config_path` and looks up `alias`.
pub fn resolve<P: AsRef<Path>>(config_path: P, alias: &str) -> Result<HostParams> {
    let path = expand_tilde(config_path);
    let file = File::open(&path)?;
    let mut reader = BufReader::new(file);
    let config = SshConfig::default()
        .parse(&mut reader, ParseRule::ALLOW_UNSUPPORTED_FIELDS)
        .map_err(|e| IsshoError::invalid_config(format!("{}: {}", path.display(), e)))?;
    Ok(HostParams::from(config.query(alias)))
}

impl From<ssh2_config::HostParams> for HostParams {
    fn from(params: ssh2_config::HostParams) -> Self {
        HostParams {
            hostname: params.host_name,
            port: params.port.unwrap_or(DEFAULT_SSH_PORT),
            user: params.user,
            identity_files: params.identity_file.unwrap_or_default(),
        }
    }
}
