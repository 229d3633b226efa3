// SSH客户端封装
use crate::ssh::profile::ConnectParams;
use crate::utils::error::{IsshoError, Result};
use crate::utils::file::{absolute_path, ensure_parent_dir};
use log::{debug, info, warn};
use ssh2::{CheckResult, KnownHostFileKind, Session};
use std::io::prelude::*;
use std::io::BufReader;
use std::net::TcpStream;
use std::path::{Path, PathBuf};

/// Private key plus its (optional) passphrase.
#[derive(Clone)]
pub struct KeyAuth {
    pub key_path: PathBuf,
    pub passphrase: Option<String>,
}

impl std::fmt::Debug for KeyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyAuth")
            .field("key_path", &self.key_path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***"))
            .finish()
    }
}

pub struct SshClient {
    pub session: Session,
    pub params: ConnectParams,
}

impl SshClient {
    pub fn connect(params: &ConnectParams, auth: &KeyAuth) -> Result<Self> {
        debug!("Connecting to {}...", params.address());

        let tcp = TcpStream::connect(params.address())?;
        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;

        Self::check_host_key(&session, params)?;

        debug!(
            "Authenticating {} with key {}",
            params.user,
            auth.key_path.display()
        );
        session
            .userauth_pubkey_file(
                &params.user,
                None,
                &auth.key_path,
                auth.passphrase.as_deref(),
            )
            .map_err(|e| {
                IsshoError::auth_failed(format!(
                    "public key authentication as {} with {} failed: {}",
                    params.user,
                    auth.key_path.display(),
                    e
                ))
            })?;

        if !session.authenticated() {
            return Err(IsshoError::auth_failed(format!(
                "server did not accept {} for {}",
                auth.key_path.display(),
                params.user
            )));
        }

        info!("Connected to {}@{}", params.user, params.address());
        Ok(SshClient {
            session,
            params: params.clone(),
        })
    }

    // 首次连接自动信任主机密钥，之后密钥不匹配则拒绝
    fn check_host_key(session: &Session, params: &ConnectParams) -> Result<()> {
        let (key, key_type) = session
            .host_key()
            .ok_or_else(|| IsshoError::auth_failed("server sent no host key"))?;

        let path = known_hosts_path();
        let mut known_hosts = session.known_hosts()?;
        if path.exists() {
            known_hosts.read_file(&path, KnownHostFileKind::OpenSSH)?;
        }

        match known_hosts.check_port(&params.hostname, params.port, key) {
            CheckResult::Match => Ok(()),
            CheckResult::NotFound => {
                let host = if params.port == 22 {
                    params.hostname.clone()
                } else {
                    format!("[{}]:{}", params.hostname, params.port)
                };
                info!("Adding host key for {} to {}", host, path.display());
                known_hosts.add(&host, key, "added by issho", key_type.into())?;
                ensure_parent_dir(&path)?;
                known_hosts.write_file(&path, KnownHostFileKind::OpenSSH)?;
                Ok(())
            }
            CheckResult::Mismatch => Err(IsshoError::auth_failed(format!(
                "host key for {} does not match {}",
                params.address(),
                path.display()
            ))),
            CheckResult::Failure => Err(IsshoError::auth_failed(format!(
                "could not check host key for {}",
                params.address()
            ))),
        }
    }

    pub fn sftp(&self) -> Result<ssh2::Sftp> {
        Ok(self.session.sftp()?)
    }

    /// Runs `command`, copying stdout then stderr line by line to the given
    /// writers. `stdin` is written and closed before reading. Returns the
    /// remote exit status.
    pub fn exec_streaming(
        &self,
        command: &str,
        stdin: Option<&[u8]>,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<i32> {
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;

        if let Some(input) = stdin {
            channel.write_all(input)?;
        }
        channel.send_eof()?;

        let mut line = Vec::new();
        {
            let mut stdout = BufReader::new(&mut channel);
            while stdout.read_until(b'\n', &mut line)? > 0 {
                out.write_all(&line)?;
                line.clear();
            }
        }
        out.flush()?;

        let mut stderr = BufReader::new(channel.stderr());
        while stderr.read_until(b'\n', &mut line)? > 0 {
            err.write_all(&line)?;
            line.clear();
        }
        err.flush()?;

        channel.wait_close()?;
        let status = channel.exit_status()?;
        if status != 0 {
            warn!("Remote command exited with status {}", status);
        }
        Ok(status)
    }

    /// Dispatches `command` without reading its output.
    pub fn exec_detached(&self, command: &str) -> Result<()> {
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;
        channel.send_eof()?;
        // 命令已在远端脱离，shell 随即退出
        channel.wait_close()?;
        Ok(())
    }

    pub fn disconnect(&self) -> Result<()> {
        self.session.disconnect(None, "closed by issho", None)?;
        Ok(())
    }
}

fn known_hosts_path() -> PathBuf {
    absolute_path(Path::new("~/.ssh/known_hosts"))
}
