// 远程会话：一个已认证的连接 + 缓存的远端家目录
use crate::config::{ConfigStore, Profile, StorePaths, HIVE_JDBC, HIVE_OPTS};
use crate::credentials::{Credentials, KeyringStore, SecretStore};
use crate::hive::{self, HiveOptions, RemoteFiles};
use crate::ssh::client::{KeyAuth, SshClient};
use crate::ssh::forward::{ForwardSpec, LocalForwarder};
use crate::ssh::profile::{self, ConnectParams};
use crate::transfer::{self, Progress, ProgressTracker};
use crate::utils::error::Result;
use crate::utils::file::absolute_path;
use log::{debug, info, warn};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// How to build an [`Issho`] session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub profile: String,
    /// Overrides the profile's `RSA_ID_PATH`.
    pub key_path: Option<PathBuf>,
    /// Overrides the profile's `SSH_CONFIG_PATH`.
    pub ssh_config_path: Option<PathBuf>,
    pub kinit: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            profile: "dev".to_string(),
            key_path: None,
            ssh_config_path: None,
            kinit: true,
        }
    }
}

impl SessionOptions {
    pub fn new(profile: impl Into<String>) -> Self {
        SessionOptions {
            profile: profile.into(),
            ..Default::default()
        }
    }

    pub fn kinit(mut self, kinit: bool) -> Self {
        self.kinit = kinit;
        self
    }

    pub fn key_path(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    pub fn ssh_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssh_config_path = Some(path.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Detach the command on the remote side and return right after dispatch.
    pub background: bool,
    /// Return stdout instead of streaming it.
    pub capture_output: bool,
    /// Echo the final command line to stderr before running it.
    pub debug: bool,
}

/// Everything resolved locally before the first network round trip.
#[derive(Debug)]
struct Prepared {
    profile: Profile,
    params: ConnectParams,
    auth: KeyAuth,
    kinit_password: Option<String>,
}

fn prepare(
    options: &SessionOptions,
    store: &ConfigStore,
    secrets: &dyn SecretStore,
) -> Result<Prepared> {
    let mut profile = store.profile(&options.profile)?;
    if let Some(path) = &options.ssh_config_path {
        profile.ssh_config_path = absolute_path(path);
    }
    if let Some(path) = &options.key_path {
        profile.key_path = absolute_path(path);
    }

    let host = profile::resolve(&profile.ssh_config_path, &profile.ssh_alias)?;
    let params = host.require(&profile.ssh_alias)?;
    debug!("Profile '{}' resolves to {:?}", profile.name, params);

    let credentials = Credentials::new(secrets);
    let passphrase = credentials.ssh_passphrase(&profile.key_path, &profile.name)?;
    let kinit_password = if options.kinit {
        Some(credentials.kinit_password(&profile.name)?)
    } else {
        None
    };

    Ok(Prepared {
        auth: KeyAuth {
            key_path: profile.key_path.clone(),
            passphrase,
        },
        profile,
        params,
        kinit_password,
    })
}

/// One authenticated connection to the profile's host.
pub struct Issho {
    profile: Profile,
    params: ConnectParams,
    auth: KeyAuth,
    client: SshClient,
    remote_home: String,
}

impl Issho {
    /// Connects using the default config location and the platform keyring.
    pub fn connect(options: &SessionOptions) -> Result<Self> {
        let store = ConfigStore::new(StorePaths::default_location());
        Self::connect_with(options, &store, &KeyringStore)
    }

    pub fn connect_with(
        options: &SessionOptions,
        store: &ConfigStore,
        secrets: &dyn SecretStore,
    ) -> Result<Self> {
        let prepared = prepare(options, store, secrets)?;
        let client = SshClient::connect(&prepared.params, &prepared.auth)?;

        let mut session = Issho {
            profile: prepared.profile,
            params: prepared.params,
            auth: prepared.auth,
            client,
            remote_home: String::new(),
        };
        if let Some(password) = prepared.kinit_password {
            session.run_kinit(&password)?;
        }
        session.remote_home = session.detect_remote_home_dir();
        Ok(session)
    }

    // 通过 echo $HOME 获取远端家目录，失败时回退到 /home/<user>
    fn detect_remote_home_dir(&self) -> String {
        match self.get_output("echo $HOME") {
            Ok(output) if !output.trim().is_empty() => {
                let home = output.trim().to_string();
                debug!("Detected remote home directory: {}", home);
                home
            }
            Ok(_) => self.default_home(),
            Err(e) => {
                warn!("Could not detect remote home directory: {}", e);
                self.default_home()
            }
        }
    }

    fn default_home(&self) -> String {
        format!("/home/{}", self.params.user)
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    pub fn remote_home(&self) -> &str {
        &self.remote_home
    }

    /// The underlying `ssh2` session, for anything not wrapped here.
    pub fn session(&self) -> &ssh2::Session {
        &self.client.session
    }

    /// Runs `cmd` in a non-interactive login shell, streaming to this
    /// process's stdout/stderr.
    pub fn exec(&self, cmd: &str, opts: ExecOptions) -> Result<String> {
        let mut stdout = io::stdout().lock();
        let mut stderr = io::stderr().lock();
        self.exec_to(cmd, opts, &mut stdout, &mut stderr)
    }

    /// Like [`Issho::exec`] with explicit output streams. Stderr always goes
    /// to `err`; stdout goes to `out` unless it is captured and returned.
    pub fn exec_to(
        &self,
        cmd: &str,
        opts: ExecOptions,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<String> {
        if opts.background {
            let wrapped = background_command(cmd);
            if opts.debug {
                writeln!(err, "{}", wrapped)?;
            }
            self.client.exec_detached(&wrapped)?;
            return Ok(String::new());
        }

        if opts.debug {
            writeln!(err, "{}", cmd)?;
        }
        if opts.capture_output {
            let mut captured = Vec::new();
            self.client.exec_streaming(cmd, None, &mut captured, err)?;
            Ok(String::from_utf8_lossy(&captured).into_owned())
        } else {
            self.client.exec_streaming(cmd, None, out, err)?;
            Ok(String::new())
        }
    }

    pub fn exec_bg(&self, cmd: &str) -> Result<()> {
        self.exec(
            cmd,
            ExecOptions {
                background: true,
                ..Default::default()
            },
        )?;
        Ok(())
    }

    pub fn get_output(&self, cmd: &str) -> Result<String> {
        self.exec(
            cmd,
            ExecOptions {
                capture_output: true,
                ..Default::default()
            },
        )
    }

    /// Downloads one file, showing a progress bar. Returns the local path.
    pub fn get(&self, remote: &str, local: Option<&Path>) -> Result<PathBuf> {
        let tracker = ProgressTracker::new(0, &format!("get {}", remote));
        let result = self.get_with_progress(remote, local, &mut |done, total| {
            tracker.report(done, total)
        });
        finish(&tracker, &result);
        result
    }

    pub fn get_with_progress(
        &self,
        remote: &str,
        local: Option<&Path>,
        progress: Progress<'_>,
    ) -> Result<PathBuf> {
        let paths = transfer::transfer_paths(local, Some(remote), &self.remote_home)?;
        let sftp = self.client.sftp()?;
        transfer::download(&sftp, &paths.remote, &paths.local, progress)?;
        info!("Downloaded {} -> {}", paths.remote, paths.local.display());
        Ok(paths.local)
    }

    /// Uploads one file, showing a progress bar. Returns the remote path.
    pub fn put(&self, local: &Path, remote: Option<&str>) -> Result<String> {
        let tracker = ProgressTracker::new(0, &format!("put {}", local.display()));
        let result = self.put_with_progress(local, remote, &mut |done, total| {
            tracker.report(done, total)
        });
        finish(&tracker, &result);
        result
    }

    pub fn put_with_progress(
        &self,
        local: &Path,
        remote: Option<&str>,
        progress: Progress<'_>,
    ) -> Result<String> {
        let paths = transfer::transfer_paths(Some(local), remote, &self.remote_home)?;
        let sftp = self.client.sftp()?;
        transfer::upload(&sftp, &paths.local, &paths.remote, progress)?;
        info!("Uploaded {} -> {}", paths.local.display(), paths.remote);
        Ok(paths.remote)
    }

    /// Listens on `0.0.0.0:44556` and tunnels to `remote_host:remote_port`.
    pub fn local_forward(&self, remote_host: &str, remote_port: u16) -> Result<LocalForwarder> {
        self.local_forward_spec(ForwardSpec::new(remote_host, remote_port))
    }

    /// The forwarder uses a connection of its own and outlives nothing: the
    /// caller stops it.
    pub fn local_forward_spec(&self, spec: ForwardSpec) -> Result<LocalForwarder> {
        LocalForwarder::start(&self.params, &self.auth, spec)
    }

    /// Runs `kinit` with the password stored in the platform keyring.
    pub fn kinit(&self) -> Result<()> {
        self.kinit_with(&KeyringStore)
    }

    pub fn kinit_with(&self, secrets: &dyn SecretStore) -> Result<()> {
        let password = Credentials::new(secrets).kinit_password(&self.profile.name)?;
        self.run_kinit(&password)
    }

    // 密码经由 stdin 传入，不出现在远端命令行里
    fn run_kinit(&self, password: &str) -> Result<()> {
        let input = format!("{}\n", password);
        let mut stdout = io::stdout().lock();
        let mut stderr = io::stderr().lock();
        let status =
            self.client
                .exec_streaming("kinit", Some(input.as_bytes()), &mut stdout, &mut stderr)?;
        if status == 0 {
            info!("kinit succeeded for profile '{}'", self.profile.name);
        }
        Ok(())
    }

    /// Runs a Hive query (inline text or a `.sql`/`.hql` file) with beeline,
    /// using the profile's `HIVE_OPTS` and `HIVE_JDBC`. Returns the local
    /// output file when one was requested.
    pub fn hive(&self, query: &str, options: &HiveOptions) -> Result<Option<PathBuf>> {
        let opts = self.profile.var(HIVE_OPTS).unwrap_or_default().to_string();
        let jdbc = self.profile.require_var(HIVE_JDBC)?.to_string();

        let staged = hive::stage_query(query)?;
        let files = RemoteFiles::new();
        self.put(staged.path(), Some(files.query.as_str()))?;

        let output = options.output_filename.as_ref().map(|_| files.output.as_str());
        let run = || -> Result<Option<PathBuf>> {
            self.exec(
                &hive::beeline_command(&opts, &jdbc, &files.query, output),
                ExecOptions::default(),
            )?;
            match &options.output_filename {
                Some(local) => {
                    if options.remove_blank_top_line {
                        self.get_output(&hive::strip_blank_top_line_command(&files.output))?;
                    }
                    Ok(Some(self.get(&files.output, Some(local.as_path()))?))
                }
                None => Ok(None),
            }
        };

        with_cleanup(run, || {
            self.get_output(&hive::cleanup_command(&files)).map(|_| ())
        })
    }

    pub fn close(self) -> Result<()> {
        self.client.disconnect()
    }
}

fn finish<T>(tracker: &ProgressTracker, result: &Result<T>) {
    match result {
        Ok(_) => tracker.finish(),
        Err(e) => tracker.finish_with_error(&e.to_string()),
    }
}

// 无论 work 成败都执行 cleanup；两者都失败时返回 work 的错误
fn with_cleanup<T>(
    work: impl FnOnce() -> Result<T>,
    cleanup: impl FnOnce() -> Result<()>,
) -> Result<T> {
    let result = work();
    match (result, cleanup()) {
        (Ok(value), Ok(())) => Ok(value),
        (Err(e), cleaned) => {
            if let Err(cleanup_err) = cleaned {
                warn!("Cleanup after a failed step also failed: {}", cleanup_err);
            }
            Err(e)
        }
        (Ok(_), Err(e)) => Err(e),
    }
}

/// Wraps `cmd` so it detaches from the remote shell and survives the session.
pub fn background_command(cmd: &str) -> String {
    format!(
        r#"cmd=$"{}"; nohup bash -c "$cmd" > /dev/null 2>&1 &"#,
        cmd.replace('"', r#"\""#)
    )
}
