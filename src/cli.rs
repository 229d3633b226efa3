// 命令行参数解析
use crate::ssh::SessionOptions;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "issho")]
#[command(about = "Simple connections to a remote machine over SSH")]
#[command(version)]
pub struct Cli {
    /// Directory holding conf.toml and envs.toml (default: ~/.issho)
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Configure a profile; secrets go to the local keyring
    Config {
        /// Name of the profile to configure
        profile: String,
        /// Saved environment to take variables from
        #[arg(long)]
        env: Option<String>,
        /// ssh config host alias (defaults to the profile name)
        #[arg(long)]
        ssh_profile: Option<String>,
        /// ssh config file for this profile
        #[arg(long, default_value = "~/.ssh/config")]
        ssh_config: String,
        /// Private key for this profile
        #[arg(long, default_value = "~/.ssh/id_rsa")]
        rsa_id: String,
    },
    /// Save a named set of environment variables
    Env {
        env_name: String,
    },
    /// Set or add a single profile variable
    UpdateVariable {
        profile: String,
        variable: String,
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
    /// Connect with a profile and report the result
    TestConnection {
        profile: String,
        /// Skip kinit
        #[arg(long)]
        no_kinit: bool,
    },
    /// Run a command on the remote
    Exec {
        #[command(flatten)]
        session: SessionArgs,
        /// Command line to run in a non-interactive login shell
        #[arg(required = true, trailing_var_arg = true)]
        cmd: Vec<String>,
        /// Detach the command and return immediately
        #[arg(long)]
        bg: bool,
        /// Print the command before running it
        #[arg(long)]
        debug: bool,
    },
    /// Download a file from the remote
    Get {
        #[command(flatten)]
        session: SessionArgs,
        remote_path: String,
        /// Defaults to the remote file name
        local_path: Option<PathBuf>,
    },
    /// Upload a file to the remote
    Put {
        #[command(flatten)]
        session: SessionArgs,
        local_path: PathBuf,
        /// Defaults to the local file name
        remote_path: Option<String>,
    },
    /// Forward a local port through the remote until Enter is pressed
    Forward {
        #[command(flatten)]
        session: SessionArgs,
        remote_host: String,
        remote_port: u16,
        #[arg(long, default_value = "0.0.0.0")]
        local_host: String,
        #[arg(long, default_value_t = 44556)]
        local_port: u16,
    },
    /// Run kinit on the remote with the stored password
    Kinit {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Run a Hive query (text, or a .sql/.hql file) with beeline
    Hive {
        #[command(flatten)]
        session: SessionArgs,
        query: String,
        /// Download the query output to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Keep the blank first line beeline prints
        #[arg(long)]
        keep_blank_top_line: bool,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct SessionArgs {
    /// Profile to connect with
    #[arg(short, long, default_value = "dev")]
    pub profile: String,
    /// Override the profile's private key
    #[arg(long)]
    pub key_file: Option<PathBuf>,
    /// Override the profile's ssh config file
    #[arg(long)]
    pub ssh_config: Option<PathBuf>,
    /// Skip kinit after connecting
    #[arg(long)]
    pub no_kinit: bool,
}

impl SessionArgs {
    /// `kinit` is what the command wants; `--no-kinit` can only turn it off.
    pub fn options(&self, kinit: bool) -> SessionOptions {
        SessionOptions {
            profile: self.profile.clone(),
            key_path: self.key_file.clone(),
            ssh_config_path: self.ssh_config.clone(),
            kinit: kinit && !self.no_kinit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_args_map_to_options() {
        let cli = Cli::parse_from([
            "issho",
            "put",
            "-p",
            "prod",
            "--key-file",
            "/keys/id_rsa",
            "--ssh-config",
            "/etc/ssh/cfg",
            "local.txt",
        ]);
        let Commands::Put { session, .. } = cli.command else {
            panic!("expected put");
        };
        let options = session.options(true);
        assert_eq!(options.profile, "prod");
        assert_eq!(options.key_path, Some(PathBuf::from("/keys/id_rsa")));
        assert_eq!(options.ssh_config_path, Some(PathBuf::from("/etc/ssh/cfg")));
        assert!(options.kinit);
        assert!(!session.options(false).kinit);
    }
}
