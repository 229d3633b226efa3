// 库文件，导出模块
pub mod cli;
pub mod config;
pub mod credentials;
pub mod hive;
pub mod setup;
pub mod ssh;
pub mod transfer;
pub mod utils;

pub use config::{ConfigStore, Profile, StorePaths};
pub use ssh::{ExecOptions, Issho, SessionOptions};
pub use utils::error::{ErrorKind, IsshoError};

use anyhow::{Context, Result};
use cli::{Cli, Commands, SessionArgs};
use credentials::KeyringStore;
use hive::HiveOptions;
use setup::{ConfigRequest, Setup};
use ssh::ForwardSpec;

pub fn run(cli: Cli) -> Result<()> {
    let paths = match &cli.config_dir {
        Some(dir) => StorePaths::in_dir(utils::file::absolute_path(dir)),
        None => StorePaths::default_location(),
    };
    let store = ConfigStore::new(paths);
    let secrets = KeyringStore;
    let setup = Setup::new(&store, &secrets);
    let connect = |args: &SessionArgs, kinit: bool| {
        Issho::connect_with(&args.options(kinit), &store, &secrets)
            .with_context(|| format!("Cannot connect with profile '{}'", args.profile))
    };

    match cli.command {
        Commands::Config {
            profile,
            env,
            ssh_profile,
            ssh_config,
            rsa_id,
        } => {
            let status = setup.configure(&ConfigRequest {
                profile,
                env,
                ssh_profile,
                ssh_config,
                rsa_id,
            })?;
            println!("{}", status);
        }
        Commands::Env { env_name } => {
            let vars = setup.save_env(&env_name)?;
            println!("Saved environment '{}' ({} variables)", env_name, vars.len());
        }
        Commands::UpdateVariable {
            profile,
            variable,
            value,
        } => {
            setup.update_variable(&profile, &variable, &value)?;
            println!("Updated {} in profile '{}'", variable, profile);
        }
        Commands::TestConnection { profile, no_kinit } => {
            println!("{}", setup.test_connection(&profile, !no_kinit));
        }
        Commands::Exec {
            session,
            cmd,
            bg,
            debug,
        } => {
            let issho = connect(&session, true)?;
            let opts = ExecOptions {
                background: bg,
                capture_output: false,
                debug,
            };
            issho.exec(&cmd.join(" "), opts)?;
            issho.close()?;
        }
        Commands::Get {
            session,
            remote_path,
            local_path,
        } => {
            let issho = connect(&session, true)?;
            let local = issho.get(&remote_path, local_path.as_deref())?;
            println!("Downloaded {}", local.display());
            issho.close()?;
        }
        Commands::Put {
            session,
            local_path,
            remote_path,
        } => {
            let issho = connect(&session, true)?;
            let remote = issho.put(&local_path, remote_path.as_deref())?;
            println!("Uploaded {}", remote);
            issho.close()?;
        }
        Commands::Forward {
            session,
            remote_host,
            remote_port,
            local_host,
            local_port,
        } => {
            let issho = connect(&session, true)?;
            let spec = ForwardSpec::new(remote_host, remote_port).local(local_host, local_port);
            let mut forwarder = issho.local_forward_spec(spec)?;
            println!(
                "Forwarding {} -> {}:{}; press Enter to stop",
                forwarder.local_addr, forwarder.spec.remote_host, forwarder.spec.remote_port
            );
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            forwarder.stop();
            issho.close()?;
        }
        Commands::Kinit { session } => {
            let issho = connect(&session, false)?;
            issho.kinit()?;
            issho.close()?;
        }
        Commands::Hive {
            session,
            query,
            output,
            keep_blank_top_line,
        } => {
            let issho = connect(&session, true)?;
            let options = HiveOptions {
                output_filename: output,
                remove_blank_top_line: !keep_blank_top_line,
            };
            if let Some(local) = issho.hive(&query, &options)? {
                println!("Query output saved to {}", local.display());
            }
            issho.close()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_exec_with_trailing_command() {
        let cli = Cli::parse_from(["issho", "exec", "-p", "prod", "--bg", "ls", "-la", "/tmp"]);
        match cli.command {
            Commands::Exec {
                session, cmd, bg, ..
            } => {
                assert_eq!(session.profile, "prod");
                assert!(bg);
                assert_eq!(cmd.join(" "), "ls -la /tmp");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn forward_defaults() {
        let cli = Cli::parse_from(["issho", "forward", "db.internal", "5432"]);
        match cli.command {
            Commands::Forward {
                session,
                local_host,
                local_port,
                ..
            } => {
                assert_eq!(session.profile, "dev");
                assert_eq!(local_host, "0.0.0.0");
                assert_eq!(local_port, 44556);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn session_args_disable_kinit() {
        let cli = Cli::parse_from(["issho", "kinit", "--no-kinit"]);
        let Commands::Kinit { session } = cli.command else {
            panic!("expected kinit");
        };
        assert!(!session.options(true).kinit);

        let cli = Cli::parse_from(["issho", "get", "/a/b/file.txt"]);
        let Commands::Get { session, local_path, .. } = cli.command else {
            panic!("expected get");
        };
        assert!(session.options(true).kinit);
        assert!(local_path.is_none());
    }

    #[test]
    fn update_variable_command() {
        let cli = Cli::parse_from([
            "issho",
            "--config-dir",
            "/tmp/issho-test",
            "update-variable",
            "dev",
            "HIVE_OPTS",
            "--silent=true",
        ]);
        assert_eq!(cli.config_dir.as_deref(), Some(std::path::Path::new("/tmp/issho-test")));
        assert!(matches!(cli.command, Commands::UpdateVariable { ref value, .. } if value == "--silent=true"));
    }
}
