use anyhow::Result;
use clap::Parser;
use issho::{cli::Cli, run};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if let Err(e) = run(cli) {
        eprintln!("\n❌ {:#}\n", e);
        std::process::exit(1);
    }

    Ok(())
}
