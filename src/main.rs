//! `gamrelay` - bulk Google Workspace administration over GAM.
//!
//! See `DESIGN.md` for architecture.

use anyhow::Result;
use clap::Parser;

use gamrelay::cli::{Cli, Command};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.global.settings()?;
    gamrelay::logging::init(cli.global.log_level(), settings.log_file.as_deref())?;

    let exit_code = match cli.command {
        Command::Schema => {
            let schema = gamrelay::model::generate_schema();
            println!("{}", schema);
            0
        }
        Command::Check => gamrelay::engine::check(&settings)?,
        Command::List(args) => gamrelay::engine::list(&settings, args)?,
        Command::Run(args) => gamrelay::engine::run(&settings, args)?,
        Command::ScanAcls(args) => gamrelay::engine::scan(&settings, args)?,
    };
    std::process::exit(exit_code);
}
