use std::process::ExitCode;

use cbs_cli::{init_tracing, run, Cli};
use clap::Parser;

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let stdout = std::io::stdout();
    let valid = run(&cli, &mut stdout.lock())?;
    Ok(if valid { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
