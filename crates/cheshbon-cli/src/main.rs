use std::process::ExitCode;

use clap::Parser;

mod args;
mod cmd;
mod io;
mod output;

fn main() -> ExitCode {
    let cli = args::Cli::parse();
    match cmd::dispatch(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            output::eprintln_line(&format!("error: {e:#}"));
            ExitCode::from(2)
        }
    }
}
