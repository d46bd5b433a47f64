use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use hdf_header::cli::Cli;
use hdf_header::output;
use hdf_header::query::{self, Hdf5Headers, Report};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let pattern = cli.pattern();
    let files = cli
        .files()
        .with_context(|| format!("invalid filename pattern {:?}", pattern))?;
    debug!(%pattern, files = files.len(), "expanded pattern");

    let mode = cli.mode();
    let report = query::run(&mode, &files, &Hdf5Headers)?;

    match (&report, &cli.outfile) {
        (Report::Matches(matches), Some(outfile)) if !matches.is_empty() => {
            output::write_matches(outfile, matches)
                .with_context(|| format!("cannot write {}", outfile.display()))?;
        }
        _ => println!("{}", output::render(&report, &mode, &pattern)),
    }
    Ok(())
}
