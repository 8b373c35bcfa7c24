use std::process::ExitCode;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod api;
mod auth;
mod cli;
mod error;
mod explain_cmd;
mod influx;
mod reconcile_cmd;
mod shared;
mod sync_cmd;
mod verify_cmd;

use cli::{Cli, Commands};
use error::{CliResult, output_format_hint, parse_output_format, render_error};
use explain_cmd::run_explain;
use reconcile_cmd::run_reconcile;
use sync_cmd::run_sync;
use verify_cmd::run_verify;

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "wattsync=debug,wattsync_core=debug"
    } else {
        "wattsync=info,wattsync_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Resolve the output format, then run the command and render any error.
async fn finish<F>(format: &str, run: impl FnOnce(error::OutputFormat) -> F) -> ExitCode
where
    F: std::future::Future<Output = CliResult<ExitCode>>,
{
    let fallback = output_format_hint(format);
    let output_format = match parse_output_format(format) {
        Ok(format) => format,
        Err(err) => return render_error(&err, fallback),
    };

    match run(output_format).await {
        Ok(code) => code,
        Err(err) => render_error(&err, output_format),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    debug!("Parsed CLI args: {:?}", cli.command);

    match cli.command {
        Commands::Sync(args) => {
            let format = args.output_format.clone();
            finish(&format, |f| run_sync(args, f)).await
        }
        Commands::Reconcile(args) => {
            let format = args.output_format.clone();
            finish(&format, |f| async move { run_reconcile(args, f) }).await
        }
        Commands::Explain(args) => {
            let format = args.output_format.clone();
            finish(&format, |f| async move { run_explain(args, f) }).await
        }
        Commands::Verify(args) => {
            let format = args.output_format.clone();
            finish(&format, |f| run_verify(args, f)).await
        }
    }
}
