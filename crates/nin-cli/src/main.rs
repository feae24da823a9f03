//! nin CLI - peer-to-peer file and directory transfer
//!
//! One machine shares a file or a directory tree; any number of receivers
//! on the same network fetch it piece by piece.
//!
//! ## Quick Start
//!
//! ```bash
//! # Share a directory
//! nin send ./photos
//!
//! # Fetch it (on another machine)
//! nin listen --path ~/Downloads
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::struct_excessive_bools)]

use std::process::ExitCode;

use clap::Parser;

mod commands;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Send(args) => commands::send::run(args).await,
        Command::Listen(args) => commands::listen::run(args).await,
        Command::Config(args) => commands::config::run(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            commands::report_failure(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = if verbose {
        "info,nin=debug,nin_core=debug"
    } else {
        "warn,nin=info,nin_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
