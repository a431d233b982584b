mod app;
mod commands;
mod output;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Batches finish the running modules on the first Ctrl+C; everything else exits at once
    let cancel = Arc::new(AtomicBool::new(false));
    let batch = matches!(cli.command, Command::Batch { .. });
    let handler_cancel = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        if batch && !handler_cancel.swap(true, Ordering::SeqCst) {
            eprintln!("\nCancelling, waiting for running modules...");
            return;
        }
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .context("failed to set Ctrl+C handler")?;

    // Show modcompat info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("modcompat", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Inspect {
            path,
            hosts,
            module,
        } => commands::inspect::run(path, hosts, module.as_deref(), &cli.global),
        Command::Check { path, session } => commands::check::run(path, session, &cli.global),
        Command::Rewrite {
            path,
            output,
            suffix,
            report,
            session,
        } => commands::rewrite::run(
            path,
            &commands::rewrite::RewriteOptions {
                output: output.as_deref(),
                suffix,
                report: report.as_deref(),
                session,
                global: &cli.global,
            },
        ),
        Command::Batch {
            dir,
            output_dir,
            recursive,
            detect_only,
            session,
        } => commands::batch::run(
            dir,
            &cancel,
            &commands::batch::BatchOptions {
                output_dir,
                recursive: *recursive,
                detect_only: *detect_only,
                session,
                global: &cli.global,
            },
        ),
    }
}
