use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use p4sweep::cli::Cli;
use p4sweep::{
    DeletionRecord, DeletionStatus, SweepConfig, SweepProgress, SweepSummary, Sweeper, SyncRecord,
    SyncStatus,
};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "p4sweep=debug" } else { "p4sweep=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Returns whether the sweep finished without errors.
fn run(cli: &Cli) -> Result<bool> {
    let config = SweepConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let options = cli.to_options(&config);

    let handle = Sweeper::spawn(options).context("Failed to start sweep worker")?;
    let progress = handle.progress().clone();

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} digests {msg}")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );

    while !handle.is_finished() {
        update_bar(&bar, &progress);
        print_records(&bar, &progress);
        thread::sleep(POLL_INTERVAL);
    }

    let summary = handle.join();
    update_bar(&bar, &progress);
    print_records(&bar, &progress);
    bar.finish_with_message(progress.status());

    let errors = progress.drain_errors();
    for error in &errors {
        eprintln!("{} {}", "error:".red().bold(), error);
    }

    if let Some(summary) = &summary {
        print_summary(summary);
    }

    Ok(errors.is_empty() && summary.is_some())
}

fn update_bar(bar: &ProgressBar, progress: &SweepProgress) {
    let digests = progress.digests();
    bar.set_length(digests.total());
    bar.set_position(digests.completed());
    bar.set_message(progress.status());
}

fn print_records(bar: &ProgressBar, progress: &SweepProgress) {
    // Opened and have lists are only logged; drain them so they don't accumulate.
    progress.drain_opened();
    progress.drain_have();

    for record in progress.drain_deleted() {
        emit(bar, format_deletion(&record));
    }
    for record in progress.drain_synced() {
        emit(bar, format_sync(&record));
    }
}

/// A hidden bar (stderr is not a terminal) swallows `println`.
fn emit(bar: &ProgressBar, line: String) {
    if bar.is_hidden() {
        println!("{}", line);
    } else {
        bar.println(line);
    }
}

fn format_deletion(record: &DeletionRecord) -> String {
    match &record.status {
        DeletionStatus::Deleted => format!("{} {}", "deleted".yellow(), record.path),
        DeletionStatus::Skipped => format!("{} {}", "would delete".dimmed(), record.path),
        DeletionStatus::Failed(e) => format!("{} {}: {}", "delete failed".red(), record.path, e),
    }
}

fn format_sync(record: &SyncRecord) -> String {
    match &record.status {
        SyncStatus::Synced => format!("{} {}", "synced".green(), record.path),
        SyncStatus::Skipped => format!("{} {}", "would sync".dimmed(), record.path),
        SyncStatus::Failed(e) => format!("{} {}: {}", "sync failed".red(), record.path, e),
    }
}

fn print_summary(summary: &SweepSummary) {
    println!();
    println!("{}", summary.completion_status().bold());
    println!(
        "  {} opened, {} have, {} local files under {}",
        summary.opened_files,
        summary.have_files,
        summary.local_files,
        summary.sweep_root.display()
    );
    println!(
        "  {} deleted, {} skipped, {} failed",
        summary.deleted, summary.delete_skipped, summary.delete_failed
    );
    println!(
        "  {} mismatched: {} synced, {} skipped, {} failed",
        summary.mismatches, summary.synced, summary.sync_skipped, summary.sync_failed
    );
    println!(
        "  {:.2?} total, {:.2?} waiting for the depot",
        summary.elapsed, summary.depot_wait
    );
    if !summary.updates_enabled {
        println!("  {}", "Dry run: nothing was deleted or synced".dimmed());
    }
}
