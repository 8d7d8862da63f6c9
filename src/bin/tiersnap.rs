//! # Tiersnap CLI - rotating snapshot backups
//!
//! Command-line front end for the tiersnap library.
//!
//! ## Usage
//! ```bash
//! # Run a backup cycle (transfer, rotate, publish)
//! tiersnap -b /srv/backups/home
//!
//! # Check the root for unexpected entries and report disk usage
//! tiersnap -c -r /srv/backups/home
//!
//! # See what a backup would do without touching anything
//! tiersnap -b -n -v /srv/backups/home
//! ```
//!
//! Exit codes: `0` success, `1` usage error, `2` runtime failure
//! (configuration, lock contention, transfer tool, filesystem).

use clap::error::ErrorKind;
use clap::{ArgGroup, Parser};
use colored::*;
use std::path::PathBuf;
use std::time::Duration;
use tiersnap::report::format_bytes;
use tiersnap::{
    Anomaly, BackupSummary, PromoteOutcome, Result, RsyncTool, Tiersnap, TiersnapBuilder,
    UsageReport,
};

/// Tiersnap - rotating, hardlink-deduplicated directory snapshots
#[derive(Parser)]
#[command(name = "tiersnap")]
#[command(version)]
#[command(about = "Rotating snapshot backups with tiered retention")]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .multiple(true)
        .args(["check", "backup", "report"])
))]
struct Cli {
    /// Check the backup root for unexpected entries
    #[arg(short, long)]
    check: bool,

    /// Run a backup cycle: transfer, rotate, publish
    #[arg(short, long)]
    backup: bool,

    /// Report per-snapshot and total disk usage
    #[arg(short, long)]
    report: bool,

    /// Compute and log what a backup would do, without mutating anything
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit check/report results as JSON
    #[arg(long)]
    json: bool,

    /// Transfer tool binary to use instead of `rsync` from PATH
    #[arg(long, value_name = "PATH")]
    rsync: Option<PathBuf>,

    /// Backup root directory
    root: PathBuf,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => std::process::exit(0),
                _ => std::process::exit(1),
            }
        }
    };

    // Set up logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    }

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    // Run selected modes
    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut builder = TiersnapBuilder::new().dry_run(cli.dry_run);
    if let Some(program) = &cli.rsync {
        builder = builder.sync_tool(RsyncTool::with_program(program));
    }
    let tiersnap = builder.build(&cli.root)?;

    if cli.check {
        print_check(&tiersnap.check()?, cli.json)?;
    }
    if cli.backup {
        print_backup(&tiersnap, tiersnap.run_backup()?);
    }
    if cli.report {
        print_report(&tiersnap.report()?, cli.json)?;
    }
    Ok(())
}

/// Show integrity check results
///
/// Anomalies are warnings, not failures: the exit code stays 0 so that a
/// scheduled check can report without tripping error handling.
fn print_check(anomalies: &[Anomaly], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(anomalies)?);
        return Ok(());
    }
    if anomalies.is_empty() {
        println!("{} No unexpected entries", "✓".green().bold());
    } else {
        println!("{}", "Unexpected entries:".yellow().bold());
        for anomaly in anomalies {
            println!("  - {}", anomaly.to_string().yellow());
        }
    }
    Ok(())
}

/// Show the outcome of a backup cycle
fn print_backup(tiersnap: &Tiersnap, summary: BackupSummary) {
    if summary.dry_run {
        println!("{}", "Dry run - no changes made".blue().bold());
        match &summary.planned {
            Some(plan) => {
                println!("  Rotation that would be committed:");
                for op in &plan.ops {
                    println!("    {}", op.to_string().cyan());
                }
            }
            None => println!("  First run: no previous snapshot to rotate"),
        }
        return;
    }

    println!("{} Backup complete", "✓".green().bold());
    if let Some(ts) = summary.completed_at {
        println!("  Completed: {}", ts.to_rfc2822().cyan());
    }
    if summary.discarded_stale_staging {
        println!("  {}", "Discarded stale staging from interrupted run".yellow());
    }
    match &summary.rotation {
        None => println!("  First snapshot; nothing rotated"),
        Some(PromoteOutcome::Discarded { gate: None }) => {
            println!("  Previous snapshot discarded (no tiers configured)")
        }
        Some(PromoteOutcome::Discarded { gate: Some(tier) }) => {
            let spacing = tiersnap
                .config()
                .tiers
                .iter()
                .find(|t| &t.name == tier)
                .map(|t| humantime::format_duration(Duration::from_secs(t.delay_secs)).to_string())
                .unwrap_or_default();
            println!(
                "  Previous snapshot discarded: {}.0 is younger than {}",
                tier.cyan(),
                spacing.cyan()
            );
        }
        Some(PromoteOutcome::Admitted { dropped }) => {
            println!("  Previous snapshot promoted into the first tier");
            if let Some(path) = dropped {
                println!("  Aged out of retention: {}", path.display().to_string().dimmed());
            }
        }
    }
}

/// Show the usage report
fn print_report(report: &UsageReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{}", "Snapshots:".blue().bold());
    if report.snapshots.is_empty() {
        println!("  (none)");
    }
    for snapshot in &report.snapshots {
        let when = snapshot
            .timestamp
            .map(|ts| ts.to_rfc2822())
            .unwrap_or_else(|| "(no timestamp)".to_string());
        println!(
            "  {:<12} {:>10}  {}",
            snapshot.id.to_string().cyan(),
            format_bytes(snapshot.bytes),
            when.dimmed()
        );
    }
    println!("  {:<12} {:>10}", "total".bold(), format_bytes(report.total_bytes));
    if let Some(pct) = report.efficiency_percent {
        println!(
            "\nCurrent snapshot accounts for {}% of total usage",
            pct.to_string().green().bold()
        );
    }
    Ok(())
}
