use anyhow::Result;
use clap::Args;
use onwork_core::coordinator::{DriftReport, ExplorerEntry};
use std::io::{self, Write};
use std::path::Path;

use super::timestamp;
use crate::output::{OutputMode, pretty_kv, pretty_section, render, render_mode};
use crate::session::{Access, Session};
use crate::validate;

#[derive(Args, Debug)]
pub struct ExplorerArgs {
    /// Match job titles and client wallets.
    #[arg(long)]
    pub search: Option<String>,

    /// `all`, `jobs`, or `milestones`.
    #[arg(long, default_value = "all")]
    pub filter: String,
}

#[derive(Args, Debug)]
pub struct DriftArgs {
    /// Job ID.
    pub job: String,
}

fn entry_row(entry: &ExplorerEntry, w: &mut dyn Write) -> io::Result<()> {
    match entry {
        ExplorerEntry::JobCreated {
            job_id,
            title,
            total_amount,
            status,
            at_us,
            ..
        } => writeln!(w, "job\t{}\t{job_id}\t{status}\t{total_amount}\t{title}", timestamp(*at_us)),
        ExplorerEntry::MilestoneUpdated {
            milestone_id,
            job_title,
            on_chain_index,
            amount,
            status,
            at_us,
            ..
        } => writeln!(
            w,
            "milestone\t{}\t{milestone_id}\t{status}\t{amount}\t{job_title} #{on_chain_index}",
            timestamp(*at_us)
        ),
    }
}

/// Execute `onwork explorer`: recent jobs and milestone updates, newest
/// first.
///
/// # Errors
///
/// Returns an error if `--filter` does not parse or the store cannot be read.
pub fn run_explorer(args: &ExplorerArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let filter = validate::parse_filter(&args.filter)?;
    let session = Session::open(project_root, Access::Read, None)?;
    let entries = session.coordinator().explorer(args.search.as_deref(), filter)?;
    render(output, &entries, |entries, w| {
        if entries.is_empty() && output == OutputMode::Pretty {
            return writeln!(w, "Nothing yet.");
        }
        entries.iter().try_for_each(|entry| entry_row(entry, w))
    })
}

/// Execute `onwork drift`: compare a stored job with the contract's record.
///
/// # Errors
///
/// Returns an error if the job is unknown or has no on-chain id.
pub fn run_drift(args: &DriftArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let session = Session::open(project_root, Access::Read, None)?;
    let report = session.coordinator().check_drift(&args.job)?;
    render_mode(output, &report, write_drift, pretty_drift)
}

fn write_drift(report: &DriftReport, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "{}\t{}\t{}",
        report.job_id,
        report.on_chain_id,
        if report.in_sync { "in-sync" } else { "drift" }
    )?;
    for drift in &report.mismatches {
        writeln!(w, "{}\t{}\t{}", drift.field, drift.stored, drift.on_chain)?;
    }
    Ok(())
}

fn pretty_drift(report: &DriftReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("{} (on-chain #{})", report.job_id, report.on_chain_id))?;
    if report.in_sync {
        return writeln!(w, "in sync with the contract");
    }
    for drift in &report.mismatches {
        pretty_kv(
            w,
            &drift.field,
            format!("stored {} / on-chain {}", drift.stored, drift.on_chain),
        )?;
    }
    writeln!(w)?;
    writeln!(w, "Confirm pending transactions with `onwork tx list` / `onwork tx confirm`.")
}
