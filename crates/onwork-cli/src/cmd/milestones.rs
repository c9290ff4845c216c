use anyhow::Result;
use clap::{Args, Subcommand};
use onwork_core::Applied;
use onwork_core::coordinator::MilestoneBatch;
use std::io::Write;
use std::path::Path;

use super::{milestone_row, pretty_job, pretty_milestones, write_changes};
use crate::output::{OutputMode, render_mode};
use crate::session::{Access, Session};
use crate::validate;

#[derive(Args, Debug)]
pub struct MilestonesArgs {
    #[command(subcommand)]
    pub command: MilestonesCommand,
}

#[derive(Subcommand, Debug)]
pub enum MilestonesCommand {
    /// Record the job's milestones; already-recorded indices are skipped.
    Add {
        /// Job ID.
        job: String,
        /// AMOUNT:DESCRIPTION in contract order (repeatable).
        #[arg(long = "milestone", value_name = "AMOUNT:DESCRIPTION", required = true)]
        milestones: Vec<String>,
    },
    /// Replace every milestone of a job that has not been funded.
    Replace {
        /// Job ID.
        job: String,
        /// AMOUNT:DESCRIPTION in contract order (repeatable).
        #[arg(long = "milestone", value_name = "AMOUNT:DESCRIPTION", required = true)]
        milestones: Vec<String>,
    },
    /// List a job's milestones in contract order.
    List {
        /// Job ID.
        job: String,
    },
}

fn render_batch(output: OutputMode, applied: &Applied<MilestoneBatch>) -> Result<()> {
    render_mode(
        output,
        applied,
        |applied, w| {
            applied
                .value
                .milestones
                .iter()
                .try_for_each(|m| milestone_row(m, w))
        },
        |applied, w| {
            writeln!(
                w,
                "created {}, skipped {}",
                applied.value.created, applied.value.skipped
            )?;
            pretty_milestones(&applied.value.milestones, w)?;
            write_changes(&applied.changes, w)
        },
    )
}

/// Execute `onwork milestones ...`.
///
/// # Errors
///
/// Returns an error if a milestone does not parse, the caller does not own
/// the job, or the amounts disagree with the job total.
pub fn run_milestones(
    args: &MilestonesArgs,
    output: OutputMode,
    project_root: &Path,
    user: Option<&str>,
) -> Result<()> {
    match &args.command {
        MilestonesCommand::Add { job, milestones } => {
            let specs = validate::parse_milestones(milestones)?;
            let session = Session::open(project_root, Access::Write, user)?;
            let applied = session
                .coordinator()
                .create_milestones(&session.caller, job, &specs)?;
            session.finish()?;
            render_batch(output, &applied)
        }
        MilestonesCommand::Replace { job, milestones } => {
            let specs = validate::parse_milestones(milestones)?;
            let session = Session::open(project_root, Access::Write, user)?;
            let applied = session
                .coordinator()
                .replace_milestones(&session.caller, job, &specs)?;
            session.finish()?;
            render_batch(output, &applied)
        }
        MilestonesCommand::List { job } => {
            let session = Session::open(project_root, Access::Read, user)?;
            let listing = session.coordinator().milestones_by_job(job)?;
            render_mode(
                output,
                &listing,
                |listing, w| listing.milestones.iter().try_for_each(|m| milestone_row(m, w)),
                |listing, w| {
                    pretty_job(&listing.job, w)?;
                    writeln!(w)?;
                    pretty_milestones(&listing.milestones, w)
                },
            )
        }
    }
}
