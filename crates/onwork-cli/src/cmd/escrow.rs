use anyhow::Result;
use clap::Args;
use onwork_core::Applied;
use onwork_core::model::{CommitmentHash, Milestone};
use std::path::Path;

use super::{SendArgs, milestone_row, pretty_job, settle, write_changes, write_sent};
use crate::output::{OutputMode, render, render_mode};
use crate::session::{Access, Session};
use crate::validate::{self, ValidationError};

#[derive(Args, Debug)]
pub struct JobCallArgs {
    /// Job ID.
    pub job: String,

    #[command(flatten)]
    pub send: SendArgs,
}

#[derive(Args, Debug)]
pub struct MilestoneCallArgs {
    /// Milestone ID.
    pub milestone: String,

    #[command(flatten)]
    pub send: SendArgs,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Milestone ID.
    pub milestone: String,
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Milestone ID.
    pub milestone: String,

    /// Commitment hash of the delivered work.
    #[arg(long, conflicts_with = "work", required_unless_present = "work")]
    pub hash: Option<String>,

    /// Delivered work; committed by hash.
    #[arg(long)]
    pub work: Option<String>,

    #[command(flatten)]
    pub send: SendArgs,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Job ID.
    pub job: String,

    /// Returned to the client, in base units.
    #[arg(long)]
    pub refund: String,

    /// Paid to the freelancer in total, including released milestones.
    #[arg(long)]
    pub payment: String,

    /// Write the resolution directly after it was confirmed on-chain
    /// elsewhere, instead of sending resolveDispute.
    #[arg(long)]
    pub direct: bool,

    #[command(flatten)]
    pub send: SendArgs,
}

#[derive(Args, Debug)]
pub struct MilestoneStatusArgs {
    /// Milestone ID.
    pub milestone: String,

    /// Target status, e.g. SUBMITTED.
    pub status: String,

    /// Submission commitment, required for SUBMITTED.
    #[arg(long)]
    pub hash: Option<String>,
}

fn render_milestone(output: OutputMode, applied: &Applied<Milestone>) -> Result<()> {
    render(output, applied, |applied, w| {
        milestone_row(&applied.value, w)?;
        write_changes(&applied.changes, w)
    })
}

/// Execute `onwork fund`: deposit the job total.
///
/// # Errors
///
/// Returns an error unless the caller is the client and the job awaits
/// funding.
pub fn run_fund(args: &JobCallArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    let session = Session::open(project_root, Access::Write, user)?;
    let sent = session.coordinator().send_fund_job(&session.caller, &args.job)?;
    let sent = settle(&session, sent, args.send)?;
    session.finish()?;
    render(output, &sent, write_sent)
}

/// Execute `onwork start`: mark a milestone in progress.
///
/// # Errors
///
/// Returns an error unless the job is funded and the milestone pending.
pub fn run_start(args: &StartArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    let session = Session::open(project_root, Access::Write, user)?;
    let applied = session
        .coordinator()
        .start_milestone(&session.caller, &args.milestone)?;
    session.finish()?;
    render_milestone(output, &applied)
}

/// Execute `onwork submit`.
///
/// # Errors
///
/// Returns an error unless the caller is the assigned freelancer and the
/// milestone is in progress.
pub fn run_submit(args: &SubmitArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    let hash = match (&args.hash, &args.work) {
        (Some(raw), _) => validate::parse_hash("hash", raw)?,
        (None, Some(work)) => CommitmentHash::digest(work),
        (None, None) => {
            return Err(ValidationError::new(
                "hash",
                "",
                "a submission needs a commitment",
                "pass --hash 0x... or --work <CONTENT>",
            )
            .into());
        }
    };
    let session = Session::open(project_root, Access::Write, user)?;
    let sent = session
        .coordinator()
        .send_submit_milestone(&session.caller, &args.milestone, hash)?;
    let sent = settle(&session, sent, args.send)?;
    session.finish()?;
    render(output, &sent, write_sent)
}

/// Execute `onwork approve`: release a submitted milestone's payment.
///
/// # Errors
///
/// Returns an error unless the caller is the client and the milestone was
/// submitted.
pub fn run_approve(args: &MilestoneCallArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    let session = Session::open(project_root, Access::Write, user)?;
    let sent = session
        .coordinator()
        .send_approve_milestone(&session.caller, &args.milestone)?;
    let sent = settle(&session, sent, args.send)?;
    session.finish()?;
    render(output, &sent, write_sent)
}

/// Execute `onwork dispute`.
///
/// # Errors
///
/// Returns an error unless the caller is a participant and work is under
/// way.
pub fn run_dispute(args: &JobCallArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    let session = Session::open(project_root, Access::Write, user)?;
    let sent = session
        .coordinator()
        .send_raise_dispute(&session.caller, &args.job)?;
    let sent = settle(&session, sent, args.send)?;
    session.finish()?;
    render(output, &sent, write_sent)
}

/// Execute `onwork resolve`.
///
/// # Errors
///
/// Returns an error unless the caller is the arbiter, the job is disputed,
/// and refund plus payment equal the job total.
pub fn run_resolve(args: &ResolveArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    let refund = validate::parse_amount("refund", &args.refund)?;
    let payment = validate::parse_amount("payment", &args.payment)?;
    let session = Session::open(project_root, Access::Write, user)?;
    let coordinator = session.coordinator();

    if args.direct {
        let applied = coordinator.resolve_dispute(&session.caller, &args.job, refund, payment)?;
        session.finish()?;
        return render_mode(
            output,
            &applied,
            |applied, w| super::job_row(&applied.value, w),
            |applied, w| {
                pretty_job(&applied.value, w)?;
                write_changes(&applied.changes, w)
            },
        );
    }

    let sent = coordinator.send_resolve_dispute(&session.caller, &args.job, refund, payment)?;
    let sent = settle(&session, sent, args.send)?;
    session.finish()?;
    render(output, &sent, write_sent)
}

/// Execute `onwork milestone-status`: the direct `updateMilestones` call,
/// checked against the contract's record.
///
/// # Errors
///
/// Returns an error if the status or hash does not parse or the transition
/// is not allowed.
pub fn run_milestone_status(
    args: &MilestoneStatusArgs,
    output: OutputMode,
    project_root: &Path,
    user: Option<&str>,
) -> Result<()> {
    let status = validate::parse_milestone_status(&args.status)?;
    let hash = args
        .hash
        .as_deref()
        .map(|raw| validate::parse_hash("hash", raw))
        .transpose()?;
    let session = Session::open(project_root, Access::Write, user)?;
    let applied = session
        .coordinator()
        .update_milestone(&session.caller, &args.milestone, status, hash)?;
    session.finish()?;
    render_milestone(output, &applied)
}
