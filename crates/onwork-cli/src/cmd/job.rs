use anyhow::Result;
use clap::Args;
use onwork_core::coordinator::JobDetail;
use onwork_core::model::{Amount, Job, JobDraft, Review};
use onwork_core::{Applied, Caller, Coordinator, SimulatedEscrow};
use std::io::{self, Write};
use std::path::Path;

use super::{
    SendArgs, job_row, milestone_row, pretty_job, pretty_milestones, settle, timestamp,
    write_changes, write_sent,
};
use crate::output::{OutputMode, pretty_kv, pretty_section, render, render_mode};
use crate::session::{Access, Session};
use crate::validate::{self, ValidationError};

#[derive(Args, Debug)]
pub struct CreateArgs {
    #[arg(long)]
    pub title: String,

    #[arg(long)]
    pub description: String,

    #[arg(long)]
    pub category: Option<String>,

    /// Milestone as AMOUNT:DESCRIPTION, in contract order (repeatable).
    #[arg(long = "milestone", value_name = "AMOUNT:DESCRIPTION", required = true)]
    pub milestones: Vec<String>,

    /// Total escrow in base units; defaults to the milestone sum.
    #[arg(long)]
    pub total: Option<String>,

    /// Wallet that settles disputes.
    #[arg(long)]
    pub arbiter: String,

    /// Client wallet; defaults to the caller's linked wallet.
    #[arg(long)]
    pub wallet: Option<String>,

    /// ERC-20 token address; omit for native currency.
    #[arg(long)]
    pub token: Option<String>,

    /// Record a job the contract already created under this id instead of
    /// sending createJob.
    #[arg(long, value_name = "ID")]
    pub on_chain_id: Option<u64>,

    #[command(flatten)]
    pub send: SendArgs,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only jobs in this status.
    #[arg(long)]
    pub status: Option<String>,
}

#[derive(Args, Debug)]
pub struct JobArgs {
    /// Job ID.
    pub job: String,
}

#[derive(Args, Debug)]
pub struct ReviewArgs {
    /// Job ID.
    pub job: String,

    /// 1 to 5.
    #[arg(long)]
    pub rating: u8,

    #[arg(long)]
    pub comment: Option<String>,
}

#[derive(Args, Debug)]
pub struct SetStatusArgs {
    /// Job ID.
    pub job: String,

    /// Target status, e.g. FUNDED or in_progress.
    pub status: String,
}

fn client_wallet_for(
    coordinator: &Coordinator<'_, &SimulatedEscrow>,
    caller: &Caller,
    flag: Option<&str>,
) -> Result<onwork_core::model::WalletAddress> {
    if let Some(raw) = flag {
        return Ok(validate::parse_wallet("wallet", raw)?);
    }
    coordinator
        .current_user(caller)?
        .wallet_address
        .ok_or_else(|| {
            ValidationError::new(
                "wallet",
                "",
                "no wallet is linked to the caller",
                "pass --wallet or run `onwork user link-wallet <WALLET>` first",
            )
            .into()
        })
}

/// Execute `onwork create`.
///
/// # Errors
///
/// Returns an error if an argument does not parse, the draft is rejected,
/// or the createJob call cannot be sent.
pub fn run_create(args: &CreateArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    validate::validate_title(&args.title)?;
    let milestones = validate::parse_milestones(&args.milestones)?;
    let total_amount = match &args.total {
        Some(raw) => validate::parse_amount("total", raw)?,
        None => Amount::checked_sum(milestones.iter().map(|m| m.amount)).ok_or_else(|| {
            ValidationError::new(
                "milestone",
                args.milestones.join(" "),
                "milestone amounts overflow",
                "use smaller amounts",
            )
        })?,
    };
    let arbiter = validate::parse_wallet("arbiter", &args.arbiter)?;
    let token_address = args
        .token
        .as_deref()
        .map(|raw| validate::parse_wallet("token", raw))
        .transpose()?;

    let session = Session::open(project_root, Access::Write, user)?;
    let coordinator = session.coordinator();
    let draft = JobDraft {
        job_hash: JobDraft::commit(&args.title, &args.description),
        title: args.title.clone(),
        description: args.description.clone(),
        category: args.category.clone(),
        client_wallet: client_wallet_for(&coordinator, &session.caller, args.wallet.as_deref())?,
        arbiter,
        token_address,
        total_amount,
        milestones,
    };

    if let Some(on_chain_id) = args.on_chain_id {
        let applied = coordinator.create_job_with_milestones(&session.caller, &draft, on_chain_id)?;
        session.finish()?;
        return render_mode(
            output,
            &applied,
            |applied, w| {
                job_row(&applied.value.job, w)?;
                applied.value.milestones.iter().try_for_each(|m| milestone_row(m, w))
            },
            |applied, w| {
                pretty_job(&applied.value.job, w)?;
                pretty_milestones(&applied.value.milestones, w)?;
                write_changes(&applied.changes, w)
            },
        );
    }

    let sent = coordinator.send_create_job(&session.caller, draft)?;
    let sent = settle(&session, sent, args.send)?;
    session.finish()?;
    render(output, &sent, write_sent)
}

/// Execute `onwork list`.
///
/// # Errors
///
/// Returns an error if the store cannot be read or `--status` does not parse.
pub fn run_list(args: &ListArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    let status = args
        .status
        .as_deref()
        .map(validate::parse_job_status)
        .transpose()?;
    let session = Session::open(project_root, Access::Read, user)?;
    let mut jobs = session.coordinator().all_jobs(&session.caller)?;
    if let Some(status) = status {
        jobs.retain(|job| job.status == status);
    }
    render_jobs(output, &jobs)
}

/// Execute `onwork mine`: jobs the caller owns or works on.
///
/// # Errors
///
/// Returns an error if the caller is unknown or the store cannot be read.
pub fn run_mine(output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    let session = Session::open(project_root, Access::Read, user)?;
    let jobs = session.coordinator().my_jobs(&session.caller)?;
    render_jobs(output, &jobs)
}

pub fn render_jobs(output: OutputMode, jobs: &[Job]) -> Result<()> {
    render(output, jobs, |jobs, w| {
        if jobs.is_empty() && output == OutputMode::Pretty {
            return writeln!(w, "No jobs.");
        }
        jobs.iter().try_for_each(|job| job_row(job, w))
    })
}

/// Execute `onwork show`.
///
/// # Errors
///
/// Returns an error if the job does not exist or the caller is unknown.
pub fn run_show(args: &JobArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    let session = Session::open(project_root, Access::Read, user)?;
    let detail = session.coordinator().job_detail(&session.caller, &args.job)?;
    render_mode(output, &detail, write_detail, pretty_detail)
}

fn write_detail(detail: &JobDetail, w: &mut dyn Write) -> io::Result<()> {
    job_row(&detail.job, w)?;
    for milestone in &detail.milestones {
        milestone_row(milestone, w)?;
    }
    for application in &detail.applications {
        writeln!(
            w,
            "{}\t{}\t{}",
            application.id, application.status, application.freelancer_wallet
        )?;
    }
    Ok(())
}

fn pretty_detail(detail: &JobDetail, w: &mut dyn Write) -> io::Result<()> {
    pretty_job(&detail.job, w)?;
    pretty_kv(w, "owner", format!("{} <{}>", detail.owner.name, detail.owner.email))?;
    writeln!(w)?;
    pretty_section(w, "Milestones")?;
    pretty_milestones(&detail.milestones, w)?;
    if !detail.applications.is_empty() {
        writeln!(w)?;
        pretty_section(w, "Applications")?;
        for application in &detail.applications {
            writeln!(
                w,
                "  {}\t{}\t{}",
                application.id, application.status, application.freelancer_wallet
            )?;
        }
    }
    if !detail.reviews.is_empty() {
        writeln!(w)?;
        pretty_section(w, "Reviews")?;
        for review in &detail.reviews {
            write_review(review, w)?;
        }
    }
    Ok(())
}

fn write_review(review: &Review, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "  {}/5  {}  {}",
        review.rating,
        timestamp(review.created_at_us),
        review.comment.as_deref().unwrap_or("")
    )
}

fn render_applied_job(output: OutputMode, applied: &Applied<Job>) -> Result<()> {
    render_mode(
        output,
        applied,
        |applied, w| job_row(&applied.value, w),
        |applied, w| {
            pretty_job(&applied.value, w)?;
            write_changes(&applied.changes, w)
        },
    )
}

/// Execute `onwork delete`.
///
/// # Errors
///
/// Returns an error unless the caller owns the job and it was never funded.
pub fn run_delete(args: &JobArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    let session = Session::open(project_root, Access::Write, user)?;
    let applied = session.coordinator().delete_job(&session.caller, &args.job)?;
    session.finish()?;
    render(output, &applied, |applied, w| {
        writeln!(w, "deleted {}", args.job)?;
        write_changes(&applied.changes, w)
    })
}

/// Execute `onwork complete`.
///
/// # Errors
///
/// Returns an error unless every milestone is completed.
pub fn run_complete(args: &JobArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    let session = Session::open(project_root, Access::Write, user)?;
    let applied = session.coordinator().complete_job(&session.caller, &args.job)?;
    session.finish()?;
    render_applied_job(output, &applied)
}

/// Execute `onwork cancel`.
///
/// # Errors
///
/// Returns an error if the job cannot be cancelled from its current status.
pub fn run_cancel(args: &JobArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    let session = Session::open(project_root, Access::Write, user)?;
    let applied = session.coordinator().cancel_job(&session.caller, &args.job)?;
    session.finish()?;
    render_applied_job(output, &applied)
}

/// Execute `onwork set-status`: the direct `updateJobStatus` call, checked
/// against the contract's record.
///
/// # Errors
///
/// Returns an error if the status does not parse or the transition is not
/// allowed.
pub fn run_set_status(args: &SetStatusArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    let status = validate::parse_job_status(&args.status)?;
    let session = Session::open(project_root, Access::Write, user)?;
    let applied = session
        .coordinator()
        .update_job_status(&session.caller, &args.job, status)?;
    session.finish()?;
    render_applied_job(output, &applied)
}

/// Execute `onwork review`.
///
/// # Errors
///
/// Returns an error if the rating is out of range or the job is not
/// completed.
pub fn run_review(args: &ReviewArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    let rating = validate::parse_rating(args.rating)?;
    let session = Session::open(project_root, Access::Write, user)?;
    let applied = session
        .coordinator()
        .add_review(&session.caller, &args.job, rating, args.comment.clone())?;
    session.finish()?;
    render(output, &applied, |applied, w| {
        writeln!(w, "{}\t{}\t{}/5", applied.value.id, applied.value.job_id, applied.value.rating)?;
        write_changes(&applied.changes, w)
    })
}
