use anyhow::Result;
use clap::Args;
use onwork_core::db::query;
use onwork_core::model::JobApplication;
use onwork_core::error::Entity;
use onwork_core::{Applied, OnworkError};
use std::io::{self, Write};
use std::path::Path;

use super::{SendArgs, job_row, pretty_job, settle, write_changes, write_sent};
use crate::output::{OutputMode, render, render_mode};
use crate::session::{Access, Session};
use crate::validate;

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Job ID.
    pub job: String,

    #[arg(long)]
    pub cover_letter: String,

    /// Wallet to be paid from; defaults to the caller's linked wallet.
    #[arg(long)]
    pub wallet: Option<String>,
}

#[derive(Args, Debug)]
pub struct AcceptArgs {
    /// Application ID.
    pub application: String,
}

#[derive(Args, Debug)]
pub struct AssignArgs {
    /// Job ID.
    pub job: String,

    /// Accepted application ID.
    pub application: String,

    /// Write the assignment directly after it was confirmed on-chain
    /// elsewhere, instead of sending assignFreelancer.
    #[arg(long)]
    pub direct: bool,

    #[command(flatten)]
    pub send: SendArgs,
}

fn write_application(application: &JobApplication, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "{}\t{}\t{}\t{}",
        application.id, application.job_id, application.status, application.freelancer_wallet
    )
}

fn render_application(output: OutputMode, applied: &Applied<JobApplication>) -> Result<()> {
    render(output, applied, |applied, w| {
        write_application(&applied.value, w)?;
        write_changes(&applied.changes, w)
    })
}

/// Execute `onwork apply`.
///
/// # Errors
///
/// Returns an error if the caller has no wallet to apply with, the job is
/// not open, or the wallet already applied.
pub fn run_apply(args: &ApplyArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    let flagged = args
        .wallet
        .as_deref()
        .map(|raw| validate::parse_wallet("wallet", raw))
        .transpose()?;
    let session = Session::open(project_root, Access::Write, user)?;
    let coordinator = session.coordinator();
    let wallet = match flagged {
        Some(wallet) => wallet,
        None => coordinator
            .current_user(&session.caller)?
            .wallet_address
            .ok_or_else(|| {
                validate::ValidationError::new(
                    "wallet",
                    "",
                    "no wallet is linked to the caller",
                    "pass --wallet or run `onwork user link-wallet <WALLET>` first",
                )
            })?,
    };
    let applied =
        coordinator.create_job_application(&session.caller, &args.job, &args.cover_letter, &wallet)?;
    session.finish()?;
    render_application(output, &applied)
}

/// Execute `onwork accept`.
///
/// # Errors
///
/// Returns an error unless the caller owns the job and no other
/// application was accepted.
pub fn run_accept(args: &AcceptArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    let session = Session::open(project_root, Access::Write, user)?;
    let applied = session
        .coordinator()
        .accept_application(&session.caller, &args.application)?;
    session.finish()?;
    render_application(output, &applied)
}

/// Execute `onwork assign`.
///
/// # Errors
///
/// Returns an error if the application was not accepted, the caller is not
/// the client, or (with `--direct`) the contract has not assigned that wallet.
pub fn run_assign(args: &AssignArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    let session = Session::open(project_root, Access::Write, user)?;
    let coordinator = session.coordinator();

    if args.direct {
        let application = query::get_application(&session.conn, &args.application)?
            .ok_or_else(|| OnworkError::not_found(Entity::Application, &args.application))?;
        let applied = coordinator.assign_freelancer_wallet_to_job(
            &session.caller,
            &args.job,
            &application.id,
            &application.freelancer_wallet,
        )?;
        session.finish()?;
        return render_mode(
            output,
            &applied,
            |applied, w| {
                job_row(&applied.value.0, w)?;
                write_application(&applied.value.1, w)
            },
            |applied, w| {
                pretty_job(&applied.value.0, w)?;
                write_changes(&applied.changes, w)
            },
        );
    }

    let sent = coordinator.send_assign_freelancer(&session.caller, &args.job, &args.application)?;
    let sent = settle(&session, sent, args.send)?;
    session.finish()?;
    render(output, &sent, write_sent)
}
