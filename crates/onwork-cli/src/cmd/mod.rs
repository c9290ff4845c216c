pub mod apply;
pub mod arbiter;
pub mod chain;
pub mod completions;
pub mod escrow;
pub mod explorer;
pub mod init;
pub mod job;
pub mod milestones;
pub mod tx;
pub mod user;

use anyhow::Result;
use clap::Args;
use onwork_core::coordinator::Confirmation;
use onwork_core::db::query;
use onwork_core::model::{EscrowTransaction, Job, Milestone};
use onwork_core::{Applied, Change};
use serde::Serialize;
use std::io::{self, Write};
use tracing::debug;

use crate::output::{pretty_kv, pretty_section};
use crate::session::Session;

/// Flags shared by commands that send an escrow call.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct SendArgs {
    /// Mine the simulated chain and confirm the transaction before returning.
    #[arg(long)]
    pub wait: bool,
}

/// A sent escrow call, and its confirmation when `--wait` was given.
#[derive(Debug, Serialize)]
pub struct Sent {
    pub transaction: EscrowTransaction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<Confirmation>,
    pub changes: Vec<Change>,
}

/// Turn a recorded intent into a [`Sent`], mining and confirming first when
/// asked to.
pub fn settle(session: &Session, sent: Applied<EscrowTransaction>, send: SendArgs) -> Result<Sent> {
    let Applied {
        value: transaction,
        mut changes,
    } = sent;
    if !send.wait {
        return Ok(Sent {
            transaction,
            confirmation: None,
            changes,
        });
    }

    let mined = session.chain.mine()?;
    debug!(mined = mined.len(), tx_ref = %transaction.tx_ref, "mined before confirming");
    let confirmed = session
        .coordinator()
        .confirm_transaction(&session.caller, &transaction.tx_ref)?;
    changes.extend(confirmed.changes);
    let transaction = query::get_escrow_tx(&session.conn, &transaction.tx_ref)?.unwrap_or(transaction);
    Ok(Sent {
        transaction,
        confirmation: Some(confirmed.value),
        changes,
    })
}

pub fn write_sent(sent: &Sent, w: &mut dyn Write) -> io::Result<()> {
    let tx = &sent.transaction;
    writeln!(w, "sent {} {} ({})", tx.kind, tx.tx_ref, tx.status)?;
    match &sent.confirmation {
        None => writeln!(w, "  confirm with: onwork tx confirm {}", tx.tx_ref)?,
        Some(confirmation) => write_confirmation(confirmation, w)?,
    }
    write_changes(&sent.changes, w)
}

pub fn write_confirmation(confirmation: &Confirmation, w: &mut dyn Write) -> io::Result<()> {
    match confirmation {
        Confirmation::Applied { kind, job_id } => writeln!(w, "  applied {kind} to {job_id}"),
        Confirmation::AlreadyApplied { kind, .. } => writeln!(w, "  {kind} was already applied"),
        Confirmation::Pending => writeln!(w, "  not mined yet; confirm again later"),
        Confirmation::Reverted { reason } => writeln!(w, "  reverted: {reason}"),
        Confirmation::Rejected { kind, reason } => writeln!(w, "  {kind} mined but rejected: {reason}"),
    }
}

pub fn write_changes(changes: &[Change], w: &mut dyn Write) -> io::Result<()> {
    if changes.is_empty() {
        return Ok(());
    }
    let names: Vec<String> = changes.iter().map(change_label).collect();
    writeln!(w, "  wrote: {}", names.join(", "))
}

fn change_label(change: &Change) -> String {
    let (entity, id) = match change {
        Change::Job(id) => ("job", id),
        Change::Milestone(id) => ("milestone", id),
        Change::Application(id) => ("application", id),
        Change::User(id) => ("user", id),
        Change::Review(id) => ("review", id),
        Change::Transaction(id) => ("transaction", id),
    };
    format!("{entity} {id}")
}

pub fn timestamp(us: i64) -> String {
    chrono::DateTime::from_timestamp_micros(us).map_or_else(
        || us.to_string(),
        |at| at.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

pub fn job_row(job: &Job, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "{}\t{}\t{}\t{}",
        job.id, job.status, job.total_amount, job.title
    )
}

pub fn milestone_row(milestone: &Milestone, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "{}\t#{}\t{}\t{}",
        milestone.id, milestone.on_chain_index, milestone.status, milestone.amount
    )
}

pub fn tx_row(tx: &EscrowTransaction, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "{}\t{}\t{}\t{}",
        tx.tx_ref,
        tx.kind,
        tx.status,
        tx.job_id.as_deref().unwrap_or("-")
    )
}

pub fn pretty_job(job: &Job, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("{}  {}", job.id, job.title))?;
    pretty_kv(w, "status", job.status.to_string())?;
    pretty_kv(w, "total", job.total_amount.to_string())?;
    pretty_kv(
        w,
        "on-chain id",
        job.on_chain_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
    )?;
    pretty_kv(w, "client", job.client_wallet.to_string())?;
    pretty_kv(
        w,
        "freelancer",
        job.freelancer_wallet
            .as_ref()
            .map_or_else(|| "(unassigned)".to_string(), ToString::to_string),
    )?;
    pretty_kv(w, "arbiter", job.arbiter.to_string())?;
    if let Some(category) = &job.category {
        pretty_kv(w, "category", category)?;
    }
    pretty_kv(w, "updated", timestamp(job.updated_at_us))
}

pub fn pretty_milestones(milestones: &[Milestone], w: &mut dyn Write) -> io::Result<()> {
    if milestones.is_empty() {
        return writeln!(w, "(no milestones)");
    }
    for milestone in milestones {
        write!(w, "  ")?;
        milestone_row(milestone, w)?;
    }
    Ok(())
}
