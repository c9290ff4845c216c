use anyhow::Result;
use clap::{Args, Subcommand};
use onwork_core::escrow::TxHash;
use onwork_core::model::TxPayload;
use std::path::Path;

use super::{timestamp, tx_row, write_changes, write_confirmation};
use crate::output::{OutputMode, pretty_section, render, render_mode};
use crate::session::{Access, Session};
use crate::validate::ValidationError;

#[derive(Args, Debug)]
pub struct TxArgs {
    #[command(subcommand)]
    pub command: TxCommand,
}

#[derive(Subcommand, Debug)]
pub enum TxCommand {
    /// Read the receipt of a recorded transaction and reconcile it once.
    Confirm {
        /// Transaction hash.
        tx: String,
    },
    /// Record a transaction sent from another wallet app as pending.
    Record {
        /// Transaction hash.
        tx: String,
        /// Job the call targets; omit for createJob and milestone calls.
        #[arg(long)]
        job: Option<String>,
        /// Intent as JSON, e.g. '{"kind":"fund_job","amount":"1000"}'.
        #[arg(long)]
        payload: String,
    },
    /// List pending transactions, or every transaction of a job with --all.
    List {
        #[arg(long)]
        job: Option<String>,
        /// Include applied and reverted transactions (needs --job).
        #[arg(long, requires = "job")]
        all: bool,
    },
}

fn parse_tx_hash(raw: &str) -> Result<TxHash, ValidationError> {
    raw.parse().map_err(|_| {
        ValidationError::new(
            "transaction",
            raw,
            "expected 0x followed by 64 hex digits",
            "copy the hash from `onwork tx list` or your wallet app",
        )
    })
}

fn parse_payload(raw: &str) -> Result<TxPayload, ValidationError> {
    serde_json::from_str(raw).map_err(|err| {
        ValidationError::new(
            "payload",
            raw,
            err.to_string(),
            "use a JSON object with a \"kind\" such as fund_job, approve_milestone, or raise_dispute",
        )
    })
}

/// Execute `onwork tx ...`.
///
/// # Errors
///
/// Returns an error if the hash or payload does not parse, the transaction
/// is unknown, or the confirmed effect no longer applies.
pub fn run_tx(args: &TxArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    match &args.command {
        TxCommand::Confirm { tx } => {
            let session = Session::open(project_root, Access::Write, user)?;
            let applied = session.coordinator().confirm_transaction(&session.caller, tx)?;
            session.finish()?;
            render(output, &applied, |applied, w| {
                write_confirmation(&applied.value, w)?;
                write_changes(&applied.changes, w)
            })
        }
        TxCommand::Record { tx, job, payload } => {
            let hash = parse_tx_hash(tx)?;
            let payload = parse_payload(payload)?;
            let session = Session::open(project_root, Access::Write, user)?;
            let applied = session.coordinator().record_pending_transaction(
                &session.caller,
                &hash,
                job.as_deref(),
                payload,
            )?;
            session.finish()?;
            render(output, &applied, |applied, w| {
                tx_row(&applied.value, w)?;
                write_changes(&applied.changes, w)
            })
        }
        TxCommand::List { job, all } => {
            let session = Session::open(project_root, Access::Read, user)?;
            let coordinator = session.coordinator();
            let rows = match (job, all) {
                (Some(job), true) => coordinator.job_transactions(&session.caller, job)?,
                _ => coordinator.pending_transactions(&session.caller, job.as_deref())?,
            };
            render_mode(
                output,
                &rows,
                |rows, w| rows.iter().try_for_each(|row| tx_row(row, w)),
                |rows, w| {
                    pretty_section(w, "Transactions")?;
                    if rows.is_empty() {
                        return writeln!(w, "(none)");
                    }
                    for row in rows {
                        write!(w, "{}  ", timestamp(row.created_at_us))?;
                        tx_row(row, w)?;
                        if let Some(reason) = &row.revert_reason {
                            writeln!(w, "    reverted: {reason}")?;
                        }
                    }
                    Ok(())
                },
            )
        }
    }
}
