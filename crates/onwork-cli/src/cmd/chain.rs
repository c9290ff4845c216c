use anyhow::Result;
use clap::{Args, Subcommand};
use onwork_core::escrow::{OnChainJob, TxHash};
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;
use tracing::info;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use crate::session::{Access, Session};

#[derive(Args, Debug)]
pub struct ChainArgs {
    #[command(subcommand)]
    pub command: ChainCommand,
}

#[derive(Subcommand, Debug)]
pub enum ChainCommand {
    /// Execute every queued transaction in one block.
    Mine,
    /// Show the simulated contract's block height, mempool, and jobs.
    Show {
        /// Only this on-chain job id.
        #[arg(long)]
        job: Option<u64>,
    },
}

#[derive(Debug, Serialize)]
struct Mined {
    block: u64,
    transactions: Vec<TxHash>,
}

#[derive(Debug, Serialize)]
struct ChainView {
    block: u64,
    pending: usize,
    jobs: Vec<OnChainJob>,
}

/// Execute `onwork chain ...`.
///
/// # Errors
///
/// Returns an error if chain state cannot be loaded or saved.
pub fn run_chain(args: &ChainArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    match &args.command {
        ChainCommand::Mine => {
            let session = Session::open(project_root, Access::Write, None)?;
            let transactions = session.chain.mine()?;
            let mined = Mined {
                block: session.chain.block_height()?,
                transactions,
            };
            info!(block = mined.block, count = mined.transactions.len(), "mined block");
            session.finish()?;
            render_mode(
                output,
                &mined,
                |mined, w| {
                    mined
                        .transactions
                        .iter()
                        .try_for_each(|hash| writeln!(w, "{}\t{hash}", mined.block))
                },
                |mined, w| {
                    writeln!(
                        w,
                        "block {}: {} transaction(s)",
                        mined.block,
                        mined.transactions.len()
                    )?;
                    mined
                        .transactions
                        .iter()
                        .try_for_each(|hash| writeln!(w, "  {hash}"))
                },
            )
        }
        ChainCommand::Show { job } => {
            let session = Session::open(project_root, Access::Read, None)?;
            let mut jobs = session.chain.jobs()?;
            if let Some(id) = job {
                jobs.retain(|j| j.id == *id);
            }
            let view = ChainView {
                block: session.chain.block_height()?,
                pending: session.chain.pending_count()?,
                jobs,
            };
            render_mode(output, &view, write_view, pretty_view)
        }
    }
}

fn write_view(view: &ChainView, w: &mut dyn Write) -> io::Result<()> {
    for job in &view.jobs {
        writeln!(
            w,
            "{}\t{}\t{}\t{}/{}",
            job.id, job.state, job.total_amount, job.released, job.deposited
        )?;
    }
    Ok(())
}

fn pretty_view(view: &ChainView, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Simulated escrow")?;
    pretty_kv(w, "block", view.block.to_string())?;
    pretty_kv(w, "mempool", view.pending.to_string())?;
    for job in &view.jobs {
        writeln!(w)?;
        pretty_kv(w, "job", format!("#{} ({})", job.id, job.state))?;
        pretty_kv(w, "deposited", job.deposited.to_string())?;
        pretty_kv(w, "released", job.released.to_string())?;
        for (index, milestone) in job.milestones.iter().enumerate() {
            writeln!(w, "  #{index}\t{:?}\t{}", milestone.state, milestone.amount)?;
        }
    }
    Ok(())
}
