use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::Path;

use super::job::render_jobs;
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use crate::session::{Access, Session};

#[derive(Args, Debug)]
pub struct ArbiterArgs {
    #[command(subcommand)]
    pub command: ArbiterCommand,
}

#[derive(Subcommand, Debug)]
pub enum ArbiterCommand {
    /// Disputed jobs naming the caller's wallet as arbiter.
    Queue,
    /// Dispute counts across the marketplace.
    Stats,
}

/// Execute `onwork arbiter ...`.
///
/// # Errors
///
/// Returns an error if the caller is unknown or the store cannot be read.
pub fn run_arbiter(args: &ArbiterArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    let session = Session::open(project_root, Access::Read, user)?;
    let coordinator = session.coordinator();
    match args.command {
        ArbiterCommand::Queue => render_jobs(output, &coordinator.arbiter_jobs(&session.caller)?),
        ArbiterCommand::Stats => {
            let stats = coordinator.dispute_stats()?;
            render_mode(
                output,
                &stats,
                |stats, w| writeln!(w, "{}\t{}\t{}", stats.disputed, stats.resolved, stats.arbiters),
                |stats, w| {
                    pretty_section(w, "Disputes")?;
                    pretty_kv(w, "open", stats.disputed.to_string())?;
                    pretty_kv(w, "resolved", stats.resolved.to_string())?;
                    pretty_kv(
                        w,
                        "arbiters",
                        if stats.arbiters == 0 {
                            "any wallet".to_string()
                        } else {
                            stats.arbiters.to_string()
                        },
                    )
                },
            )
        }
    }
}
