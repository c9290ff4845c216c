use anyhow::Result;
use clap::{Args, Subcommand};
use onwork_core::Applied;
use onwork_core::coordinator::Profile;
use onwork_core::model::User;
use std::io::{self, Write};
use std::path::Path;

use super::{timestamp, write_changes};
use crate::output::{OutputMode, pretty_kv, pretty_section, render, render_mode};
use crate::session::{Access, Session};
use crate::validate;

#[derive(Args, Debug)]
pub struct UserArgs {
    #[command(subcommand)]
    pub command: UserCommand,
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Register a new user.
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Wallet to link at registration.
        #[arg(long)]
        wallet: Option<String>,
        /// `client` or `freelancer`.
        #[arg(long, default_value = "client")]
        role: String,
    },
    /// Show the calling user.
    Whoami,
    /// Show the calling user's ratings, job counts, and earnings.
    Profile,
    /// Switch the calling user to the freelancer role.
    ApplyFreelancer {
        /// Link this wallet in the same step.
        #[arg(long)]
        wallet: Option<String>,
    },
    /// Link a wallet to the calling user and claim earnings recorded for it.
    LinkWallet { wallet: String },
}

fn write_user(user: &User, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "{}\t{}\t{}\t{}",
        user.id,
        user.email,
        user.role,
        user.wallet_address
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string)
    )
}

fn pretty_user(user: &User, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("{}  {}", user.id, user.name))?;
    pretty_kv(w, "email", &user.email)?;
    pretty_kv(w, "role", user.role.to_string())?;
    pretty_kv(
        w,
        "wallet",
        user.wallet_address
            .as_ref()
            .map_or_else(|| "(not linked)".to_string(), ToString::to_string),
    )?;
    pretty_kv(w, "earned", user.total_earned.to_string())?;
    pretty_kv(w, "spent", user.total_spent.to_string())?;
    pretty_kv(w, "joined", timestamp(user.created_at_us))
}

fn render_applied_user(output: OutputMode, applied: &Applied<User>) -> Result<()> {
    render_mode(
        output,
        applied,
        |applied, w| write_user(&applied.value, w),
        |applied, w| {
            pretty_user(&applied.value, w)?;
            write_changes(&applied.changes, w)
        },
    )
}

/// Execute `onwork user ...`.
///
/// # Errors
///
/// Returns an error if the project cannot be opened, an argument does not
/// parse, or the coordinator rejects the call.
pub fn run_user(args: &UserArgs, output: OutputMode, project_root: &Path, user: Option<&str>) -> Result<()> {
    match &args.command {
        UserCommand::Register {
            name,
            email,
            wallet,
            role,
        } => {
            let wallet = wallet
                .as_deref()
                .map(|raw| validate::parse_wallet("wallet", raw))
                .transpose()?;
            let role = validate::parse_role(role)?;
            // registration needs no caller
            let session = Session::open(project_root, Access::Write, None)?;
            let applied = session.coordinator().register(name, email, wallet, role)?;
            session.finish()?;
            render_applied_user(output, &applied)
        }
        UserCommand::Whoami => {
            let session = Session::open(project_root, Access::Read, user)?;
            let me = session.coordinator().current_user(&session.caller)?;
            render_mode(output, &me, write_user, pretty_user)
        }
        UserCommand::Profile => {
            let session = Session::open(project_root, Access::Read, user)?;
            let profile = session.coordinator().profile(&session.caller)?;
            render(output, &profile, write_profile)
        }
        UserCommand::ApplyFreelancer { wallet } => {
            let wallet = wallet
                .as_deref()
                .map(|raw| validate::parse_wallet("wallet", raw))
                .transpose()?;
            let session = Session::open(project_root, Access::Write, user)?;
            let applied = session
                .coordinator()
                .apply_as_freelancer(&session.caller, wallet.as_ref())?;
            session.finish()?;
            render_applied_user(output, &applied)
        }
        UserCommand::LinkWallet { wallet } => {
            let wallet = validate::parse_wallet("wallet", wallet)?;
            let session = Session::open(project_root, Access::Write, user)?;
            let applied = session.coordinator().link_wallet(&session.caller, &wallet)?;
            session.finish()?;
            render_applied_user(output, &applied)
        }
    }
}

fn write_profile(profile: &Profile, w: &mut dyn Write) -> io::Result<()> {
    pretty_user(&profile.user, w)?;
    pretty_kv(
        w,
        "rating",
        profile
            .average_rating
            .map_or_else(|| "(no reviews)".to_string(), |r| format!("{r:.1}")),
    )?;
    pretty_kv(w, "as client", profile.jobs_as_client.to_string())?;
    pretty_kv(w, "as freelancer", profile.jobs_as_freelancer.to_string())?;
    if !profile.unclaimed.is_zero() {
        pretty_kv(w, "unclaimed", profile.unclaimed.to_string())?;
    }
    Ok(())
}
