#![forbid(unsafe_code)]

mod cmd;
mod output;
mod session;
mod validate;

use clap::{CommandFactory, Parser, Subcommand};
use onwork_core::config::{self, UserConfig};
use output::{CliError, OutputMode};
use std::env;
use std::path::Path;
use std::process::ExitCode;
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "onwork: milestone escrow marketplace with an on-chain contract",
    long_about = None
)]
struct Cli {
    /// Enable debug logging for onwork.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Output format; overrides --json, FORMAT, and the user config.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Act as this user (id or email); overrides ONWORK_USER.
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Initialize an onwork project",
        after_help = "EXAMPLES:\n    onwork init\n    onwork init --auto-mine --arbiter 0x3c44cdddb6a900fa2b585dd299e03d12fa4293bc"
    )]
    Init(cmd::init::InitArgs),

    #[command(next_help_heading = "Setup", about = "Register and manage users")]
    User(cmd::user::UserArgs),

    #[command(
        next_help_heading = "Jobs",
        about = "Post a job and send createJob",
        after_help = "EXAMPLES:\n    onwork create --title \"Landing page\" --description \"...\" --arbiter 0x3c44... \\\n        --milestone 400:Wireframes --milestone 600:Build --wait"
    )]
    Create(cmd::job::CreateArgs),

    #[command(next_help_heading = "Jobs", about = "Add, replace, or list milestones")]
    Milestones(cmd::milestones::MilestonesArgs),

    #[command(next_help_heading = "Read", about = "List all jobs")]
    List(cmd::job::ListArgs),

    #[command(next_help_heading = "Read", about = "List jobs you own or work on")]
    Mine,

    #[command(next_help_heading = "Read", about = "Show one job with milestones, applications, and reviews")]
    Show(cmd::job::JobArgs),

    #[command(next_help_heading = "Jobs", about = "Delete a job that was never funded")]
    Delete(cmd::job::JobArgs),

    #[command(next_help_heading = "Hiring", about = "Apply to a job")]
    Apply(cmd::apply::ApplyArgs),

    #[command(next_help_heading = "Hiring", about = "Accept an application")]
    Accept(cmd::apply::AcceptArgs),

    #[command(next_help_heading = "Hiring", about = "Assign the accepted freelancer on-chain")]
    Assign(cmd::apply::AssignArgs),

    #[command(next_help_heading = "Escrow", about = "Deposit the job total")]
    Fund(cmd::escrow::JobCallArgs),

    #[command(next_help_heading = "Escrow", about = "Start work on a milestone")]
    Start(cmd::escrow::StartArgs),

    #[command(next_help_heading = "Escrow", about = "Submit a milestone's work")]
    Submit(cmd::escrow::SubmitArgs),

    #[command(next_help_heading = "Escrow", about = "Approve a milestone and release its payment")]
    Approve(cmd::escrow::MilestoneCallArgs),

    #[command(next_help_heading = "Escrow", about = "Raise a dispute")]
    Dispute(cmd::escrow::JobCallArgs),

    #[command(next_help_heading = "Escrow", about = "Resolve a dispute as arbiter")]
    Resolve(cmd::escrow::ResolveArgs),

    #[command(next_help_heading = "Jobs", about = "Close a job whose milestones are all completed")]
    Complete(cmd::job::JobArgs),

    #[command(next_help_heading = "Jobs", about = "Cancel a job")]
    Cancel(cmd::job::JobArgs),

    #[command(next_help_heading = "Jobs", about = "Review a completed job")]
    Review(cmd::job::ReviewArgs),

    #[command(next_help_heading = "Direct", about = "Set a job's status after an on-chain change")]
    SetStatus(cmd::job::SetStatusArgs),

    #[command(next_help_heading = "Direct", about = "Set a milestone's status after an on-chain change")]
    MilestoneStatus(cmd::escrow::MilestoneStatusArgs),

    #[command(next_help_heading = "Escrow", about = "Confirm, record, or list escrow transactions")]
    Tx(cmd::tx::TxArgs),

    #[command(next_help_heading = "Escrow", about = "Mine or inspect the simulated contract")]
    Chain(cmd::chain::ChainArgs),

    #[command(next_help_heading = "Read", about = "Arbiter dispute queue and stats")]
    Arbiter(cmd::arbiter::ArbiterArgs),

    #[command(next_help_heading = "Read", about = "Recent jobs and milestone updates")]
    Explorer(cmd::explorer::ExplorerArgs),

    #[command(next_help_heading = "Read", about = "Compare a job with the contract's record")]
    Drift(cmd::explorer::DriftArgs),

    #[command(next_help_heading = "Setup", about = "Generate shell completions")]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("ONWORK_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "onwork=debug,info"
        } else {
            "onwork=info,warn"
        })
    });

    let format = env::var("ONWORK_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries command output
    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(command: Commands, output: OutputMode, user: Option<&str>, project_root: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Init(args) => cmd::init::run_init(&args, output, project_root),
        Commands::User(args) => cmd::user::run_user(&args, output, project_root, user),
        Commands::Create(args) => cmd::job::run_create(&args, output, project_root, user),
        Commands::Milestones(args) => cmd::milestones::run_milestones(&args, output, project_root, user),
        Commands::List(args) => cmd::job::run_list(&args, output, project_root, user),
        Commands::Mine => cmd::job::run_mine(output, project_root, user),
        Commands::Show(args) => cmd::job::run_show(&args, output, project_root, user),
        Commands::Delete(args) => cmd::job::run_delete(&args, output, project_root, user),
        Commands::Apply(args) => cmd::apply::run_apply(&args, output, project_root, user),
        Commands::Accept(args) => cmd::apply::run_accept(&args, output, project_root, user),
        Commands::Assign(args) => cmd::apply::run_assign(&args, output, project_root, user),
        Commands::Fund(args) => cmd::escrow::run_fund(&args, output, project_root, user),
        Commands::Start(args) => cmd::escrow::run_start(&args, output, project_root, user),
        Commands::Submit(args) => cmd::escrow::run_submit(&args, output, project_root, user),
        Commands::Approve(args) => cmd::escrow::run_approve(&args, output, project_root, user),
        Commands::Dispute(args) => cmd::escrow::run_dispute(&args, output, project_root, user),
        Commands::Resolve(args) => cmd::escrow::run_resolve(&args, output, project_root, user),
        Commands::Complete(args) => cmd::job::run_complete(&args, output, project_root, user),
        Commands::Cancel(args) => cmd::job::run_cancel(&args, output, project_root, user),
        Commands::Review(args) => cmd::job::run_review(&args, output, project_root, user),
        Commands::SetStatus(args) => cmd::job::run_set_status(&args, output, project_root, user),
        Commands::MilestoneStatus(args) => {
            cmd::escrow::run_milestone_status(&args, output, project_root, user)
        }
        Commands::Tx(args) => cmd::tx::run_tx(&args, output, project_root, user),
        Commands::Chain(args) => cmd::chain::run_chain(&args, output, project_root),
        Commands::Arbiter(args) => cmd::arbiter::run_arbiter(&args, output, project_root, user),
        Commands::Explorer(args) => cmd::explorer::run_explorer(&args, output, project_root),
        Commands::Drift(args) => cmd::explorer::run_drift(&args, output, project_root),
        Commands::Completions(args) => {
            let mut command = Cli::command();
            cmd::completions::run_completions(args.shell, &mut command)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let user_config = config::load_user_config().unwrap_or_else(|err| {
        warn!(error = %format!("{err:#}"), "ignoring unreadable user config");
        UserConfig::default()
    });
    let output = output::resolve_output_mode(cli.format, cli.json, &user_config);
    let user = session::resolve_user(cli.user.as_deref(), &user_config);

    let result = env::current_dir()
        .map_err(anyhow::Error::from)
        .and_then(|root| run(cli.command, output, user.as_deref(), &root));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            debug!(error = %format!("{err:#}"), "command failed");
            if output::render_error(output, &CliError::from(&err)).is_err() {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}
