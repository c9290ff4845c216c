use anyhow::{Context as _, Result};
use clap::Args;
use onwork_core::SimulatedEscrow;
use onwork_core::config::{self, ProjectConfig, ProjectPaths};
use onwork_core::db;
use onwork_core::lock::{DEFAULT_LOCK_TIMEOUT, StoreLock};
use onwork_core::model::WalletAddress;
use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use crate::validate;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Rewrite the project config even if `.onwork/` already exists.
    #[arg(long)]
    pub force: bool,

    /// Mine every escrow transaction as soon as it is sent.
    #[arg(long)]
    pub auto_mine: bool,

    /// Only allow this wallet as arbiter (repeatable; default any wallet).
    #[arg(long = "arbiter", value_name = "WALLET")]
    pub arbiters: Vec<String>,

    /// Escrow contract address recorded in the config.
    #[arg(long, value_name = "ADDRESS")]
    pub contract_address: Option<String>,
}

#[derive(Debug, Serialize)]
struct InitReport {
    root: String,
    config: String,
    store: String,
    chain: String,
    auto_mine: bool,
    arbiters: Vec<WalletAddress>,
}

/// Execute `onwork init`. Creates the project skeleton:
///
/// ```text
/// .onwork/
///   config.toml       (escrow, explorer, and reconcile settings)
///   onwork.sqlite3    (store, migrated to the latest schema)
///   chain.json        (simulated escrow contract state)
/// ```
///
/// An existing chain is never reset, so `--force` only rewrites the config.
///
/// # Errors
///
/// Returns an error if the project exists and `--force` is not set, a flag
/// does not parse, or any file cannot be written.
pub fn run_init(args: &InitArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let paths = ProjectPaths::new(project_root);
    if paths.is_initialized() && !args.force {
        anyhow::bail!(".onwork/ already exists. Use `onwork init --force` to rewrite its config.");
    }

    let mut project = ProjectConfig::default();
    project.escrow.auto_mine = args.auto_mine;
    project.escrow.arbiters = args
        .arbiters
        .iter()
        .map(|raw| validate::parse_wallet("arbiter", raw))
        .collect::<Result<_, _>>()?;
    if let Some(address) = &args.contract_address {
        project.escrow.contract_address = validate::parse_wallet("contract address", address)?.to_string();
    }

    std::fs::create_dir_all(&paths.root)
        .with_context(|| format!("Failed to create {}", paths.root.display()))?;
    let _lock = StoreLock::acquire(&paths.lock(), DEFAULT_LOCK_TIMEOUT)?;

    let config_path = config::write_project_config(project_root, &project)?;
    db::open_store(&paths.store())?;
    if !paths.chain().exists() {
        SimulatedEscrow::new(project.escrow.auto_mine).save(&paths.chain())?;
    }
    info!(root = %paths.root.display(), auto_mine = project.escrow.auto_mine, "project initialized");

    let report = InitReport {
        root: paths.root.display().to_string(),
        config: config_path.display().to_string(),
        store: paths.store().display().to_string(),
        chain: paths.chain().display().to_string(),
        auto_mine: project.escrow.auto_mine,
        arbiters: project.escrow.arbiters,
    };

    render_mode(
        output,
        &report,
        |report, w| writeln!(w, "initialized\t{}", report.root),
        |report, w| {
            pretty_section(w, "Initialized .onwork/")?;
            pretty_kv(w, "config", &report.config)?;
            pretty_kv(w, "store", &report.store)?;
            pretty_kv(w, "chain", &report.chain)?;
            pretty_kv(w, "auto-mine", report.auto_mine.to_string())?;
            writeln!(w)?;
            writeln!(w, "Next steps:")?;
            writeln!(w, "  onwork user register --name Ada --email ada@example.com --wallet 0x...")?;
            writeln!(w, "  export ONWORK_USER=ada@example.com")
        },
    )
}
