use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use crate::model::WalletAddress;

/// Directory holding the store, chain state, lock file and project config.
pub const PROJECT_DIR: &str = ".onwork";

/// Contract address the marketplace talks to unless configured otherwise.
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

/// Explorer page size per stream (jobs and milestone updates).
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Well-known file locations under a project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    pub root: PathBuf,
}

impl ProjectPaths {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.join(PROJECT_DIR),
        }
    }

    #[must_use]
    pub fn store(&self) -> PathBuf {
        self.root.join("onwork.sqlite3")
    }

    #[must_use]
    pub fn chain(&self) -> PathBuf {
        self.root.join("chain.json")
    }

    #[must_use]
    pub fn lock(&self) -> PathBuf {
        self.root.join("lock")
    }

    #[must_use]
    pub fn config(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.root.is_dir()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub escrow: EscrowConfig,
    #[serde(default)]
    pub explorer: ExplorerConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowConfig {
    #[serde(default = "default_contract_address")]
    pub contract_address: String,
    /// Mine each simulated transaction as soon as it is submitted.
    #[serde(default)]
    pub auto_mine: bool,
    /// Wallets allowed as arbiter; empty allows any wallet.
    #[serde(default)]
    pub arbiters: Vec<WalletAddress>,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            contract_address: default_contract_address(),
            auto_mine: false,
            arbiters: Vec::new(),
        }
    }
}

impl EscrowConfig {
    /// Whether `wallet` may be chosen as arbiter.
    #[must_use]
    pub fn allows_arbiter(&self, wallet: &WalletAddress) -> bool {
        self.arbiters.is_empty() || self.arbiters.contains(wallet)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorerConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Credit earnings recorded against an unlinked wallet once a user links
    /// it. Off unless the project opts in.
    #[serde(default)]
    pub credit_unlinked_earnings: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Default caller (user id or email).
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

/// Load `.onwork/config.toml`; a missing file yields defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = ProjectPaths::new(project_root).config();
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Write the project config, creating `.onwork/` if needed.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn write_project_config(project_root: &Path, config: &ProjectConfig) -> Result<PathBuf> {
    let paths = ProjectPaths::new(project_root);
    std::fs::create_dir_all(&paths.root)
        .with_context(|| format!("Failed to create {}", paths.root.display()))?;
    let content = toml::to_string_pretty(config).context("Failed to encode project config")?;
    let path = paths.config();
    std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Load `<config_dir>/onwork/config.toml`; a missing file yields defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("onwork/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Output mode: `--json` flag, then `FORMAT`, then user config, then TTY.
#[must_use]
pub fn resolve_output(cli_json: bool, user: &UserConfig) -> String {
    resolve_output_from(cli_json, user.output.as_deref(), env::var("FORMAT").ok().as_deref())
}

fn resolve_output_from(cli_json: bool, user_output: Option<&str>, env_format: Option<&str>) -> String {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "human" => Some("pretty"),
            "text" | "table" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json".to_string();
    }

    if let Some(mode) = env_format.and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if let Some(mode) = user_output.and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if std::io::stdout().is_terminal() {
        "pretty".to_string()
    } else {
        "text".to_string()
    }
}

fn default_contract_address() -> String {
    DEFAULT_CONTRACT_ADDRESS.to_string()
}

const fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_project_config_uses_defaults() {
        let root = tempfile::tempdir().expect("temp dir must be created");
        let cfg = load_project_config(root.path()).expect("load should succeed");
        assert_eq!(cfg.escrow.contract_address, DEFAULT_CONTRACT_ADDRESS);
        assert!(!cfg.escrow.auto_mine);
        assert!(cfg.escrow.arbiters.is_empty());
        assert_eq!(cfg.explorer.page_size, 20);
        assert!(!cfg.reconcile.credit_unlinked_earnings);
    }

    #[test]
    fn partial_project_config_keeps_other_defaults() {
        let root = tempfile::tempdir().expect("temp dir must be created");
        let dir = root.path().join(PROJECT_DIR);
        std::fs::create_dir_all(&dir).expect("create .onwork");
        std::fs::write(
            dir.join("config.toml"),
            r#"
[escrow]
auto_mine = true
arbiters = ["0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC"]

[reconcile]
credit_unlinked_earnings = true
"#,
        )
        .expect("write config");

        let cfg = load_project_config(root.path()).expect("load should succeed");
        assert!(cfg.escrow.auto_mine);
        assert_eq!(cfg.escrow.contract_address, DEFAULT_CONTRACT_ADDRESS);
        assert_eq!(cfg.explorer.page_size, 20);
        assert!(cfg.reconcile.credit_unlinked_earnings);

        let listed: WalletAddress = "0x3c44cdddb6a900fa2b585dd299e03d12fa4293bc".parse().unwrap();
        let other: WalletAddress = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8".parse().unwrap();
        assert!(cfg.escrow.allows_arbiter(&listed));
        assert!(!cfg.escrow.allows_arbiter(&other));
    }

    #[test]
    fn invalid_arbiter_wallet_is_a_parse_error() {
        let root = tempfile::tempdir().expect("temp dir must be created");
        let dir = root.path().join(PROJECT_DIR);
        std::fs::create_dir_all(&dir).expect("create .onwork");
        std::fs::write(dir.join("config.toml"), "[escrow]\narbiters = [\"nope\"]\n")
            .expect("write config");

        assert!(load_project_config(root.path()).is_err());
    }

    #[test]
    fn written_config_loads_back() {
        let root = tempfile::tempdir().expect("temp dir must be created");
        let mut cfg = ProjectConfig::default();
        cfg.explorer.page_size = 5;
        write_project_config(root.path(), &cfg).expect("write");
        assert_eq!(load_project_config(root.path()).expect("load"), cfg);
    }

    #[test]
    fn cli_json_overrides_env_and_config() {
        assert_eq!(resolve_output_from(true, Some("pretty"), Some("text")), "json");
    }

    #[test]
    fn env_beats_user_config_and_aliases_normalize() {
        assert_eq!(resolve_output_from(false, Some("table"), Some("human")), "pretty");
        assert_eq!(resolve_output_from(false, Some("human"), Some("bogus")), "pretty");
        assert_eq!(resolve_output_from(false, Some("table"), None), "text");
    }

    #[test]
    fn user_config_parses() {
        let cfg: UserConfig = toml::from_str("user = \"ada@example.com\"\noutput = \"json\"\n")
            .expect("parse");
        assert_eq!(cfg.user.as_deref(), Some("ada@example.com"));
        assert_eq!(cfg.output.as_deref(), Some("json"));
    }
}
