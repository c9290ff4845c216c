//! Project session: store, simulated contract, config, write lock, and the
//! calling user.
//!
//! Caller resolution: `--user` flag > `ONWORK_USER` env > `user` in the user
//! config. The value may be a user id or a registered email. Commands that
//! need a user fail with `Unauthenticated` when none resolves.

use anyhow::{Context, Result};
use onwork_core::config::{self, ProjectConfig, ProjectPaths, UserConfig};
use onwork_core::db::{self, query};
use onwork_core::lock::{DEFAULT_LOCK_TIMEOUT, StoreLock};
use onwork_core::{Caller, Coordinator, ErrorCode, SimulatedEscrow};
use rusqlite::Connection;
use std::env;
use std::path::Path;
use tracing::debug;

/// Failures opening a session, before any command logic runs.
#[derive(Debug)]
pub enum SessionError {
    NotInitialized,
    UnknownUser(String),
}

impl SessionError {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::UnknownUser(_) => ErrorCode::UserNotFound,
        }
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "no onwork project here (.onwork/ is missing)"),
            Self::UnknownUser(who) => write!(f, "no user matches '{who}'"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Environment reader, swapped out in tests.
trait EnvReader {
    fn get(&self, key: &str) -> Option<String>;
}

struct RealEnv;

impl EnvReader for RealEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok().filter(|v| !v.is_empty())
    }
}

fn resolve_user_with(flag: Option<&str>, env: &dyn EnvReader, user: &UserConfig) -> Option<String> {
    flag.filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| env.get("ONWORK_USER"))
        .or_else(|| user.user.clone().filter(|v| !v.is_empty()))
}

/// The raw caller reference from flag, env, or user config.
pub fn resolve_user(flag: Option<&str>, user: &UserConfig) -> Option<String> {
    resolve_user_with(flag, &RealEnv, user)
}

/// Turn a user id or email into a caller. An unknown reference is an error,
/// not an anonymous caller.
fn lookup_caller(conn: &Connection, reference: Option<&str>) -> Result<Caller> {
    let Some(reference) = reference else {
        return Ok(Caller::Anonymous);
    };
    let user = if reference.contains('@') {
        query::get_user_by_email(conn, reference)?
    } else {
        query::get_user(conn, reference)?
    };
    match user {
        Some(user) => Ok(Caller::user(user.id)),
        None => Err(SessionError::UnknownUser(reference.to_string()).into()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    /// Holds the project lock and saves chain state on finish.
    Write,
}

pub struct Session {
    pub paths: ProjectPaths,
    pub config: ProjectConfig,
    pub conn: Connection,
    pub chain: SimulatedEscrow,
    pub caller: Caller,
    access: Access,
    _lock: Option<StoreLock>,
}

impl Session {
    /// Open the project rooted at `project_root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the project is not initialized, the lock is held
    /// elsewhere, config or chain state cannot be read, or `user` names
    /// nobody.
    pub fn open(project_root: &Path, access: Access, user: Option<&str>) -> Result<Self> {
        let paths = ProjectPaths::new(project_root);
        if !paths.is_initialized() {
            return Err(SessionError::NotInitialized.into());
        }

        let lock = match access {
            Access::Write => Some(StoreLock::acquire(&paths.lock(), DEFAULT_LOCK_TIMEOUT)?),
            Access::Read => None,
        };
        let config = config::load_project_config(project_root)?;
        let conn = db::open_store(&paths.store())?;
        let chain = SimulatedEscrow::load(&paths.chain(), config.escrow.auto_mine)?;
        let caller = lookup_caller(&conn, user)?;
        debug!(root = %paths.root.display(), ?access, ?caller, "session opened");

        Ok(Self {
            paths,
            config,
            conn,
            chain,
            caller,
            access,
            _lock: lock,
        })
    }

    pub const fn coordinator(&self) -> Coordinator<'_, &SimulatedEscrow> {
        Coordinator::new(&self.conn, &self.chain, &self.config)
    }

    /// Persist chain state; the lock is released on drop.
    ///
    /// # Errors
    ///
    /// Returns an error if chain state cannot be written.
    pub fn finish(self) -> Result<()> {
        if self.access == Access::Write {
            self.chain
                .save(&self.paths.chain())
                .context("save simulated chain state")?;
        }
        Ok(())
    }
}
