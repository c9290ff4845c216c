//! Job lifecycle coordinator.
//!
//! Validates preconditions, sends escrow calls, reconciles confirmed effects
//! into the store, and serves read projections. Every mutation runs in one
//! `BEGIN IMMEDIATE` transaction and reports exactly which records it wrote.

mod jobs;
mod lifecycle;
mod outbox;
mod projection;
mod reconcile;
mod users;

use rusqlite::Connection;
use serde::Serialize;

use crate::config::ProjectConfig;
use crate::error::{Entity, OnworkError, Result};
use crate::escrow::{EscrowClient, OnChainJob};
use crate::db::query;
use crate::model::{Job, JobApplication, Milestone, User, WalletAddress};

pub use jobs::{MilestoneBatch, NewJob};
pub use outbox::Confirmation;
pub use projection::{
    DisputeStats, Drift, DriftReport, ExplorerEntry, ExplorerFilter, JobDetail, JobMilestones,
    Profile,
};

/// Who is making a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    /// An authenticated user, by id.
    User(String),
}

impl Caller {
    #[must_use]
    pub fn user(id: impl Into<String>) -> Self {
        Self::User(id.into())
    }
}

/// A record written by a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "entity", content = "id", rename_all = "snake_case")]
pub enum Change {
    Job(String),
    Milestone(String),
    Application(String),
    User(String),
    Review(String),
    Transaction(String),
}

/// Result of a mutation plus the records it wrote, so callers re-fetch only
/// what changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Applied<T> {
    pub value: T,
    pub changes: Vec<Change>,
}

impl<T> Applied<T> {
    pub(crate) fn new(value: T, changes: ChangeSet) -> Self {
        Self {
            value,
            changes: changes.0,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Applied<U> {
        Applied {
            value: f(self.value),
            changes: self.changes,
        }
    }
}

/// Ordered, duplicate-free list of changes.
#[derive(Debug, Default)]
pub(crate) struct ChangeSet(Vec<Change>);

impl ChangeSet {
    pub(crate) fn push(&mut self, change: Change) {
        if !self.0.contains(&change) {
            self.0.push(change);
        }
    }

    pub(crate) fn job(&mut self, id: &str) {
        self.push(Change::Job(id.to_string()));
    }

    pub(crate) fn milestone(&mut self, id: &str) {
        self.push(Change::Milestone(id.to_string()));
    }

    pub(crate) fn application(&mut self, id: &str) {
        self.push(Change::Application(id.to_string()));
    }

    pub(crate) fn user(&mut self, id: &str) {
        self.push(Change::User(id.to_string()));
    }

    pub(crate) fn merge(&mut self, other: Self) {
        for change in other.0 {
            self.push(change);
        }
    }
}

/// The lifecycle coordinator over one store connection and escrow client.
pub struct Coordinator<'a, E: EscrowClient> {
    conn: &'a Connection,
    escrow: E,
    config: &'a ProjectConfig,
}

impl<'a, E: EscrowClient> Coordinator<'a, E> {
    pub const fn new(conn: &'a Connection, escrow: E, config: &'a ProjectConfig) -> Self {
        Self {
            conn,
            escrow,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ProjectConfig {
        self.config
    }

    #[must_use]
    pub const fn escrow(&self) -> &E {
        &self.escrow
    }

    /// Resolve the caller to a stored user.
    fn authenticate(&self, caller: &Caller) -> Result<User> {
        match caller {
            Caller::Anonymous => Err(OnworkError::Unauthenticated),
            Caller::User(id) => query::get_user(self.conn, id)?
                .ok_or_else(|| OnworkError::not_found(Entity::User, id.clone())),
        }
    }

    /// The contract's record of a stored job.
    fn contract_job(&self, job: &Job) -> Result<OnChainJob> {
        let id = chain_id(job)?;
        self.escrow
            .job(id)?
            .ok_or_else(|| OnworkError::guard(format!("the escrow contract has no job {id}")))
    }
}

fn load_job(conn: &Connection, job_id: &str) -> Result<Job> {
    query::get_job(conn, job_id)?.ok_or_else(|| OnworkError::not_found(Entity::Job, job_id))
}

fn load_milestone(conn: &Connection, milestone_id: &str) -> Result<Milestone> {
    query::get_milestone(conn, milestone_id)?
        .ok_or_else(|| OnworkError::not_found(Entity::Milestone, milestone_id))
}

fn load_application(conn: &Connection, application_id: &str) -> Result<JobApplication> {
    query::get_application(conn, application_id)?
        .ok_or_else(|| OnworkError::not_found(Entity::Application, application_id))
}

fn chain_id(job: &Job) -> Result<u64> {
    job.on_chain_id
        .ok_or_else(|| OnworkError::guard(format!("job {} has no on-chain id", job.id)))
}

/// The caller as they act on `job`: an applicant without a linked wallet
/// acts as the wallet of their accepted application.
fn acting_user(conn: &Connection, job: &Job, user: User) -> Result<User> {
    if user.wallet_address.is_some() {
        return Ok(user);
    }
    match query::accepted_application(conn, &job.id)? {
        Some(application) if application.applicant_id == user.id => Ok(User {
            wallet_address: Some(application.freelancer_wallet),
            ..user
        }),
        _ => Ok(user),
    }
}

/// The caller's linked wallet, required for anything signed on-chain.
fn linked_wallet(user: &User) -> Result<WalletAddress> {
    user.wallet_address
        .clone()
        .ok_or_else(|| OnworkError::guard("link a wallet before sending escrow transactions"))
}
