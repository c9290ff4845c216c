//! Read projections. None of these write.
//!
//! Dispute stats, the explorer feed, and a job's milestone list are public;
//! everything else needs an authenticated caller.

use serde::Serialize;
use std::{fmt, str::FromStr};

use super::{Caller, Coordinator, load_job};
use crate::db::query;
use crate::error::{Entity, OnworkError, Result};
use crate::escrow::EscrowClient;
use crate::model::review::average_rating;
use crate::model::{
    Amount, EscrowTransaction, Job, JobApplication, JobStatus, Milestone, MilestoneStatus, Review,
    ParseEnumError, User, WalletAddress,
};

/// A job with everything hanging off it, read in one transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetail {
    pub job: Job,
    pub milestones: Vec<Milestone>,
    pub applications: Vec<JobApplication>,
    pub owner: User,
    pub reviews: Vec<Review>,
}

/// A job header plus its milestones in on-chain order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMilestones {
    pub job: Job,
    pub milestones: Vec<Milestone>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisputeStats {
    pub disputed: u64,
    pub resolved: u64,
    /// Wallets allowed as arbiter; zero means any wallet.
    pub arbiters: usize,
}

/// Which event streams the explorer merges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExplorerFilter {
    #[default]
    All,
    Jobs,
    Milestones,
}

impl ExplorerFilter {
    const fn includes_jobs(self) -> bool {
        matches!(self, Self::All | Self::Jobs)
    }

    const fn includes_milestones(self) -> bool {
        matches!(self, Self::All | Self::Milestones)
    }
}

impl fmt::Display for ExplorerFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "all",
            Self::Jobs => "jobs",
            Self::Milestones => "milestones",
        })
    }
}

impl FromStr for ExplorerFilter {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "jobs" | "job" => Ok(Self::Jobs),
            "milestones" | "milestone" => Ok(Self::Milestones),
            _ => Err(ParseEnumError {
                expected: "explorer filter",
                got: s.to_string(),
            }),
        }
    }
}

/// One item of the explorer feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExplorerEntry {
    #[serde(rename_all = "camelCase")]
    JobCreated {
        job_id: String,
        title: String,
        client_wallet: WalletAddress,
        total_amount: Amount,
        status: JobStatus,
        at_us: i64,
    },
    #[serde(rename_all = "camelCase")]
    MilestoneUpdated {
        milestone_id: String,
        job_id: String,
        job_title: String,
        on_chain_index: u32,
        amount: Amount,
        status: MilestoneStatus,
        at_us: i64,
    },
}

impl ExplorerEntry {
    #[must_use]
    pub const fn at_us(&self) -> i64 {
        match self {
            Self::JobCreated { at_us, .. } | Self::MilestoneUpdated { at_us, .. } => *at_us,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user: User,
    pub average_rating: Option<f64>,
    pub jobs_as_client: u64,
    pub jobs_as_freelancer: u64,
    /// Earnings recorded against the linked wallet and not yet credited.
    pub unclaimed: Amount,
}

/// One field where the store and the contract disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Drift {
    pub field: String,
    pub stored: String,
    pub on_chain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub job_id: String,
    pub on_chain_id: u64,
    pub in_sync: bool,
    pub mismatches: Vec<Drift>,
}

fn drift(field: impl Into<String>, stored: impl fmt::Display, on_chain: impl fmt::Display) -> Drift {
    Drift {
        field: field.into(),
        stored: stored.to_string(),
        on_chain: on_chain.to_string(),
    }
}

fn or_none<T: fmt::Display>(value: Option<&T>) -> String {
    value.map_or_else(|| "none".to_string(), ToString::to_string)
}

impl<E: EscrowClient> Coordinator<'_, E> {
    /// Job, milestones, applications, owner, and reviews.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` for an anonymous caller and `NotFound` for
    /// an unknown job.
    pub fn job_detail(&self, caller: &Caller, job_id: &str) -> Result<JobDetail> {
        self.authenticate(caller)?;
        let tx = self.conn.unchecked_transaction()?;
        let job = load_job(&tx, job_id)?;
        let owner = query::get_user(&tx, &job.user_id)?
            .ok_or_else(|| OnworkError::not_found(Entity::User, job.user_id.clone()))?;
        let detail = JobDetail {
            milestones: query::milestones_for_job(&tx, &job.id)?,
            applications: query::applications_for_job(&tx, &job.id)?,
            reviews: query::reviews_for_job(&tx, &job.id)?,
            owner,
            job,
        };
        tx.finish()?;
        Ok(detail)
    }

    /// Every job, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` for an anonymous caller.
    pub fn all_jobs(&self, caller: &Caller) -> Result<Vec<Job>> {
        self.authenticate(caller)?;
        Ok(query::list_jobs(self.conn)?)
    }

    /// Jobs the caller posted or, with a linked wallet, works on.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` for an anonymous caller.
    pub fn my_jobs(&self, caller: &Caller) -> Result<Vec<Job>> {
        let user = self.authenticate(caller)?;
        Ok(query::list_jobs_for_participant(
            self.conn,
            &user.id,
            user.wallet_address.as_ref(),
        )?)
    }

    /// Disputed jobs the caller arbitrates. Empty without a linked wallet.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` for an anonymous caller.
    pub fn arbiter_jobs(&self, caller: &Caller) -> Result<Vec<Job>> {
        let user = self.authenticate(caller)?;
        match &user.wallet_address {
            Some(wallet) => Ok(query::list_jobs_for_arbiter(self.conn, wallet, JobStatus::Disputed)?),
            None => Ok(Vec::new()),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn dispute_stats(&self) -> Result<DisputeStats> {
        Ok(DisputeStats {
            disputed: query::count_jobs_in_status(self.conn, JobStatus::Disputed)?,
            resolved: query::count_jobs_in_status(self.conn, JobStatus::Resolved)?,
            arbiters: self.config.escrow.arbiters.len(),
        })
    }

    /// Job creations and milestone updates, newest first, each stream
    /// capped at the configured page size.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn explorer(&self, search: Option<&str>, filter: ExplorerFilter) -> Result<Vec<ExplorerEntry>> {
        let needle = search.map(str::trim).filter(|s| !s.is_empty());
        let limit = self.config.explorer.page_size;
        let mut entries = Vec::new();

        if filter.includes_jobs() {
            entries.extend(query::recent_jobs(self.conn, needle, limit)?.into_iter().map(|job| {
                ExplorerEntry::JobCreated {
                    job_id: job.id,
                    title: job.title,
                    client_wallet: job.client_wallet,
                    total_amount: job.total_amount,
                    status: job.status,
                    at_us: job.created_at_us,
                }
            }));
        }
        if filter.includes_milestones() {
            entries.extend(
                query::recent_milestone_activity(self.conn, needle, limit)?
                    .into_iter()
                    .map(|activity| ExplorerEntry::MilestoneUpdated {
                        milestone_id: activity.milestone.id,
                        job_id: activity.milestone.job_id,
                        job_title: activity.job_title,
                        on_chain_index: activity.milestone.on_chain_index,
                        amount: activity.milestone.amount,
                        status: activity.milestone.status,
                        at_us: activity.milestone.updated_at_us,
                    }),
            );
        }

        entries.sort_by(|a, b| b.at_us().cmp(&a.at_us()));
        Ok(entries)
    }

    /// A job's milestones in on-chain order.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown job.
    pub fn milestones_by_job(&self, job_id: &str) -> Result<JobMilestones> {
        let job = load_job(self.conn, job_id)?;
        let milestones = query::milestones_for_job(self.conn, &job.id)?;
        Ok(JobMilestones { job, milestones })
    }

    /// The caller's account with review average and job counts.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` for an anonymous caller.
    pub fn profile(&self, caller: &Caller) -> Result<Profile> {
        let user = self.authenticate(caller)?;
        let wallet = user.wallet_address.as_ref();
        let reviews = query::reviews_for_participant(self.conn, &user.id, wallet)?;
        let (jobs_as_client, jobs_as_freelancer) = query::count_jobs_by_role(self.conn, &user.id, wallet)?;
        let unclaimed = match wallet {
            Some(wallet) => {
                let rows = query::unclaimed_for_wallet(self.conn, wallet)?;
                Amount::checked_sum(rows.iter().map(|row| row.amount))
                    .ok_or_else(|| OnworkError::Internal(format!("unclaimed total overflows for {wallet}")))?
            }
            None => Amount::ZERO,
        };
        Ok(Profile {
            average_rating: average_rating(&reviews),
            jobs_as_client,
            jobs_as_freelancer,
            unclaimed,
            user,
        })
    }

    /// Outbox rows still awaiting confirmation, optionally for one job.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown job.
    pub fn pending_transactions(&self, caller: &Caller, job_id: Option<&str>) -> Result<Vec<EscrowTransaction>> {
        self.authenticate(caller)?;
        if let Some(job_id) = job_id {
            load_job(self.conn, job_id)?;
        }
        Ok(query::pending_escrow_txs(self.conn, job_id)?)
    }

    /// Every outbox row of a job, whatever its outcome.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown job.
    pub fn job_transactions(&self, caller: &Caller, job_id: &str) -> Result<Vec<EscrowTransaction>> {
        self.authenticate(caller)?;
        let job = load_job(self.conn, job_id)?;
        Ok(query::escrow_txs_for_job(self.conn, &job.id)?)
    }

    /// Compare a stored job and its milestones with the contract's record.
    ///
    /// # Errors
    ///
    /// Returns a precondition error when the job has no on-chain record.
    pub fn check_drift(&self, job_id: &str) -> Result<DriftReport> {
        let job = load_job(self.conn, job_id)?;
        let chain = self.contract_job(&job)?;
        let milestones = query::milestones_for_job(self.conn, &job.id)?;
        let mut mismatches = Vec::new();

        if !chain.state.is_consistent_with(job.status) {
            mismatches.push(drift("status", job.status, chain.state));
        }
        if chain.freelancer != job.freelancer_wallet {
            mismatches.push(drift(
                "freelancer",
                or_none(job.freelancer_wallet.as_ref()),
                or_none(chain.freelancer.as_ref()),
            ));
        }
        if chain.total_amount != job.total_amount {
            mismatches.push(drift("total_amount", job.total_amount, chain.total_amount));
        }
        if chain.milestones.len() != milestones.len() {
            mismatches.push(drift("milestone_count", milestones.len(), chain.milestones.len()));
        }
        for (stored, on_chain) in milestones.iter().zip(&chain.milestones) {
            let index = stored.on_chain_index;
            if !on_chain.state.is_consistent_with(stored.status) {
                mismatches.push(drift(format!("milestone[{index}].status"), stored.status, on_chain.state));
            }
            if on_chain.amount != stored.amount {
                mismatches.push(drift(format!("milestone[{index}].amount"), stored.amount, on_chain.amount));
            }
            if on_chain.submission_hash != stored.submission_hash {
                mismatches.push(drift(
                    format!("milestone[{index}].submission_hash"),
                    or_none(stored.submission_hash.as_ref()),
                    or_none(on_chain.submission_hash.as_ref()),
                ));
            }
        }

        if !mismatches.is_empty() {
            tracing::warn!(job_id = %job.id, on_chain_id = chain.id, count = mismatches.len(), "store drifted from contract");
        }
        Ok(DriftReport {
            job_id: job.id,
            on_chain_id: chain.id,
            in_sync: mismatches.is_empty(),
            mismatches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ExplorerEntry, ExplorerFilter};
    use crate::model::{Amount, JobStatus};

    #[test]
    fn filter_parses_singular_and_plural() {
        assert_eq!("jobs".parse::<ExplorerFilter>().unwrap(), ExplorerFilter::Jobs);
        assert_eq!("Milestone".parse::<ExplorerFilter>().unwrap(), ExplorerFilter::Milestones);
        assert_eq!("all".parse::<ExplorerFilter>().unwrap(), ExplorerFilter::All);
        assert!("everything".parse::<ExplorerFilter>().is_err());
    }

    #[test]
    fn explorer_entry_json_is_tagged() {
        let entry = ExplorerEntry::JobCreated {
            job_id: "job-1".into(),
            title: "Logo".into(),
            client_wallet: format!("0x{:040x}", 1).parse().unwrap(),
            total_amount: Amount::new(1000),
            status: JobStatus::Created,
            at_us: 7,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "job_created");
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["totalAmount"], "1000");
        assert_eq!(json["atUs"], 7);
    }
}
