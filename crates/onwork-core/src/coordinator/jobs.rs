//! Direct job and milestone procedures.
//!
//! These record effects the caller has already driven on-chain (or that
//! never touch the chain, such as applications and reviews). Where a step
//! mirrors an escrow call, the contract's own record is read back and must
//! agree before anything is written.

use serde::{Deserialize, Serialize};

use super::{
    Applied, Caller, ChangeSet, Coordinator, JobMilestones, acting_user, lifecycle,
    load_application, load_job, load_milestone, reconcile,
};
use crate::db::{self, query, write};
use crate::error::{OnworkError, Result};
use crate::escrow::{EscrowClient, OnChainJob, OnChainJobState, OnChainMilestone, OnChainMilestoneState};
use crate::model::{
    Amount, ApplicationStatus, CommitmentHash, IdKind, Job, JobApplication, JobDraft, JobStatus,
    Milestone, MilestoneSpec, MilestoneStatus, Review, WalletAddress, new_id, now_us,
};

/// Input for recording a job whose creation already confirmed on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub title: String,
    pub description: String,
    pub job_hash: CommitmentHash,
    pub on_chain_id: u64,
    pub client_wallet: WalletAddress,
    pub arbiter: WalletAddress,
    pub token_address: Option<WalletAddress>,
    pub total_amount: Amount,
    pub category: Option<String>,
}

/// Outcome of a milestone batch: rows written, indices skipped as already
/// present, and the job's milestones afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MilestoneBatch {
    pub created: usize,
    pub skipped: usize,
    pub milestones: Vec<Milestone>,
}

fn verify_terms(
    chain: &OnChainJob,
    client: &WalletAddress,
    arbiter: &WalletAddress,
    total: Amount,
    job_hash: &CommitmentHash,
) -> Result<()> {
    let mut mismatched = Vec::new();
    if chain.client != *client {
        mismatched.push("client");
    }
    if chain.arbiter != *arbiter {
        mismatched.push("arbiter");
    }
    if chain.total_amount != total {
        mismatched.push("total amount");
    }
    if chain.job_hash != *job_hash {
        mismatched.push("job hash");
    }
    if mismatched.is_empty() {
        Ok(())
    } else {
        Err(OnworkError::validation(format!(
            "on-chain job {} differs in {}",
            chain.id,
            mismatched.join(", ")
        )))
    }
}

fn verify_milestones(chain: &OnChainJob, specs: &[MilestoneSpec]) -> Result<()> {
    let same = chain.milestones.len() == specs.len()
        && chain
            .milestones
            .iter()
            .zip(specs)
            .all(|(on, spec)| on.amount == spec.amount && on.description_hash == spec.description_hash);
    if same {
        Ok(())
    } else {
        Err(OnworkError::validation(format!(
            "milestones differ from those of on-chain job {}",
            chain.id
        )))
    }
}

fn contract_milestone(chain: &OnChainJob, milestone: &Milestone) -> Result<OnChainMilestone> {
    usize::try_from(milestone.on_chain_index)
        .ok()
        .and_then(|index| chain.milestones.get(index))
        .cloned()
        .ok_or_else(|| {
            OnworkError::guard(format!(
                "on-chain job {} has no milestone {}",
                chain.id, milestone.on_chain_index
            ))
        })
}

fn unconfirmed(what: &str, job: &Job) -> OnworkError {
    OnworkError::guard(format!("{what} for {} is not confirmed on-chain", job.id))
}

impl<E: EscrowClient> Coordinator<'_, E> {
    /// The contract's record of `job`, if it has one.
    fn chain_record(&self, job: &Job) -> Result<Option<OnChainJob>> {
        match job.on_chain_id {
            Some(id) => Ok(self.escrow.job(id)?),
            None => Ok(None),
        }
    }

    fn verify_created(
        &self,
        on_chain_id: u64,
        client: &WalletAddress,
        arbiter: &WalletAddress,
        total: Amount,
        job_hash: &CommitmentHash,
    ) -> Result<OnChainJob> {
        let chain = self.escrow.job(on_chain_id)?.ok_or_else(|| {
            OnworkError::guard(format!("the escrow contract has no job {on_chain_id}"))
        })?;
        verify_terms(&chain, client, arbiter, total, job_hash)?;
        Ok(chain)
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Record a job created on-chain. Milestones follow through
    /// [`Coordinator::create_milestones`].
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad terms or terms that differ from
    /// the contract, and a precondition error when the on-chain id is
    /// unknown to the contract or already recorded.
    pub fn create_job(&self, caller: &Caller, new: NewJob) -> Result<Applied<Job>> {
        let user = self.authenticate(caller)?;
        lifecycle::check_job_terms(
            &new.title,
            &new.description,
            &new.client_wallet,
            &new.arbiter,
            new.total_amount,
            &self.config.escrow,
        )?;
        if user.wallet_address.as_ref().is_some_and(|w| *w != new.client_wallet) {
            return Err(OnworkError::forbidden(format!(
                "{} is not your linked wallet",
                new.client_wallet
            )));
        }
        self.verify_created(
            new.on_chain_id,
            &new.client_wallet,
            &new.arbiter,
            new.total_amount,
            &new.job_hash,
        )?;

        let now = now_us();
        let job = Job {
            id: new_id(IdKind::Job, &new.title),
            user_id: user.id,
            title: new.title,
            description: new.description,
            category: new.category,
            on_chain_id: Some(new.on_chain_id),
            job_hash: new.job_hash,
            client_wallet: new.client_wallet,
            freelancer_wallet: None,
            arbiter: new.arbiter,
            token_address: new.token_address,
            total_amount: new.total_amount,
            status: JobStatus::Created,
            created_at_us: now,
            updated_at_us: now,
        };

        let tx = db::begin_immediate(self.conn)?;
        let mut changes = ChangeSet::default();
        reconcile::insert_job(&tx, &mut changes, &job)?;
        tx.commit()?;
        Ok(Applied::new(job, changes))
    }

    /// Record a job and all of its milestones in one transaction; a draft
    /// whose milestones do not add up persists nothing.
    ///
    /// # Errors
    ///
    /// As [`Coordinator::create_job`], plus an amount-mismatch validation
    /// error when the milestones do not sum to the total.
    pub fn create_job_with_milestones(
        &self,
        caller: &Caller,
        draft: &JobDraft,
        on_chain_id: u64,
    ) -> Result<Applied<JobMilestones>> {
        let user = self.authenticate(caller)?;
        lifecycle::check_draft(draft, &self.config.escrow)?;
        if user.wallet_address.as_ref().is_some_and(|w| *w != draft.client_wallet) {
            return Err(OnworkError::forbidden(format!(
                "{} is not your linked wallet",
                draft.client_wallet
            )));
        }
        let chain = self.verify_created(
            on_chain_id,
            &draft.client_wallet,
            &draft.arbiter,
            draft.total_amount,
            &draft.job_hash,
        )?;
        verify_milestones(&chain, &draft.milestones)?;

        let tx = db::begin_immediate(self.conn)?;
        let mut changes = ChangeSet::default();
        let (job, milestones) =
            reconcile::insert_job_with_milestones(&tx, &mut changes, &user, draft, on_chain_id, now_us())?;
        tx.commit()?;
        Ok(Applied::new(JobMilestones { job, milestones }, changes))
    }

    /// Add a job's milestones at indices `0..specs.len()`. Indices already
    /// stored with the same terms are skipped, so a retried call is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the amounts do not sum to the job
    /// total or an index exists with different terms, and a precondition
    /// error when new rows are needed after funding.
    pub fn create_milestones(
        &self,
        caller: &Caller,
        job_id: &str,
        specs: &[MilestoneSpec],
    ) -> Result<Applied<MilestoneBatch>> {
        let user = self.authenticate(caller)?;
        let tx = db::begin_immediate(self.conn)?;
        let job = load_job(&tx, job_id)?;
        lifecycle::require_client(&job, &user)?;
        lifecycle::check_milestone_specs(specs, job.total_amount)?;

        let existing = query::milestones_for_job(&tx, &job.id)?;
        if specs.len() > existing.len() {
            if !matches!(job.status, JobStatus::Created | JobStatus::WaitingFunding) {
                return Err(OnworkError::guard(format!(
                    "cannot add milestones while job {} is {}",
                    job.id, job.status
                )));
            }
            if let Some(chain) = self.chain_record(&job)? {
                verify_milestones(&chain, specs)?;
            }
        }

        let mut changes = ChangeSet::default();
        let (milestones, skipped) =
            reconcile::insert_milestones(&tx, &mut changes, &job.id, specs, now_us())?;
        tx.commit()?;
        Ok(Applied::new(
            MilestoneBatch {
                created: specs.len() - skipped,
                skipped,
                milestones,
            },
            changes,
        ))
    }

    /// Replace all milestones of a job that has not started, resetting the
    /// total to their sum.
    ///
    /// # Errors
    ///
    /// Returns a precondition error once the job left `CREATED` or any
    /// milestone started, and a validation error for specs that differ from
    /// the contract's.
    pub fn replace_milestones(
        &self,
        caller: &Caller,
        job_id: &str,
        specs: &[MilestoneSpec],
    ) -> Result<Applied<MilestoneBatch>> {
        let user = self.authenticate(caller)?;
        let tx = db::begin_immediate(self.conn)?;
        let job = load_job(&tx, job_id)?;
        lifecycle::require_client(&job, &user)?;
        if job.status != JobStatus::Created {
            return Err(OnworkError::guard(format!(
                "milestones of {} are fixed once it is {}",
                job.id, job.status
            )));
        }
        let existing = query::milestones_for_job(&tx, &job.id)?;
        if existing.iter().any(|m| m.status != MilestoneStatus::Pending) {
            return Err(OnworkError::guard(format!(
                "job {} has started milestones",
                job.id
            )));
        }
        let total = Amount::checked_sum(specs.iter().map(|s| s.amount))
            .ok_or_else(|| OnworkError::validation("milestone amounts overflow"))?;
        lifecycle::check_milestone_specs(specs, total)?;
        if let Some(chain) = self.chain_record(&job)? {
            verify_milestones(&chain, specs)?;
        }

        let now = now_us();
        let mut changes = ChangeSet::default();
        write::delete_milestones_for_job(&tx, &job.id)?;
        for old in &existing {
            changes.milestone(&old.id);
        }
        let (milestones, _) = reconcile::insert_milestones(&tx, &mut changes, &job.id, specs, now)?;
        write::set_job_total(&tx, &job.id, total, now)?;
        changes.job(&job.id);
        tx.commit()?;
        Ok(Applied::new(
            MilestoneBatch {
                created: milestones.len(),
                skipped: 0,
                milestones,
            },
            changes,
        ))
    }

    // -----------------------------------------------------------------------
    // Applications
    // -----------------------------------------------------------------------

    /// Apply to a job. Without a linked wallet the caller applies with the
    /// wallet they will sign with, and acts as that wallet on this job.
    ///
    /// # Errors
    ///
    /// Returns a forbidden error if `wallet` is another account's, and a
    /// precondition error once the job is past `CREATED` or the wallet
    /// already applied.
    pub fn create_job_application(
        &self,
        caller: &Caller,
        job_id: &str,
        cover_letter: &str,
        wallet: &WalletAddress,
    ) -> Result<Applied<JobApplication>> {
        let user = self.authenticate(caller)?;
        let tx = db::begin_immediate(self.conn)?;
        let own_wallet = match &user.wallet_address {
            Some(linked) => linked == wallet,
            None => query::get_user_by_wallet(&tx, wallet)?.is_none(),
        };
        if !own_wallet {
            return Err(OnworkError::forbidden(format!("{wallet} is not your wallet")));
        }
        let job = load_job(&tx, job_id)?;
        let already = query::has_applied(&tx, &job.id, wallet)?;
        lifecycle::check_apply(&job, wallet, cover_letter, already)?;

        let application = JobApplication {
            id: new_id(IdKind::Application, &format!("{}/{wallet}", job.id)),
            job_id: job.id.clone(),
            applicant_id: user.id.clone(),
            freelancer_wallet: wallet.clone(),
            cover_letter: cover_letter.trim().to_string(),
            status: ApplicationStatus::Pending,
            created_at_us: now_us(),
        };
        write::insert_application(&tx, &application)?;
        let mut changes = ChangeSet::default();
        changes.application(&application.id);
        tx.commit()?;
        tracing::info!(job_id = %job.id, application_id = %application.id, "application created");
        Ok(Applied::new(application, changes))
    }

    /// Mark one application ACCEPTED.
    ///
    /// # Errors
    ///
    /// Returns a precondition error when the job already accepted one.
    pub fn accept_application(&self, caller: &Caller, application_id: &str) -> Result<Applied<JobApplication>> {
        let user = self.authenticate(caller)?;
        let tx = db::begin_immediate(self.conn)?;
        let application = load_application(&tx, application_id)?;
        let job = load_job(&tx, &application.job_id)?;
        lifecycle::require_client(&job, &user)?;
        let mut changes = ChangeSet::default();
        let accepted = reconcile::apply_accept(&tx, &mut changes, &job, &application)?;
        tx.commit()?;
        Ok(Applied::new(accepted, changes))
    }

    /// Record the freelancer assignment confirmed on-chain.
    ///
    /// # Errors
    ///
    /// Returns a precondition error without an accepted application, after
    /// an earlier assignment, or when the contract shows another freelancer.
    pub fn assign_freelancer_wallet_to_job(
        &self,
        caller: &Caller,
        job_id: &str,
        application_id: &str,
        wallet: &WalletAddress,
    ) -> Result<Applied<(Job, JobApplication)>> {
        let user = self.authenticate(caller)?;
        let tx = db::begin_immediate(self.conn)?;
        let job = load_job(&tx, job_id)?;
        lifecycle::require_client(&job, &user)?;
        let application = load_application(&tx, application_id)?;
        let accepted = query::accepted_application(&tx, &job.id)?;
        lifecycle::check_assign(&job, &application, accepted.as_ref(), wallet)?;
        if self.contract_job(&job)?.freelancer.as_ref() != Some(wallet) {
            return Err(unconfirmed("assignment", &job));
        }

        let mut changes = ChangeSet::default();
        let pair = reconcile::apply_assign(&tx, &mut changes, &job, &application, wallet, now_us())?;
        tx.commit()?;
        Ok(Applied::new(pair, changes))
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    /// Move a job to `status`, with the guard that status requires.
    ///
    /// `IN_PROGRESS` starts the lowest pending milestone. `RESOLVED` needs
    /// the split and goes through [`Coordinator::resolve_dispute`].
    ///
    /// # Errors
    ///
    /// Returns a transition error for moves outside the lifecycle, a
    /// forbidden error for the wrong party, and a precondition error for
    /// failed guards or steps the contract has not confirmed.
    pub fn update_job_status(&self, caller: &Caller, job_id: &str, status: JobStatus) -> Result<Applied<Job>> {
        let user = self.authenticate(caller)?;
        let tx = db::begin_immediate(self.conn)?;
        let job = load_job(&tx, job_id)?;
        let user = acting_user(&tx, &job, user)?;
        let now = now_us();
        let mut changes = ChangeSet::default();

        let updated = match status {
            JobStatus::Created => reconcile::apply_status(&tx, &mut changes, &job, status, now)?,
            JobStatus::WaitingFunding => {
                lifecycle::require_client(&job, &user)?;
                if job.freelancer_wallet.is_none() {
                    return Err(OnworkError::guard(format!(
                        "job {} has no assigned freelancer",
                        job.id
                    )));
                }
                reconcile::apply_status(&tx, &mut changes, &job, status, now)?
            }
            JobStatus::Funded => {
                lifecycle::require_client(&job, &user)?;
                lifecycle::check_fund(&job, &query::milestones_for_job(&tx, &job.id)?)?;
                let chain = self.contract_job(&job)?;
                if chain.state == OnChainJobState::Open {
                    return Err(unconfirmed("funding", &job));
                }
                reconcile::apply_fund(&tx, &mut changes, &job, chain.deposited, now)?
            }
            JobStatus::InProgress => {
                lifecycle::require_participant(&job, &user)?;
                let milestones = query::milestones_for_job(&tx, &job.id)?;
                let first = milestones
                    .iter()
                    .find(|m| m.status == MilestoneStatus::Pending)
                    .ok_or_else(|| {
                        OnworkError::guard(format!("job {} has no pending milestone", job.id))
                    })?;
                reconcile::apply_start(&tx, &mut changes, &job, first, now)?.0
            }
            JobStatus::Disputed => {
                lifecycle::require_participant(&job, &user)?;
                lifecycle::check_dispute(&job, &query::milestones_for_job(&tx, &job.id)?)?;
                if self.contract_job(&job)?.state != OnChainJobState::Disputed {
                    return Err(unconfirmed("dispute", &job));
                }
                reconcile::apply_dispute(&tx, &mut changes, &job, now)?
            }
            JobStatus::Resolved => {
                return Err(OnworkError::validation(
                    "resolving needs the refund and payment split; use resolve_dispute",
                ));
            }
            JobStatus::Completed => {
                if job.status == JobStatus::Disputed {
                    lifecycle::require_arbiter(&job, &user)?;
                } else {
                    lifecycle::require_client(&job, &user)?;
                }
                reconcile::apply_complete(&tx, &mut changes, &job, now)?
            }
            JobStatus::Cancelled => {
                if job.status == JobStatus::Disputed {
                    lifecycle::require_arbiter(&job, &user)?;
                } else {
                    lifecycle::require_client(&job, &user)?;
                }
                lifecycle::check_cancel(&job)?;
                reconcile::apply_status(&tx, &mut changes, &job, status, now)?
            }
        };
        tx.commit()?;
        Ok(Applied::new(updated, changes))
    }

    /// Move a milestone to `status`. Completing it credits the aggregates.
    ///
    /// A `SUBMITTED` update takes the submission hash from the argument or,
    /// when absent, from the contract.
    ///
    /// # Errors
    ///
    /// Returns a transition error for anything but the next forward step,
    /// and a precondition error while the job is disputed or before the
    /// contract confirms the step.
    pub fn update_milestone(
        &self,
        caller: &Caller,
        milestone_id: &str,
        status: MilestoneStatus,
        submission_hash: Option<CommitmentHash>,
    ) -> Result<Applied<Milestone>> {
        let user = self.authenticate(caller)?;
        let tx = db::begin_immediate(self.conn)?;
        let milestone = load_milestone(&tx, milestone_id)?;
        let job = load_job(&tx, &milestone.job_id)?;
        let user = acting_user(&tx, &job, user)?;
        let now = now_us();
        let mut changes = ChangeSet::default();

        let updated = match status {
            MilestoneStatus::Pending => {
                return Err(OnworkError::transition(format!(
                    "milestone {} cannot return to PENDING",
                    milestone.id
                )));
            }
            MilestoneStatus::InProgress => {
                lifecycle::require_participant(&job, &user)?;
                reconcile::apply_start(&tx, &mut changes, &job, &milestone, now)?.1
            }
            MilestoneStatus::Submitted => {
                lifecycle::require_freelancer(&job, &user)?;
                lifecycle::check_submit(&job, &milestone)?;
                let on_chain = contract_milestone(&self.contract_job(&job)?, &milestone)?;
                if on_chain.state == OnChainMilestoneState::Pending {
                    return Err(unconfirmed("submission", &job));
                }
                let hash = match (submission_hash, on_chain.submission_hash) {
                    (Some(given), Some(recorded)) if given != recorded => {
                        return Err(OnworkError::validation(format!(
                            "submission hash {given} differs from the contract's {recorded}"
                        )));
                    }
                    (Some(hash), _) | (None, Some(hash)) => hash,
                    (None, None) => {
                        return Err(OnworkError::validation("a submission hash is required"));
                    }
                };
                reconcile::apply_submit(&tx, &mut changes, &job, &milestone, &hash, now)?
            }
            MilestoneStatus::Completed => {
                lifecycle::require_client(&job, &user)?;
                lifecycle::check_approve(&job, &milestone)?;
                let on_chain = contract_milestone(&self.contract_job(&job)?, &milestone)?;
                if on_chain.state != OnChainMilestoneState::Approved {
                    return Err(unconfirmed("approval", &job));
                }
                reconcile::apply_approve(&tx, &mut changes, &self.config.reconcile, &job, &milestone, now)?
            }
        };
        tx.commit()?;
        Ok(Applied::new(updated, changes))
    }

    /// Start work on one milestone.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::update_milestone`].
    pub fn start_milestone(&self, caller: &Caller, milestone_id: &str) -> Result<Applied<Milestone>> {
        self.update_milestone(caller, milestone_id, MilestoneStatus::InProgress, None)
    }

    /// Close a job whose milestones are all completed.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::update_job_status`].
    pub fn complete_job(&self, caller: &Caller, job_id: &str) -> Result<Applied<Job>> {
        self.update_job_status(caller, job_id, JobStatus::Completed)
    }

    /// Cancel a job before funding (client) or during a dispute (arbiter).
    ///
    /// # Errors
    ///
    /// See [`Coordinator::update_job_status`].
    pub fn cancel_job(&self, caller: &Caller, job_id: &str) -> Result<Applied<Job>> {
        self.update_job_status(caller, job_id, JobStatus::Cancelled)
    }

    /// Record the arbiter's resolution confirmed on-chain.
    ///
    /// # Errors
    ///
    /// Returns an amount-mismatch error unless refund and payment add up to
    /// the total, and a precondition error when the contract shows another
    /// outcome.
    pub fn resolve_dispute(
        &self,
        caller: &Caller,
        job_id: &str,
        client_refund: Amount,
        freelancer_payment: Amount,
    ) -> Result<Applied<Job>> {
        let user = self.authenticate(caller)?;
        let tx = db::begin_immediate(self.conn)?;
        let job = load_job(&tx, job_id)?;
        lifecycle::require_arbiter(&job, &user)?;
        let released = lifecycle::released(&job, &query::milestones_for_job(&tx, &job.id)?)?;
        lifecycle::check_resolve(&job, released, client_refund, freelancer_payment)?;
        let chain = self.contract_job(&job)?;
        if chain.state != OnChainJobState::Resolved || chain.released != freelancer_payment {
            return Err(unconfirmed("resolution", &job));
        }

        let mut changes = ChangeSet::default();
        let resolved = reconcile::apply_resolve(
            &tx,
            &mut changes,
            &self.config.reconcile,
            &job,
            client_refund,
            freelancer_payment,
            now_us(),
        )?;
        tx.commit()?;
        Ok(Applied::new(resolved, changes))
    }

    // -----------------------------------------------------------------------
    // Deletion and reviews
    // -----------------------------------------------------------------------

    /// Delete an unfunded job with its milestones and applications.
    ///
    /// # Errors
    ///
    /// Returns a precondition error once funds may be in escrow or while an
    /// escrow transaction for the job is unconfirmed.
    pub fn delete_job(&self, caller: &Caller, job_id: &str) -> Result<Applied<()>> {
        let user = self.authenticate(caller)?;
        let tx = db::begin_immediate(self.conn)?;
        let job = load_job(&tx, job_id)?;
        lifecycle::require_client(&job, &user)?;
        let pending = query::pending_escrow_txs(&tx, Some(&job.id))?.len();
        lifecycle::check_deletable(&job, pending)?;

        let mut changes = ChangeSet::default();
        for milestone in query::milestones_for_job(&tx, &job.id)? {
            changes.milestone(&milestone.id);
        }
        for application in query::applications_for_job(&tx, &job.id)? {
            changes.application(&application.id);
        }
        write::delete_job(&tx, &job.id)?;
        changes.job(&job.id);
        tx.commit()?;
        tracing::info!(job_id = %job.id, "job deleted");
        Ok(Applied::new((), changes))
    }

    /// Rate a finished job.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a rating outside 1..=5 and a
    /// precondition error before completion or for a second review.
    pub fn add_review(
        &self,
        caller: &Caller,
        job_id: &str,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Applied<Review>> {
        let user = self.authenticate(caller)?;
        let tx = db::begin_immediate(self.conn)?;
        let job = load_job(&tx, job_id)?;
        lifecycle::require_client(&job, &user)?;
        let reviewed = !query::reviews_for_job(&tx, &job.id)?.is_empty();
        lifecycle::check_review(&job, rating, reviewed)?;

        let review = Review {
            id: new_id(IdKind::Review, &job.id),
            job_id: job.id.clone(),
            rating,
            comment: comment.filter(|c| !c.trim().is_empty()),
            created_at_us: now_us(),
        };
        write::insert_review(&tx, &review)?;
        let mut changes = ChangeSet::default();
        reconcile::review_written(&mut changes, &review.id);
        tx.commit()?;
        Ok(Applied::new(review, changes))
    }
}
