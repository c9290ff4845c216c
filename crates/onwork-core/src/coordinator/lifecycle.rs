//! Pure guards for every lifecycle step.
//!
//! Nothing here reads or writes the store; callers load the records inside
//! their transaction and pass them in. Each guard returns the error the
//! caller should surface, already classified as validation, precondition,
//! or forbidden.

use tracing::debug;

use crate::config::EscrowConfig;
use crate::error::{OnworkError, Result};
use crate::model::review::{MAX_RATING, MIN_RATING};
use crate::model::{
    Amount, ApplicationStatus, Job, JobApplication, JobDraft, JobStatus, Milestone,
    MilestoneSpec, MilestoneStatus, User, WalletAddress,
};

fn rejected(job_id: &str, error: OnworkError) -> OnworkError {
    debug!(job_id, error = %error, "guard rejected");
    error
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

pub(super) fn is_client(job: &Job, user: &User) -> bool {
    job.user_id == user.id
}

pub(super) fn is_freelancer(job: &Job, user: &User) -> bool {
    job.is_freelancer(user.wallet_address.as_ref())
}

pub(super) fn require_client(job: &Job, user: &User) -> Result<()> {
    if is_client(job, user) {
        Ok(())
    } else {
        Err(rejected(
            &job.id,
            OnworkError::forbidden(format!("only the client of {} may do this", job.id)),
        ))
    }
}

pub(super) fn require_freelancer(job: &Job, user: &User) -> Result<()> {
    if is_freelancer(job, user) {
        Ok(())
    } else {
        Err(rejected(
            &job.id,
            OnworkError::forbidden(format!(
                "only the assigned freelancer of {} may do this",
                job.id
            )),
        ))
    }
}

pub(super) fn require_arbiter(job: &Job, user: &User) -> Result<()> {
    if job.is_arbiter(user.wallet_address.as_ref()) {
        Ok(())
    } else {
        Err(rejected(
            &job.id,
            OnworkError::forbidden(format!("only the arbiter of {} may do this", job.id)),
        ))
    }
}

/// Client or assigned freelancer.
pub(super) fn require_participant(job: &Job, user: &User) -> Result<()> {
    if is_client(job, user) || is_freelancer(job, user) {
        Ok(())
    } else {
        Err(rejected(
            &job.id,
            OnworkError::forbidden(format!(
                "only the client or freelancer of {} may do this",
                job.id
            )),
        ))
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

pub(super) fn check_transition(job: &Job, target: JobStatus) -> Result<()> {
    job.status
        .can_transition_to(target)
        .map_err(|invalid| rejected(&job.id, OnworkError::transition(invalid.to_string())))
}

pub(super) fn check_milestone_transition(
    job: &Job,
    milestone: &Milestone,
    target: MilestoneStatus,
) -> Result<()> {
    milestone.status.can_transition_to(target).map_err(|invalid| {
        rejected(
            &job.id,
            OnworkError::transition(format!("milestone {}: {invalid}", milestone.id)),
        )
    })
}

fn require_status(job: &Job, allowed: &[JobStatus], action: &str) -> Result<()> {
    if allowed.contains(&job.status) {
        Ok(())
    } else {
        Err(rejected(
            &job.id,
            OnworkError::guard(format!("cannot {action} while job {} is {}", job.id, job.status)),
        ))
    }
}

fn require_assigned(job: &Job) -> Result<&WalletAddress> {
    job.freelancer_wallet.as_ref().ok_or_else(|| {
        rejected(
            &job.id,
            OnworkError::guard(format!("job {} has no assigned freelancer", job.id)),
        )
    })
}

/// Sum of amounts already paid out through approved milestones.
pub(super) fn released(job: &Job, milestones: &[Milestone]) -> Result<Amount> {
    Amount::checked_sum(
        milestones
            .iter()
            .filter(|m| m.status == MilestoneStatus::Completed)
            .map(|m| m.amount),
    )
    .ok_or_else(|| OnworkError::Internal(format!("released amount overflows for {}", job.id)))
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

/// Milestones must be non-empty, non-zero, and add up to `total`.
pub(super) fn check_milestone_specs(specs: &[MilestoneSpec], total: Amount) -> Result<()> {
    if specs.is_empty() {
        return Err(OnworkError::validation("at least one milestone is required"));
    }
    if let Some(index) = specs.iter().position(|spec| spec.amount.is_zero()) {
        return Err(OnworkError::validation(format!(
            "milestone {index} has a zero amount"
        )));
    }
    let sum = Amount::checked_sum(specs.iter().map(|spec| spec.amount))
        .ok_or_else(|| OnworkError::validation("milestone amounts overflow"))?;
    if sum != total {
        return Err(OnworkError::amount_mismatch(format!(
            "milestone amounts sum to {sum}, job total is {total}"
        )));
    }
    Ok(())
}

pub(super) fn check_job_terms(
    title: &str,
    description: &str,
    client: &WalletAddress,
    arbiter: &WalletAddress,
    total: Amount,
    escrow: &EscrowConfig,
) -> Result<()> {
    if title.trim().is_empty() {
        return Err(OnworkError::validation("title must not be empty"));
    }
    if description.trim().is_empty() {
        return Err(OnworkError::validation("description must not be empty"));
    }
    if total.is_zero() {
        return Err(OnworkError::validation("total amount must be positive"));
    }
    if client == arbiter {
        return Err(OnworkError::validation("the client cannot arbitrate their own job"));
    }
    if !escrow.allows_arbiter(arbiter) {
        return Err(OnworkError::validation(format!(
            "{arbiter} is not a configured arbiter"
        )));
    }
    Ok(())
}

pub(super) fn check_draft(draft: &JobDraft, escrow: &EscrowConfig) -> Result<()> {
    check_job_terms(
        &draft.title,
        &draft.description,
        &draft.client_wallet,
        &draft.arbiter,
        draft.total_amount,
        escrow,
    )?;
    check_milestone_specs(&draft.milestones, draft.total_amount)
}

// ---------------------------------------------------------------------------
// Applications and assignment
// ---------------------------------------------------------------------------

pub(super) fn check_apply(
    job: &Job,
    wallet: &WalletAddress,
    cover_letter: &str,
    already_applied: bool,
) -> Result<()> {
    if cover_letter.trim().is_empty() {
        return Err(OnworkError::validation("cover letter must not be empty"));
    }
    require_status(job, &[JobStatus::Created], "apply")?;
    if *wallet == job.client_wallet || *wallet == job.arbiter {
        return Err(rejected(
            &job.id,
            OnworkError::guard("the client and arbiter cannot apply to their own job"),
        ));
    }
    if already_applied {
        return Err(rejected(
            &job.id,
            OnworkError::guard(format!("{wallet} already applied to {}", job.id)),
        ));
    }
    Ok(())
}

pub(super) fn check_accept(
    job: &Job,
    application: &JobApplication,
    accepted: Option<&JobApplication>,
) -> Result<()> {
    if application.job_id != job.id {
        return Err(OnworkError::validation(format!(
            "application {} belongs to another job",
            application.id
        )));
    }
    require_status(job, &[JobStatus::Created], "accept an application")?;
    match accepted {
        Some(existing) if existing.id == application.id => Err(rejected(
            &job.id,
            OnworkError::transition(format!("application {} is already accepted", application.id)),
        )),
        Some(existing) => Err(rejected(
            &job.id,
            OnworkError::guard(format!(
                "job {} already accepted application {}",
                job.id, existing.id
            )),
        )),
        None => Ok(()),
    }
}

/// Assignment needs the accepted application, for the same wallet, on a
/// job that has never had a freelancer.
pub(super) fn check_assign(
    job: &Job,
    application: &JobApplication,
    accepted: Option<&JobApplication>,
    wallet: &WalletAddress,
) -> Result<()> {
    if application.job_id != job.id {
        return Err(OnworkError::validation(format!(
            "application {} belongs to another job",
            application.id
        )));
    }
    if application.freelancer_wallet != *wallet {
        return Err(OnworkError::validation(format!(
            "application {} was made by {}, not {wallet}",
            application.id, application.freelancer_wallet
        )));
    }
    if job.freelancer_wallet.is_some() {
        return Err(rejected(
            &job.id,
            OnworkError::guard(format!("job {} already has a freelancer", job.id)),
        ));
    }
    require_status(job, &[JobStatus::Created, JobStatus::Funded], "assign a freelancer")?;
    let is_accepted = accepted.is_some_and(|a| a.id == application.id)
        && application.status == ApplicationStatus::Accepted;
    if !is_accepted {
        return Err(rejected(
            &job.id,
            OnworkError::guard(format!(
                "application {} has not been accepted",
                application.id
            )),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Funding and work
// ---------------------------------------------------------------------------

pub(super) fn check_fund(job: &Job, milestones: &[Milestone]) -> Result<()> {
    check_transition(job, JobStatus::Funded)?;
    if milestones.is_empty() {
        return Err(rejected(
            &job.id,
            OnworkError::guard(format!("job {} has no milestones to fund", job.id)),
        ));
    }
    Ok(())
}

pub(super) fn check_start(job: &Job, milestone: &Milestone) -> Result<()> {
    require_status(job, &[JobStatus::Funded, JobStatus::InProgress], "start work")?;
    require_assigned(job)?;
    check_milestone_transition(job, milestone, MilestoneStatus::InProgress)
}

pub(super) fn check_submit(job: &Job, milestone: &Milestone) -> Result<()> {
    require_status(job, &[JobStatus::InProgress], "submit a milestone")?;
    check_milestone_transition(job, milestone, MilestoneStatus::Submitted)
}

pub(super) fn check_approve(job: &Job, milestone: &Milestone) -> Result<()> {
    require_status(job, &[JobStatus::InProgress], "approve a milestone")?;
    require_assigned(job)?;
    check_milestone_transition(job, milestone, MilestoneStatus::Completed)
}

// ---------------------------------------------------------------------------
// Disputes and completion
// ---------------------------------------------------------------------------

/// A dispute needs some work started and some work still unpaid.
pub(super) fn check_dispute(job: &Job, milestones: &[Milestone]) -> Result<()> {
    check_transition(job, JobStatus::Disputed)?;
    require_assigned(job)?;
    if milestones
        .iter()
        .all(|m| m.status == MilestoneStatus::Completed)
    {
        return Err(rejected(
            &job.id,
            OnworkError::guard("every milestone is completed; nothing to dispute"),
        ));
    }
    if milestones.iter().all(|m| m.status == MilestoneStatus::Pending) {
        return Err(rejected(
            &job.id,
            OnworkError::guard("no milestone has started; nothing to dispute"),
        ));
    }
    Ok(())
}

pub(super) fn check_resolve(
    job: &Job,
    released: Amount,
    client_refund: Amount,
    freelancer_payment: Amount,
) -> Result<()> {
    check_transition(job, JobStatus::Resolved)?;
    let split = client_refund
        .checked_add(freelancer_payment)
        .ok_or_else(|| OnworkError::validation("refund and payment overflow"))?;
    if split != job.total_amount {
        return Err(OnworkError::amount_mismatch(format!(
            "refund {client_refund} + payment {freelancer_payment} must equal total {}",
            job.total_amount
        )));
    }
    if freelancer_payment < released {
        return Err(OnworkError::validation(format!(
            "payment {freelancer_payment} is below the {released} already released"
        )));
    }
    Ok(())
}

pub(super) fn check_complete(job: &Job, milestones: &[Milestone]) -> Result<()> {
    check_transition(job, JobStatus::Completed)?;
    let done = !milestones.is_empty()
        && milestones
            .iter()
            .all(|m| m.status == MilestoneStatus::Completed);
    if done {
        Ok(())
    } else {
        Err(rejected(
            &job.id,
            OnworkError::guard(format!("job {} still has open milestones", job.id)),
        ))
    }
}

pub(super) fn check_cancel(job: &Job) -> Result<()> {
    check_transition(job, JobStatus::Cancelled)
}

pub(super) fn check_deletable(job: &Job, pending_txs: usize) -> Result<()> {
    require_status(
        job,
        &[JobStatus::Created, JobStatus::WaitingFunding, JobStatus::Cancelled],
        "delete",
    )?;
    if pending_txs > 0 {
        return Err(rejected(
            &job.id,
            OnworkError::guard(format!(
                "job {} has {pending_txs} unconfirmed escrow transaction(s)",
                job.id
            )),
        ));
    }
    Ok(())
}

pub(super) fn check_review(job: &Job, rating: u8, already_reviewed: bool) -> Result<()> {
    if !(MIN_RATING..=MAX_RATING).contains(&rating) {
        return Err(OnworkError::validation(format!(
            "rating must be between {MIN_RATING} and {MAX_RATING}"
        )));
    }
    require_status(job, &[JobStatus::Completed, JobStatus::Resolved], "review")?;
    if already_reviewed {
        return Err(rejected(
            &job.id,
            OnworkError::guard(format!("job {} was already reviewed", job.id)),
        ));
    }
    Ok(())
}
